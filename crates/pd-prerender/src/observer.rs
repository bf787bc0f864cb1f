//! Lifecycle listeners attached to a prerender.

use crate::contents::PrerenderContents;

/// Receives lifecycle notifications from one [`PrerenderContents`].
///
/// Notifications are delivered in registration order. After
/// `on_prerender_stop` the contents drops its observer list.
pub trait PrerenderObserver {
    fn on_prerender_start(&self, contents: &PrerenderContents);

    fn on_prerender_stop_loading(&self, _contents: &PrerenderContents) {}

    fn on_prerender_stop(&self, contents: &PrerenderContents);

    /// `contents` produced `replacement` for match-complete accounting.
    ///
    /// Return true to detach from `contents` and follow `replacement`; a
    /// following observer will not see `contents` stop.
    fn on_prerender_created_match_complete_replacement(
        &self,
        _contents: &PrerenderContents,
        _replacement: &PrerenderContents,
    ) -> bool {
        false
    }
}
