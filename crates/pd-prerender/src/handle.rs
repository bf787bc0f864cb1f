//! Handles given to whoever requested a prerender.

use crate::contents::PrerenderContents;
use crate::manager::PrerenderId;
use crate::observer::PrerenderObserver;
use parking_lot::Mutex;
use std::sync::Arc;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandlePhase {
    /// Issued, but the prerender has not started loading.
    Pending,
    Loading,
    Loaded,
    Stopped,
}

#[derive(Debug)]
struct HandleState {
    prerender_id: Option<PrerenderId>,
    phase: HandlePhase,
}

/// A requester's view of one prerender.
///
/// Handles follow their prerender into a match-complete replacement, so a
/// requester keeps a valid handle when the original is swapped in for
/// someone else.
#[derive(Debug)]
pub struct PrerenderHandle {
    state: Mutex<HandleState>,
}

impl PrerenderHandle {
    /// A handle whose prerender will be created later.
    pub fn pending() -> Arc<Self> {
        Arc::new(Self {
            state: Mutex::new(HandleState {
                prerender_id: None,
                phase: HandlePhase::Pending,
            }),
        })
    }

    pub fn bound(prerender_id: PrerenderId) -> Arc<Self> {
        let handle = Self::pending();
        handle.bind(prerender_id);
        handle
    }

    pub fn bind(&self, prerender_id: PrerenderId) {
        self.state.lock().prerender_id = Some(prerender_id);
    }

    /// Binds to `contents` and observes it, catching up with the phase the
    /// prerender has already reached.
    pub fn attach(self: &Arc<Self>, contents: &mut PrerenderContents) {
        self.bind(contents.id());
        if contents.hidden_session().is_some() {
            self.set_phase(if contents.has_stopped_loading() {
                HandlePhase::Loaded
            } else {
                HandlePhase::Loading
            });
        }
        contents.add_observer(self.clone());
    }

    pub fn prerender_id(&self) -> Option<PrerenderId> {
        self.state.lock().prerender_id
    }

    pub fn phase(&self) -> HandlePhase {
        self.state.lock().phase
    }

    pub fn is_prerendering(&self) -> bool {
        matches!(self.phase(), HandlePhase::Loading | HandlePhase::Loaded)
    }

    fn is_bound_to(&self, contents: &PrerenderContents) -> bool {
        self.prerender_id() == Some(contents.id())
    }

    fn set_phase(&self, phase: HandlePhase) {
        self.state.lock().phase = phase;
    }
}

impl PrerenderObserver for PrerenderHandle {
    fn on_prerender_start(&self, contents: &PrerenderContents) {
        if self.is_bound_to(contents) {
            self.set_phase(HandlePhase::Loading);
        }
    }

    fn on_prerender_stop_loading(&self, contents: &PrerenderContents) {
        if self.is_bound_to(contents) {
            self.set_phase(HandlePhase::Loaded);
        }
    }

    fn on_prerender_stop(&self, contents: &PrerenderContents) {
        if self.is_bound_to(contents) {
            self.set_phase(HandlePhase::Stopped);
        }
    }

    fn on_prerender_created_match_complete_replacement(
        &self,
        contents: &PrerenderContents,
        replacement: &PrerenderContents,
    ) -> bool {
        if !self.is_bound_to(contents) {
            return false;
        }
        self.bind(replacement.id());
        true
    }
}

#[cfg(test)]
mod tests {
    use super::HandlePhase;
    use super::PrerenderHandle;
    use crate::final_status::FinalStatus;
    use crate::manager::PrerenderId;
    use crate::test_support::Fixture;

    #[test]
    fn handle_follows_lifecycle() {
        let fixture = Fixture::new();
        let mut contents = fixture.contents("https://a.com/");
        let handle = PrerenderHandle::pending();
        handle.attach(&mut contents);
        assert_eq!(handle.prerender_id(), Some(contents.id()));
        assert_eq!(handle.phase(), HandlePhase::Pending);

        fixture.start(&mut contents);
        assert_eq!(handle.phase(), HandlePhase::Loading);
        contents.did_stop_loading();
        assert_eq!(handle.phase(), HandlePhase::Loaded);
        assert!(handle.is_prerendering());

        contents.destroy(FinalStatus::Cancelled);
        assert_eq!(handle.phase(), HandlePhase::Stopped);
        assert!(!handle.is_prerendering());
    }

    #[test]
    fn late_attach_catches_up() {
        let fixture = Fixture::new();
        let (mut contents, _) = fixture.started("https://a.com/");
        contents.did_stop_loading();

        let handle = PrerenderHandle::pending();
        handle.attach(&mut contents);
        assert_eq!(handle.phase(), HandlePhase::Loaded);
        contents.destroy(FinalStatus::Cancelled);
    }

    #[test]
    fn handle_ignores_other_prerenders() {
        let fixture = Fixture::new();
        let (mut contents, _) = fixture.started("https://a.com/");
        let handle = PrerenderHandle::bound(PrerenderId(u64::MAX));
        contents.add_observer(handle.clone());

        contents.destroy(FinalStatus::Cancelled);
        assert_eq!(handle.phase(), HandlePhase::Pending);
    }
}
