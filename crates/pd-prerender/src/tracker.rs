//! Cross-thread authority over prerender final statuses.
//!
//! The tracker maps each live prerender's `(child, route)` pair to the final
//! status it ended with, if any. Any thread may race to claim a status; the
//! first write wins and every caller reads back the winner.

use crate::contents::PrerenderContents;
use crate::final_status::FinalStatus;
use crate::observer::PrerenderObserver;
use parking_lot::Mutex;
use pd_core::GlobalRouteId;
use std::collections::HashMap;
use tracing::debug;

#[derive(Debug, Default)]
pub struct PrerenderTracker {
    final_status_map: Mutex<HashMap<GlobalRouteId, Option<FinalStatus>>>,
}

impl PrerenderTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Attempts to cancel the prerender at `route` with `final_status`.
    ///
    /// Returns true if the prerender is cancelled once this returns, whether
    /// by this call or an earlier one. Returns false if it was already used
    /// or is not tracked. Callable from any thread.
    pub fn try_cancel(&self, route: GlobalRouteId, final_status: FinalStatus) -> bool {
        assert_ne!(
            final_status,
            FinalStatus::Used,
            "try_cancel cannot record a used prerender"
        );
        let actual = self.set_final_status(route, final_status);
        matches!(actual, Some(status) if status != FinalStatus::Used)
    }

    /// Attempts to claim the prerender at `route` for swap-in.
    pub fn try_use(&self, route: GlobalRouteId) -> bool {
        self.set_final_status(route, FinalStatus::Used) == Some(FinalStatus::Used)
    }

    /// The status recorded for `route`, if it is tracked and has one.
    pub fn final_status(&self, route: GlobalRouteId) -> Option<FinalStatus> {
        self.final_status_map.lock().get(&route).copied().flatten()
    }

    /// True while `route` is tracked and has not been used or cancelled.
    pub fn is_prerendering(&self, route: GlobalRouteId) -> bool {
        matches!(self.final_status_map.lock().get(&route), Some(None))
    }

    pub fn tracked_count(&self) -> usize {
        self.final_status_map.lock().len()
    }

    fn set_final_status(
        &self,
        route: GlobalRouteId,
        desired: FinalStatus,
    ) -> Option<FinalStatus> {
        let mut map = self.final_status_map.lock();
        let slot = map.get_mut(&route)?;
        if slot.is_none() {
            debug!(%route, status = desired.as_str(), "tracker recorded final status");
            *slot = Some(desired);
        }
        *slot
    }
}

impl PrerenderObserver for PrerenderTracker {
    fn on_prerender_start(&self, contents: &PrerenderContents) {
        let Some(route) = contents.global_route_id() else {
            return;
        };
        let previous = self.final_status_map.lock().insert(route, None);
        assert!(previous.is_none(), "route {route} is already tracked");
    }

    fn on_prerender_stop(&self, contents: &PrerenderContents) {
        if let Some(route) = contents.global_route_id() {
            self.final_status_map.lock().remove(&route);
        }
    }
}
