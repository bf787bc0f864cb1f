//! What a prerender needs from the manager that owns it.

use crate::config::PrerenderConfig;
use crate::contents::PrerenderContents;
use crate::final_status::FinalStatus;
use crate::final_status::MatchCompleteStatus;
use crate::final_status::Origin;
use crate::handle::PrerenderHandle;
use crate::host::Referrer;
use crate::host::Size;
use pd_core::ChildId;
use pd_storage::SessionStorageNamespace;
use serde::Serialize;
use std::sync::Arc;
use std::sync::Weak;
use std::time::SystemTime;
use url::Url;

/// Process-unique identity of a prerender.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
pub struct PrerenderId(pub u64);

/// What the manager does with a prerender that just finished.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PendingDelete {
    /// The entry is queued for deletion.
    Delete,
    /// The entry must leave a match-complete replacement in its place.
    ReplaceWithMatchComplete,
}

/// Row of the manager's prerender history log.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PrerenderHistoryEntry {
    pub url: String,
    pub final_status: FinalStatus,
    pub origin: Origin,
    pub end_time: SystemTime,
}

/// A prerender request discovered while a prerender was loading, started
/// only if the parent is swapped in.
#[derive(Debug, Clone)]
pub struct PendingPrerenderInfo {
    pub weak_handle: Weak<PrerenderHandle>,
    pub origin: Origin,
    pub url: Url,
    pub referrer: Referrer,
    pub size: Size,
}

impl PendingPrerenderInfo {
    /// The handle the request was issued through, unless its owner let go.
    pub fn handle(&self) -> Option<Arc<PrerenderHandle>> {
        self.weak_handle.upgrade()
    }
}

/// Manager services consumed by [`PrerenderContents`].
pub trait PrerenderManagerDelegate {
    fn config(&self) -> &PrerenderConfig;

    fn is_control_group(&self, experiment_id: u8) -> bool;

    fn has_recently_been_navigated_to(&self, origin: Origin, url: &Url) -> bool;

    fn record_cookie_status(&self, origin: Origin, experiment_id: u8, cookie_status: u8);

    fn record_final_status(
        &self,
        origin: Origin,
        experiment_id: u8,
        match_complete_status: MatchCompleteStatus,
        final_status: FinalStatus,
    );

    fn add_to_history(&self, contents: &PrerenderContents);

    fn move_entry_to_pending_delete(
        &self,
        contents: &PrerenderContents,
        final_status: FinalStatus,
    ) -> PendingDelete;

    /// Takes ownership of the replacement `contents` produced for `replaced`.
    fn adopt_match_complete_replacement(
        &self,
        replaced: PrerenderId,
        replacement: PrerenderContents,
    );

    fn start_pending_prerenders(
        &self,
        creator_child_id: Option<ChildId>,
        pending: Vec<PendingPrerenderInfo>,
        namespace: Option<Arc<SessionStorageNamespace>>,
    );
}
