//! Registry and owner of live prerenders.
//!
//! [`PrerenderManager`] owns every [`PrerenderContents`] it starts. The
//! contents reach back into the manager through a shared [`ManagerState`]
//! that only records what has to happen (deletions, match-complete
//! replacements, deferred child prerenders); the manager applies that work in
//! [`settle`](PrerenderManager::settle) once control returns to it.

use pd_core::BrowserResult;
use pd_core::ChildId;
use pd_core::GlobalRouteId;
use pd_ipc::PrerenderMessage;
use pd_prerender::FinalStatus;
use pd_prerender::HiddenSession;
use pd_prerender::HistoryStore;
use pd_prerender::HostEnvironment;
use pd_prerender::MatchCompleteStatus;
use pd_prerender::MemorySampler;
use pd_prerender::Origin;
use pd_prerender::PendingDelete;
use pd_prerender::PendingPrerenderInfo;
use pd_prerender::PrerenderConfig;
use pd_prerender::PrerenderContents;
use pd_prerender::PrerenderContext;
use pd_prerender::PrerenderHandle;
use pd_prerender::PrerenderHistoryEntry;
use pd_prerender::PrerenderId;
use pd_prerender::PrerenderManagerDelegate;
use pd_prerender::PrerenderObserver;
use pd_prerender::PrerenderRequest;
use pd_prerender::PrerenderSnapshot;
use pd_prerender::PrerenderTracker;
use pd_prerender::Size;
use pd_prerender::cookies::NUM_COOKIE_STATUSES;
use pd_prerender::host::Referrer;
use pd_storage::SessionStorageNamespace;
use serde::Serialize;
use std::cell::RefCell;
use std::collections::BTreeMap;
use std::collections::VecDeque;
use std::rc::Rc;
use std::sync::Arc;
use std::time::Duration;
use std::time::Instant;
use std::time::SystemTime;
use tracing::debug;
use tracing::info;
use tracing::warn;
use url::Url;

/// How long a navigation counts as recent for the recently-visited check.
pub const NAVIGATE_TO_PRERENDER_WINDOW: Duration = Duration::from_secs(5);

/// Entries kept in the prerender history log.
pub const HISTORY_LENGTH: usize = 100;

/// Viewport used when a request does not carry one.
pub const DEFAULT_VIEWPORT: Size = Size {
    width: 1024,
    height: 768,
};

/// Experiment arm the manager runs in.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PrerenderMode {
    #[default]
    Enabled,
    /// Requests are tracked and matched but never loaded.
    ControlGroup,
    /// Cancellations a control prerender could not have suffered leave a
    /// match-complete replacement behind.
    MatchCompleteGroup,
}

/// What [`PrerenderManager::clear_data`] wipes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClearData {
    Contents,
    History,
    All,
}

/// Outcome counters, keyed by status name.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct PrerenderStats {
    pub started: BTreeMap<&'static str, u32>,
    pub final_status: BTreeMap<&'static str, u32>,
    pub match_complete_final_status: BTreeMap<&'static str, u32>,
    pub cookie_status: [u32; NUM_COOKIE_STATUSES as usize],
}

struct PendingStart {
    creator_child_id: Option<ChildId>,
    pending: Vec<PendingPrerenderInfo>,
    namespace: Option<Arc<SessionStorageNamespace>>,
}

/// Manager bookkeeping shared with every prerender it owns.
struct ManagerState {
    config: PrerenderConfig,
    mode: PrerenderMode,
    navigations: RefCell<VecDeque<(Url, Instant)>>,
    history: RefCell<VecDeque<PrerenderHistoryEntry>>,
    stats: RefCell<PrerenderStats>,
    pending_deletes: RefCell<Vec<PrerenderId>>,
    replacements: RefCell<Vec<(PrerenderId, PrerenderContents)>>,
    pending_starts: RefCell<Vec<PendingStart>>,
}

impl ManagerState {
    fn new(config: PrerenderConfig, mode: PrerenderMode) -> Self {
        Self {
            config,
            mode,
            navigations: RefCell::new(VecDeque::new()),
            history: RefCell::new(VecDeque::new()),
            stats: RefCell::new(PrerenderStats::default()),
            pending_deletes: RefCell::new(Vec::new()),
            replacements: RefCell::new(Vec::new()),
            pending_starts: RefCell::new(Vec::new()),
        }
    }

    fn record_navigation_at(&self, url: Url, at: Instant) {
        let mut navigations = self.navigations.borrow_mut();
        prune_navigations(&mut navigations, at);
        navigations.push_back((url, at));
    }

    fn has_queued_work(&self) -> bool {
        !self.pending_deletes.borrow().is_empty()
            || !self.replacements.borrow().is_empty()
            || !self.pending_starts.borrow().is_empty()
    }
}

fn prune_navigations(navigations: &mut VecDeque<(Url, Instant)>, now: Instant) {
    while let Some((_, at)) = navigations.front() {
        if now.saturating_duration_since(*at) <= NAVIGATE_TO_PRERENDER_WINDOW {
            break;
        }
        navigations.pop_front();
    }
}

impl PrerenderManagerDelegate for ManagerState {
    fn config(&self) -> &PrerenderConfig {
        &self.config
    }

    fn is_control_group(&self, _experiment_id: u8) -> bool {
        self.mode == PrerenderMode::ControlGroup
    }

    fn has_recently_been_navigated_to(&self, origin: Origin, url: &Url) -> bool {
        let now = Instant::now();
        let mut navigations = self.navigations.borrow_mut();
        prune_navigations(&mut navigations, now);
        let recent = navigations.iter().rev().find(|(visited, _)| visited == url);
        if let Some((_, at)) = recent {
            debug!(
                %url,
                origin = origin.as_str(),
                since_ms = now.saturating_duration_since(*at).as_millis() as u64,
                "prerender target was recently visited"
            );
        }
        recent.is_some()
    }

    fn record_cookie_status(&self, _origin: Origin, _experiment_id: u8, cookie_status: u8) {
        let mut stats = self.stats.borrow_mut();
        if let Some(slot) = stats.cookie_status.get_mut(usize::from(cookie_status)) {
            *slot += 1;
        }
    }

    fn record_final_status(
        &self,
        origin: Origin,
        _experiment_id: u8,
        match_complete_status: MatchCompleteStatus,
        final_status: FinalStatus,
    ) {
        debug!(
            origin = origin.as_str(),
            status = final_status.as_str(),
            ?match_complete_status,
            "prerender final status recorded"
        );
        let mut stats = self.stats.borrow_mut();
        if match_complete_status != MatchCompleteStatus::Replacement {
            *stats.final_status.entry(final_status.as_str()).or_default() += 1;
        }
        if match_complete_status != MatchCompleteStatus::ReplacementPending {
            *stats
                .match_complete_final_status
                .entry(final_status.as_str())
                .or_default() += 1;
        }
    }

    fn add_to_history(&self, contents: &PrerenderContents) {
        let Some(final_status) = contents.final_status() else {
            return;
        };
        let mut history = self.history.borrow_mut();
        if history.len() == HISTORY_LENGTH {
            history.pop_front();
        }
        history.push_back(PrerenderHistoryEntry {
            url: contents.prerender_url().to_string(),
            final_status,
            origin: contents.origin(),
            end_time: SystemTime::now(),
        });
    }

    fn move_entry_to_pending_delete(
        &self,
        contents: &PrerenderContents,
        final_status: FinalStatus,
    ) -> PendingDelete {
        if self.mode == PrerenderMode::MatchCompleteGroup
            && contents.prerendering_has_started()
            && contents.match_complete_status() == MatchCompleteStatus::Default
            && final_status.needs_match_complete_dummy()
        {
            return PendingDelete::ReplaceWithMatchComplete;
        }
        self.pending_deletes.borrow_mut().push(contents.id());
        PendingDelete::Delete
    }

    fn adopt_match_complete_replacement(
        &self,
        replaced: PrerenderId,
        replacement: PrerenderContents,
    ) {
        self.replacements.borrow_mut().push((replaced, replacement));
    }

    fn start_pending_prerenders(
        &self,
        creator_child_id: Option<ChildId>,
        pending: Vec<PendingPrerenderInfo>,
        namespace: Option<Arc<SessionStorageNamespace>>,
    ) {
        if pending.is_empty() {
            return;
        }
        self.pending_starts.borrow_mut().push(PendingStart {
            creator_child_id,
            pending,
            namespace,
        });
    }
}

struct PrerenderData {
    contents: PrerenderContents,
    handle_count: usize,
    expiry: Instant,
}

/// Everything a new prerender needs besides the shared context.
struct AddRequest {
    origin: Origin,
    creator_child_id: Option<ChildId>,
    url: Url,
    referrer: Referrer,
    size: Size,
}

pub struct PrerenderManager {
    state: Rc<ManagerState>,
    tracker: Arc<PrerenderTracker>,
    host: Rc<dyn HostEnvironment>,
    memory: Arc<dyn MemorySampler>,
    active: Vec<PrerenderData>,
}

impl PrerenderManager {
    pub fn new(
        config: PrerenderConfig,
        mode: PrerenderMode,
        host: Rc<dyn HostEnvironment>,
        memory: Arc<dyn MemorySampler>,
    ) -> BrowserResult<Self> {
        config.validate()?;
        info!(?mode, max_concurrency = config.max_concurrency, "prerender manager ready");
        Ok(Self {
            state: Rc::new(ManagerState::new(config, mode)),
            tracker: Arc::new(PrerenderTracker::new()),
            host,
            memory,
            active: Vec::new(),
        })
    }

    pub fn config(&self) -> &PrerenderConfig {
        &self.state.config
    }

    pub fn mode(&self) -> PrerenderMode {
        self.state.mode
    }

    /// The tracker shared with threads that may cancel prerenders.
    pub fn tracker(&self) -> &Arc<PrerenderTracker> {
        &self.tracker
    }

    /// Prerenders a `<link rel=prerender>` target found by the page at
    /// `creator`.
    ///
    /// A page that is itself prerendering cannot start prerenders. The
    /// request is parked on it instead and started only if that page is
    /// swapped in, so the returned handle stays pending until then.
    pub fn add_prerender_from_link_rel_prerender(
        &mut self,
        creator: GlobalRouteId,
        url: Url,
        referrer: Referrer,
        size: Size,
        namespace: &Arc<SessionStorageNamespace>,
    ) -> Option<Arc<PrerenderHandle>> {
        let parent = self
            .active
            .iter_mut()
            .find(|data| data.contents.global_route_id() == Some(creator));
        if let Some(parent) = parent {
            let handle = PrerenderHandle::pending();
            debug!(%url, %creator, "deferring prerender requested by a prerender");
            parent.contents.add_pending_prerender(PendingPrerenderInfo {
                weak_handle: Arc::downgrade(&handle),
                origin: Origin::LinkRelPrerender,
                url,
                referrer,
                size,
            });
            return Some(handle);
        }

        self.add_prerender(
            AddRequest {
                origin: Origin::LinkRelPrerender,
                creator_child_id: Some(creator.child_id),
                url,
                referrer,
                size,
            },
            namespace,
            PrerenderHandle::pending(),
        )
    }

    pub fn add_prerender_from_omnibox(
        &mut self,
        url: Url,
        namespace: &Arc<SessionStorageNamespace>,
    ) -> Option<Arc<PrerenderHandle>> {
        self.add_browser_prerender(Origin::Omnibox, url, namespace)
    }

    pub fn add_prerender_from_local_predictor(
        &mut self,
        url: Url,
        namespace: &Arc<SessionStorageNamespace>,
    ) -> Option<Arc<PrerenderHandle>> {
        self.add_browser_prerender(Origin::LocalPredictor, url, namespace)
    }

    fn add_browser_prerender(
        &mut self,
        origin: Origin,
        url: Url,
        namespace: &Arc<SessionStorageNamespace>,
    ) -> Option<Arc<PrerenderHandle>> {
        self.add_prerender(
            AddRequest {
                origin,
                creator_child_id: None,
                url,
                referrer: Referrer::default(),
                size: Size::default(),
            },
            namespace,
            PrerenderHandle::pending(),
        )
    }

    fn add_prerender(
        &mut self,
        request: AddRequest,
        namespace: &Arc<SessionStorageNamespace>,
        handle: Arc<PrerenderHandle>,
    ) -> Option<Arc<PrerenderHandle>> {
        let now = Instant::now();
        self.reap(now);

        let duplicate = self
            .active
            .iter_mut()
            .find(|data| data.contents.matches(&request.url, Some(namespace)));
        if let Some(data) = duplicate {
            data.handle_count += 1;
            handle.attach(&mut data.contents);
            debug!(
                url = %request.url,
                handles = data.handle_count,
                "prerender request joined an existing prerender"
            );
            return Some(handle);
        }

        let mut contents = PrerenderContents::new(
            self.context(),
            PrerenderRequest {
                url: request.url,
                referrer: request.referrer,
                origin: request.origin,
                experiment_id: 0,
            },
        );
        if !contents.init() {
            drop(contents);
            self.settle();
            return None;
        }
        *self
            .state
            .stats
            .borrow_mut()
            .started
            .entry(request.origin.as_str())
            .or_default() += 1;

        handle.attach(&mut contents);
        let size = if request.size.is_empty() {
            DEFAULT_VIEWPORT
        } else {
            request.size
        };
        contents.start_prerendering(
            request.creator_child_id.unwrap_or(ChildId::BROWSER),
            size,
            namespace,
        );
        self.active.push(PrerenderData {
            contents,
            handle_count: 1,
            expiry: now + self.state.config.time_to_live,
        });
        self.settle();
        self.evict_excess();
        Some(handle)
    }

    fn evict_excess(&mut self) {
        while self.active.len() > self.state.config.max_concurrency {
            let before = self.active.len();
            if let Some(oldest) = self.active.first_mut() {
                oldest.contents.destroy(FinalStatus::Evicted);
            }
            self.settle();
            if self.active.len() >= before {
                warn!(active = before, "eviction made no progress");
                break;
            }
        }
    }

    /// Swaps in the prerender matching `url` for a tab using `namespace`.
    ///
    /// Returns the hidden session to show in place of the tab's own load, or
    /// `None` when no prerender can be used. Navigations recorded while the
    /// prerender was hidden are replayed into `history`.
    pub fn maybe_use_prerendered_page(
        &mut self,
        url: &Url,
        namespace: &SessionStorageNamespace,
        history: &mut dyn HistoryStore,
    ) -> Option<Box<dyn HiddenSession>> {
        self.reap(Instant::now());

        let index = self
            .active
            .iter()
            .position(|data| data.contents.matches(url, Some(namespace)))?;

        if self.active[index].contents.hidden_session().is_none() {
            let mut data = self.active.remove(index);
            debug!(%url, "matched a prerender that never loaded");
            data.contents.set_final_status(FinalStatus::WouldHaveBeenUsed);
            drop(data);
            self.settle();
            return None;
        }

        if self.active[index].contents.is_cross_site_navigation_pending() {
            debug!(%url, "prerender is mid cross-site navigation; not swapping in");
            return None;
        }

        let route = self.active[index].contents.global_route_id()?;
        if !self.tracker.try_use(route) {
            // Lost to a cancellation on another thread; adopt its status.
            self.active[index].contents.destroy(FinalStatus::Cancelled);
            self.settle();
            return None;
        }

        let mut data = self.active.remove(index);
        if data.handle_count > 1 {
            let replacement = data.contents.create_match_complete_replacement();
            self.active.push(PrerenderData {
                contents: replacement,
                handle_count: data.handle_count,
                expiry: data.expiry,
            });
        }

        let mut contents = data.contents;
        contents.set_final_status(FinalStatus::Used);
        contents.prepare_for_use();
        contents.commit_history(history);
        self.state.add_to_history(&contents);
        let session = contents.release_prerender_contents();
        info!(
            url = %contents.prerender_url(),
            %route,
            replayed = contents.recorded_navigation_count(),
            "prerender swapped in"
        );
        drop(contents);
        self.settle();
        session
    }

    /// Remembers a real navigation for the recently-visited check.
    pub fn record_navigation(&self, url: Url) {
        self.record_navigation_at(url, Instant::now());
    }

    pub(crate) fn record_navigation_at(&self, url: Url, at: Instant) {
        self.state.record_navigation_at(url, at);
    }

    /// Enforces the memory ceiling and expires prerenders past their
    /// time to live.
    pub fn periodic_cleanup(&mut self) {
        self.cleanup_at(Instant::now());
    }

    pub(crate) fn cleanup_at(&mut self, now: Instant) {
        for data in &mut self.active {
            data.contents.destroy_when_using_too_many_resources();
        }
        self.settle();
        self.reap(now);
    }

    /// Finishes prerenders cancelled off-thread and those that outlived
    /// their expiry.
    fn reap(&mut self, now: Instant) {
        let tracker = &self.tracker;
        for data in &mut self.active {
            let Some(route) = data.contents.global_route_id() else {
                continue;
            };
            match tracker.final_status(route) {
                Some(FinalStatus::Used) | None => {}
                Some(status) => data.contents.destroy(status),
            }
        }
        self.settle();

        for data in &mut self.active {
            if data.expiry <= now {
                data.contents.destroy(FinalStatus::TimedOut);
            }
        }
        self.settle();
    }

    /// Drops one requester's interest. The prerender is cancelled once no
    /// handle remains.
    pub fn cancel_handle(&mut self, handle: &Arc<PrerenderHandle>) {
        let Some(prerender_id) = handle.prerender_id() else {
            return;
        };
        let Some(data) = self
            .active
            .iter_mut()
            .find(|data| data.contents.id() == prerender_id)
        else {
            return;
        };
        data.handle_count = data.handle_count.saturating_sub(1);
        if data.handle_count == 0 {
            data.contents.destroy(FinalStatus::Cancelled);
        } else {
            let observer: Arc<dyn PrerenderObserver> = handle.clone();
            data.contents.remove_observer(&observer);
        }
        self.settle();
    }

    pub fn destroy_all(&mut self, final_status: FinalStatus) {
        while !self.active.is_empty() {
            let before = self.active.len();
            for data in &mut self.active {
                data.contents.destroy(final_status);
            }
            self.settle();
            if self.active.len() >= before {
                warn!(
                    active = before,
                    status = final_status.as_str(),
                    "prerenders survived destroy_all"
                );
                break;
            }
        }
    }

    pub fn clear_data(&mut self, what: ClearData) {
        if matches!(what, ClearData::Contents | ClearData::All) {
            self.destroy_all(FinalStatus::CacheOrHistoryCleared);
        }
        if matches!(what, ClearData::History | ClearData::All) {
            self.state.history.borrow_mut().clear();
        }
    }

    /// Routes a renderer message to the prerender living in `child_id`.
    /// Returns false when no prerender consumed it.
    pub fn handle_message(&mut self, child_id: ChildId, message: &PrerenderMessage) -> bool {
        let PrerenderMessage::CancelForPrinting { routing_id } = message else {
            return false;
        };
        let route = GlobalRouteId::new(child_id, *routing_id);
        self.with_contents_for_route(route, |contents| contents.handle_message(message))
            .unwrap_or(false)
    }

    /// Runs `f` on the prerender whose main view is `route`, then applies
    /// whatever it asked of the manager.
    pub fn with_contents_for_route<R>(
        &mut self,
        route: GlobalRouteId,
        f: impl FnOnce(&mut PrerenderContents) -> R,
    ) -> Option<R> {
        let data = self
            .active
            .iter_mut()
            .find(|data| data.contents.global_route_id() == Some(route))?;
        let result = f(&mut data.contents);
        self.settle();
        Some(result)
    }

    pub fn find(
        &self,
        url: &Url,
        namespace: Option<&SessionStorageNamespace>,
    ) -> Option<&PrerenderContents> {
        self.active
            .iter()
            .map(|data| &data.contents)
            .find(|contents| contents.matches(url, namespace))
    }

    pub fn find_by_id(&self, prerender_id: PrerenderId) -> Option<&PrerenderContents> {
        self.active
            .iter()
            .map(|data| &data.contents)
            .find(|contents| contents.id() == prerender_id)
    }

    pub fn active_count(&self) -> usize {
        self.active.len()
    }

    /// Routes of prerenders that own a hidden session.
    pub fn active_routes(&self) -> Vec<GlobalRouteId> {
        self.active
            .iter()
            .filter_map(|data| data.contents.global_route_id())
            .collect()
    }

    pub fn snapshots(&self) -> Vec<PrerenderSnapshot> {
        self.active
            .iter()
            .filter_map(|data| data.contents.as_value())
            .collect()
    }

    pub fn history(&self) -> Vec<PrerenderHistoryEntry> {
        self.state.history.borrow().iter().cloned().collect()
    }

    pub fn stats(&self) -> PrerenderStats {
        self.state.stats.borrow().clone()
    }

    fn context(&self) -> PrerenderContext {
        let manager: Rc<dyn PrerenderManagerDelegate> = self.state.clone();
        PrerenderContext {
            manager,
            tracker: Arc::clone(&self.tracker),
            host: Rc::clone(&self.host),
            memory: Arc::clone(&self.memory),
        }
    }

    /// Applies the deletions, replacements and deferred starts queued by
    /// prerenders since the last call.
    fn settle(&mut self) {
        while self.state.has_queued_work() {
            let replacements = std::mem::take(&mut *self.state.replacements.borrow_mut());
            for (replaced, replacement) in replacements {
                match self
                    .active
                    .iter()
                    .position(|data| data.contents.id() == replaced)
                {
                    Some(index) => {
                        let finished =
                            std::mem::replace(&mut self.active[index].contents, replacement);
                        drop(finished);
                    }
                    None => self.active.push(PrerenderData {
                        contents: replacement,
                        handle_count: 1,
                        expiry: Instant::now() + self.state.config.time_to_live,
                    }),
                }
            }

            let deletes = std::mem::take(&mut *self.state.pending_deletes.borrow_mut());
            if !deletes.is_empty() {
                self.active
                    .retain(|data| !deletes.contains(&data.contents.id()));
            }

            let starts = std::mem::take(&mut *self.state.pending_starts.borrow_mut());
            for start in starts {
                self.start_deferred(start);
            }
        }
    }

    fn start_deferred(&mut self, start: PendingStart) {
        let Some(namespace) = start.namespace else {
            debug!(
                count = start.pending.len(),
                "swapped-in prerender had no namespace; dropping its child prerenders"
            );
            return;
        };
        for info in start.pending {
            let Some(handle) = info.handle() else {
                debug!(url = %info.url, "deferred prerender abandoned by its requester");
                continue;
            };
            self.add_prerender(
                AddRequest {
                    origin: info.origin,
                    creator_child_id: start.creator_child_id,
                    url: info.url,
                    referrer: info.referrer,
                    size: info.size,
                },
                &namespace,
                handle,
            );
        }
    }
}

impl Drop for PrerenderManager {
    fn drop(&mut self) {
        self.destroy_all(FinalStatus::ManagerShutdown);
    }
}

impl std::fmt::Debug for PrerenderManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PrerenderManager")
            .field("mode", &self.state.mode)
            .field("active", &self.active.len())
            .field("tracked", &self.tracker.tracked_count())
            .finish_non_exhaustive()
    }
}
