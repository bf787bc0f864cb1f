//! In-memory collaborators for driving prerenders in tests.

use crate::config::PrerenderConfig;
use crate::contents::PrerenderContents;
use crate::contents::PrerenderContext;
use crate::contents::PrerenderRequest;
use crate::final_status::FinalStatus;
use crate::final_status::MatchCompleteStatus;
use crate::final_status::Origin;
use crate::host::FrameHost;
use crate::host::HiddenSession;
use crate::host::HostEnvironment;
use crate::host::LoadUrlParams;
use crate::host::Size;
use crate::manager::PendingDelete;
use crate::manager::PendingPrerenderInfo;
use crate::manager::PrerenderHistoryEntry;
use crate::manager::PrerenderId;
use crate::manager::PrerenderManagerDelegate;
use crate::observer::PrerenderObserver;
use crate::resources::MemorySampler;
use crate::tracker::PrerenderTracker;
use parking_lot::Mutex;
use pd_core::ChildId;
use pd_core::GlobalRouteId;
use pd_core::RouteId;
use pd_ipc::PrerenderMessage;
use pd_storage::NamespaceAllocator;
use pd_storage::NamespaceId;
use pd_storage::SessionStorageNamespace;
use std::cell::Cell;
use std::cell::RefCell;
use std::rc::Rc;
use std::sync::Arc;
use std::sync::atomic::AtomicU64;
use std::sync::atomic::Ordering;
use std::time::SystemTime;
use url::Url;

pub(crate) fn url(raw: &str) -> Url {
    Url::parse(raw).unwrap_or_else(|_| unreachable!())
}

pub(crate) type StartedPending = (Option<ChildId>, Vec<Url>, Option<NamespaceId>);

#[derive(Default)]
pub(crate) struct FakeManager {
    config: PrerenderConfig,
    control_group: Cell<bool>,
    replace_on_delete: Cell<bool>,
    visited: RefCell<Vec<Url>>,
    history: RefCell<Vec<PrerenderHistoryEntry>>,
    pending_deletes: RefCell<Vec<(PrerenderId, FinalStatus)>>,
    adopted: RefCell<Vec<(PrerenderId, PrerenderContents)>>,
    started_pending: RefCell<Vec<StartedPending>>,
    cookie_statuses: RefCell<Vec<u8>>,
    final_statuses: RefCell<Vec<(Origin, MatchCompleteStatus, FinalStatus)>>,
}

impl FakeManager {
    pub(crate) fn visit(&self, url: Url) {
        self.visited.borrow_mut().push(url);
    }

    pub(crate) fn set_control_group(&self, control: bool) {
        self.control_group.set(control);
    }

    pub(crate) fn replace_on_delete(&self, replace: bool) {
        self.replace_on_delete.set(replace);
    }

    pub(crate) fn history_len(&self) -> usize {
        self.history.borrow().len()
    }

    pub(crate) fn pending_deletes(&self) -> Vec<(PrerenderId, FinalStatus)> {
        self.pending_deletes.borrow().clone()
    }

    /// `(replaced, replacement)` id pairs in adoption order.
    pub(crate) fn adopted(&self) -> Vec<(PrerenderId, PrerenderId)> {
        self.adopted
            .borrow()
            .iter()
            .map(|(replaced, replacement)| (*replaced, replacement.id()))
            .collect()
    }

    pub(crate) fn started_pending(&self) -> Vec<StartedPending> {
        self.started_pending.borrow().clone()
    }

    pub(crate) fn cookie_statuses(&self) -> Vec<u8> {
        self.cookie_statuses.borrow().clone()
    }

    pub(crate) fn final_statuses(&self) -> Vec<(Origin, MatchCompleteStatus, FinalStatus)> {
        self.final_statuses.borrow().clone()
    }
}

impl PrerenderManagerDelegate for FakeManager {
    fn config(&self) -> &PrerenderConfig {
        &self.config
    }

    fn is_control_group(&self, _experiment_id: u8) -> bool {
        self.control_group.get()
    }

    fn has_recently_been_navigated_to(&self, _origin: Origin, url: &Url) -> bool {
        self.visited.borrow().contains(url)
    }

    fn record_cookie_status(&self, _origin: Origin, _experiment_id: u8, cookie_status: u8) {
        self.cookie_statuses.borrow_mut().push(cookie_status);
    }

    fn record_final_status(
        &self,
        origin: Origin,
        _experiment_id: u8,
        match_complete_status: MatchCompleteStatus,
        final_status: FinalStatus,
    ) {
        self.final_statuses
            .borrow_mut()
            .push((origin, match_complete_status, final_status));
    }

    fn add_to_history(&self, contents: &PrerenderContents) {
        let Some(final_status) = contents.final_status() else {
            return;
        };
        self.history.borrow_mut().push(PrerenderHistoryEntry {
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
        self.pending_deletes
            .borrow_mut()
            .push((contents.id(), final_status));
        if self.replace_on_delete.get() {
            PendingDelete::ReplaceWithMatchComplete
        } else {
            PendingDelete::Delete
        }
    }

    fn adopt_match_complete_replacement(
        &self,
        replaced: PrerenderId,
        replacement: PrerenderContents,
    ) {
        self.adopted.borrow_mut().push((replaced, replacement));
    }

    fn start_pending_prerenders(
        &self,
        creator_child_id: Option<ChildId>,
        pending: Vec<PendingPrerenderInfo>,
        namespace: Option<Arc<SessionStorageNamespace>>,
    ) {
        let urls = pending.into_iter().map(|info| info.url).collect();
        self.started_pending.borrow_mut().push((
            creator_child_id,
            urls,
            namespace.map(|namespace| namespace.id()),
        ));
    }
}

#[derive(Default)]
pub(crate) struct SessionState {
    pub(crate) namespace: Option<Arc<SessionStorageNamespace>>,
    pub(crate) user_agent: Option<String>,
    pub(crate) loads: Vec<LoadUrlParams>,
    pub(crate) sized: Option<Size>,
    pub(crate) resized: Vec<RouteId>,
    pub(crate) hidden: u32,
    pub(crate) entry_count: usize,
    pub(crate) loading: bool,
    pub(crate) cross_site_pending: bool,
    pub(crate) detached: bool,
}

struct FakeSession {
    route: GlobalRouteId,
    state: Rc<RefCell<SessionState>>,
}

impl HiddenSession for FakeSession {
    fn global_route_id(&self) -> GlobalRouteId {
        self.route
    }

    fn process_pid(&self) -> Option<u32> {
        Some(4242)
    }

    fn entry_count(&self) -> usize {
        self.state.borrow().entry_count
    }

    fn is_loading(&self) -> bool {
        self.state.borrow().loading
    }

    fn set_user_agent_override(&mut self, user_agent: &str) {
        self.state.borrow_mut().user_agent = Some(user_agent.to_owned());
    }

    fn load_url(&mut self, params: LoadUrlParams) {
        self.state.borrow_mut().loads.push(params);
    }

    fn size_contents(&mut self, size: Size) {
        self.state.borrow_mut().sized = Some(size);
    }

    fn resize_render_view(&mut self, routing_id: RouteId) {
        self.state.borrow_mut().resized.push(routing_id);
    }

    fn was_hidden(&mut self) {
        self.state.borrow_mut().hidden += 1;
    }

    fn is_cross_site_navigation_pending(&self) -> bool {
        self.state.borrow().cross_site_pending
    }

    fn session_storage_namespace(&self) -> Arc<SessionStorageNamespace> {
        self.state
            .borrow()
            .namespace
            .clone()
            .unwrap_or_else(|| unreachable!())
    }

    fn detach(&mut self) {
        self.state.borrow_mut().detached = true;
    }
}

#[derive(Default)]
pub(crate) struct FakeHost {
    broadcasts: RefCell<Vec<PrerenderMessage>>,
    sessions: RefCell<Vec<Rc<RefCell<SessionState>>>>,
}

impl FakeHost {
    pub(crate) fn broadcasts(&self) -> Vec<PrerenderMessage> {
        self.broadcasts.borrow().clone()
    }

    pub(crate) fn session(&self, index: usize) -> Rc<RefCell<SessionState>> {
        Rc::clone(&self.sessions.borrow()[index])
    }

    pub(crate) fn session_count(&self) -> usize {
        self.sessions.borrow().len()
    }
}

impl HostEnvironment for FakeHost {
    fn create_hidden_session(
        &self,
        namespace: Arc<SessionStorageNamespace>,
        _size: Size,
    ) -> Box<dyn HiddenSession> {
        let mut sessions = self.sessions.borrow_mut();
        let child = i32::try_from(sessions.len()).unwrap_or_else(|_| unreachable!()) + 10;
        let state = Rc::new(RefCell::new(SessionState {
            namespace: Some(namespace),
            entry_count: 1,
            ..SessionState::default()
        }));
        sessions.push(Rc::clone(&state));
        Box::new(FakeSession {
            route: GlobalRouteId::new(ChildId(child), RouteId(1)),
            state,
        })
    }

    fn broadcast_to_render_processes(&self, message: &PrerenderMessage) {
        self.broadcasts.borrow_mut().push(message.clone());
    }
}

pub(crate) struct FakeFrame {
    routing_id: RouteId,
    sent: RefCell<Vec<PrerenderMessage>>,
}

impl FakeFrame {
    pub(crate) fn new(routing_id: RouteId) -> Rc<Self> {
        Rc::new(Self {
            routing_id,
            sent: RefCell::new(Vec::new()),
        })
    }

    pub(crate) fn sent(&self) -> Vec<PrerenderMessage> {
        self.sent.borrow().clone()
    }
}

impl FrameHost for FakeFrame {
    fn routing_id(&self) -> RouteId {
        self.routing_id
    }

    fn send(&self, message: PrerenderMessage) {
        self.sent.borrow_mut().push(message);
    }
}

#[derive(Default)]
pub(crate) struct FakeSampler {
    bytes: AtomicU64,
}

impl FakeSampler {
    pub(crate) fn set(&self, bytes: u64) {
        self.bytes.store(bytes, Ordering::SeqCst);
    }
}

impl MemorySampler for FakeSampler {
    fn private_bytes(&self, _pid: u32) -> Option<u64> {
        Some(self.bytes.load(Ordering::SeqCst))
    }
}

/// Records every notification it receives, optionally into a log shared
/// with sibling observers.
pub(crate) struct RecordingObserver {
    name: Option<&'static str>,
    log: Arc<Mutex<Vec<String>>>,
}

impl RecordingObserver {
    pub(crate) fn new() -> Arc<Self> {
        Arc::new(Self {
            name: None,
            log: Arc::new(Mutex::new(Vec::new())),
        })
    }

    pub(crate) fn named(name: &'static str) -> Arc<Self> {
        Arc::new(Self {
            name: Some(name),
            log: Arc::new(Mutex::new(Vec::new())),
        })
    }

    pub(crate) fn sibling(&self, name: &'static str) -> Arc<Self> {
        Arc::new(Self {
            name: Some(name),
            log: Arc::clone(&self.log),
        })
    }

    pub(crate) fn events(&self) -> Vec<String> {
        self.log.lock().clone()
    }

    fn record(&self, event: &str) {
        let entry = match self.name {
            Some(name) => format!("{name}:{event}"),
            None => event.to_owned(),
        };
        self.log.lock().push(entry);
    }
}

impl PrerenderObserver for RecordingObserver {
    fn on_prerender_start(&self, _contents: &PrerenderContents) {
        self.record("start");
    }

    fn on_prerender_stop_loading(&self, _contents: &PrerenderContents) {
        self.record("stop_loading");
    }

    fn on_prerender_stop(&self, _contents: &PrerenderContents) {
        self.record("stop");
    }

    fn on_prerender_created_match_complete_replacement(
        &self,
        _contents: &PrerenderContents,
        _replacement: &PrerenderContents,
    ) -> bool {
        self.record("replacement");
        false
    }
}

/// One manager, host and tracker wired together.
pub(crate) struct Fixture {
    pub(crate) manager: Rc<FakeManager>,
    pub(crate) host: Rc<FakeHost>,
    pub(crate) tracker: Arc<PrerenderTracker>,
    pub(crate) sampler: Arc<FakeSampler>,
    pub(crate) namespaces: Arc<NamespaceAllocator>,
}

impl Fixture {
    pub(crate) fn new() -> Self {
        Self::with_config(|_| {})
    }

    pub(crate) fn with_config(configure: impl FnOnce(&mut PrerenderConfig)) -> Self {
        let mut config = PrerenderConfig::default();
        configure(&mut config);
        Self {
            manager: Rc::new(FakeManager {
                config,
                ..FakeManager::default()
            }),
            host: Rc::new(FakeHost::default()),
            tracker: Arc::new(PrerenderTracker::new()),
            sampler: Arc::new(FakeSampler::default()),
            namespaces: NamespaceAllocator::new(),
        }
    }

    pub(crate) fn context(&self) -> PrerenderContext {
        let manager: Rc<dyn PrerenderManagerDelegate> = self.manager.clone();
        let host: Rc<dyn HostEnvironment> = self.host.clone();
        let memory: Arc<dyn MemorySampler> = self.sampler.clone();
        PrerenderContext {
            manager,
            tracker: Arc::clone(&self.tracker),
            host,
            memory,
        }
    }

    /// A prerender that has not run its URL checks yet.
    pub(crate) fn unchecked(&self, raw: &str) -> PrerenderContents {
        self.unchecked_with_origin(raw, Origin::LinkRelPrerender)
    }

    fn unchecked_with_origin(&self, raw: &str, origin: Origin) -> PrerenderContents {
        PrerenderContents::new(self.context(), PrerenderRequest::new(url(raw), origin))
    }

    pub(crate) fn contents(&self, raw: &str) -> PrerenderContents {
        let mut contents = self.unchecked(raw);
        assert!(contents.init());
        contents
    }

    pub(crate) fn start(&self, contents: &mut PrerenderContents) -> Arc<SessionStorageNamespace> {
        let namespace = self.namespaces.create();
        contents.start_prerendering(ChildId(1), Size::new(640, 480), &namespace);
        namespace
    }

    pub(crate) fn started(&self, raw: &str) -> (PrerenderContents, Arc<SessionStorageNamespace>) {
        self.started_with_origin(raw, Origin::LinkRelPrerender)
    }

    pub(crate) fn started_with_origin(
        &self,
        raw: &str,
        origin: Origin,
    ) -> (PrerenderContents, Arc<SessionStorageNamespace>) {
        let mut contents = self.unchecked_with_origin(raw, origin);
        assert!(contents.init());
        let namespace = self.start(&mut contents);
        (contents, namespace)
    }
}
