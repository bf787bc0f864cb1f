//! The prerender state machine.
//!
//! A [`PrerenderContents`] owns one hidden browsing session and walks it from
//! creation to exactly one terminal [`FinalStatus`]: either it is swapped in
//! (`Used`) or it cancels itself with the reason that made the speculative
//! load unsafe to keep. Once a live route exists, every cancellation goes
//! through the shared [`PrerenderTracker`] so that racing cancellations on
//! other threads agree on a single status.

use crate::alias::AliasSet;
use crate::config::PrerenderConfig;
use crate::cookies::CookieActivityRecorder;
use crate::cookies::CookieEvent;
use crate::final_status::FinalStatus;
use crate::final_status::MatchCompleteStatus;
use crate::final_status::Origin;
use crate::host::FaviconUrl;
use crate::host::FrameHost;
use crate::host::HiddenSession;
use crate::host::HistoryAddPageArgs;
use crate::host::HistoryStore;
use crate::host::HostEnvironment;
use crate::host::HostNotification;
use crate::host::IconType;
use crate::host::LoadCommittedDetails;
use crate::host::LoadUrlParams;
use crate::host::Referrer;
use crate::host::ResourceRedirectDetails;
use crate::host::ResourceType;
use crate::host::Size;
use crate::host::TransitionType;
use crate::manager::PendingDelete;
use crate::manager::PendingPrerenderInfo;
use crate::manager::PrerenderId;
use crate::manager::PrerenderManagerDelegate;
use crate::observer::PrerenderObserver;
use crate::resources::MemorySampler;
use crate::resources::ResourceGuard;
use crate::tracker::PrerenderTracker;
use pd_core::ChildId;
use pd_core::GlobalRouteId;
use pd_core::RouteId;
use pd_ipc::PrerenderMessage;
use pd_storage::NamespaceId;
use pd_storage::SessionStorageNamespace;
use serde::Serialize;
use std::collections::BTreeMap;
use std::rc::Rc;
use std::sync::Arc;
use std::sync::atomic::AtomicU64;
use std::sync::atomic::Ordering;
use std::time::Instant;
use std::time::SystemTime;
use tracing::debug;
use tracing::info;
use tracing::warn;
use url::Url;

static NEXT_PRERENDER_ID: AtomicU64 = AtomicU64::new(1);

/// Collaborators shared by every prerender of one manager.
#[derive(Clone)]
pub struct PrerenderContext {
    pub manager: Rc<dyn PrerenderManagerDelegate>,
    pub tracker: Arc<PrerenderTracker>,
    pub host: Rc<dyn HostEnvironment>,
    pub memory: Arc<dyn MemorySampler>,
}

/// What to prerender and on whose behalf.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PrerenderRequest {
    pub url: Url,
    pub referrer: Referrer,
    pub origin: Origin,
    pub experiment_id: u8,
}

impl PrerenderRequest {
    pub fn new(url: Url, origin: Origin) -> Self {
        Self {
            url,
            referrer: Referrer::default(),
            origin,
            experiment_id: 0,
        }
    }
}

/// Diagnostic view of a live prerender.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PrerenderSnapshot {
    pub url: String,
    /// Whole seconds since the load started.
    pub duration: u64,
    pub is_loaded: bool,
}

pub struct PrerenderContents {
    id: PrerenderId,
    context: PrerenderContext,

    prerender_url: Url,
    referrer: Referrer,
    origin: Origin,
    experiment_id: u8,
    alias_urls: AliasSet,

    prerendering_has_started: bool,
    prerendering_has_been_cancelled: bool,
    final_status: Option<FinalStatus>,
    match_complete_status: MatchCompleteStatus,

    global_route_id: Option<GlobalRouteId>,
    creator_child_id: Option<ChildId>,
    size: Size,
    session_storage_namespace_id: Option<NamespaceId>,
    alias_session_storage_namespace: Option<Arc<SessionStorageNamespace>>,
    hidden_session: Option<Box<dyn HiddenSession>>,

    created_at: Instant,
    load_start_time: Option<Instant>,
    start_time: Option<SystemTime>,
    has_stopped_loading: bool,
    has_finished_loading: bool,
    icon_url: Option<Url>,

    frame_hosts: BTreeMap<RouteId, Rc<dyn FrameHost>>,
    add_page_args: Vec<HistoryAddPageArgs>,
    pending_prerenders: Vec<PendingPrerenderInfo>,
    observers: Vec<Arc<dyn PrerenderObserver>>,
    notifications_registered: bool,

    cookies: CookieActivityRecorder,
    resources: ResourceGuard,
}

impl PrerenderContents {
    /// Creates an unstarted prerender. Call [`init`](Self::init) before use.
    pub fn new(context: PrerenderContext, request: PrerenderRequest) -> Self {
        let resources = ResourceGuard::new(Arc::clone(&context.memory));
        Self {
            id: PrerenderId(NEXT_PRERENDER_ID.fetch_add(1, Ordering::Relaxed)),
            context,
            prerender_url: request.url,
            referrer: request.referrer,
            origin: request.origin,
            experiment_id: request.experiment_id,
            alias_urls: AliasSet::new(),
            prerendering_has_started: false,
            prerendering_has_been_cancelled: false,
            final_status: None,
            match_complete_status: MatchCompleteStatus::Default,
            global_route_id: None,
            creator_child_id: None,
            size: Size::default(),
            session_storage_namespace_id: None,
            alias_session_storage_namespace: None,
            hidden_session: None,
            created_at: Instant::now(),
            load_start_time: None,
            start_time: None,
            has_stopped_loading: false,
            has_finished_loading: false,
            icon_url: None,
            frame_hosts: BTreeMap::new(),
            add_page_args: Vec::new(),
            pending_prerenders: Vec::new(),
            observers: Vec::new(),
            notifications_registered: false,
            cookies: CookieActivityRecorder::default(),
            resources,
        }
    }

    /// Registers the primary URL as the first alias.
    ///
    /// Returns false if the URL is ineligible, in which case the prerender
    /// has already been destroyed.
    pub fn init(&mut self) -> bool {
        let url = self.prerender_url.clone();
        self.add_alias_url(url)
    }

    pub fn id(&self) -> PrerenderId {
        self.id
    }

    pub fn prerender_url(&self) -> &Url {
        &self.prerender_url
    }

    pub fn referrer(&self) -> &Referrer {
        &self.referrer
    }

    pub fn origin(&self) -> Origin {
        self.origin
    }

    pub fn experiment_id(&self) -> u8 {
        self.experiment_id
    }

    pub fn alias_urls(&self) -> &AliasSet {
        &self.alias_urls
    }

    pub fn prerendering_has_started(&self) -> bool {
        self.prerendering_has_started
    }

    pub fn prerendering_has_been_cancelled(&self) -> bool {
        self.prerendering_has_been_cancelled
    }

    pub fn final_status(&self) -> Option<FinalStatus> {
        self.final_status
    }

    pub fn match_complete_status(&self) -> MatchCompleteStatus {
        self.match_complete_status
    }

    /// Route of the hidden session's main view, once it has one.
    pub fn global_route_id(&self) -> Option<GlobalRouteId> {
        self.global_route_id
    }

    pub fn creator_child_id(&self) -> Option<ChildId> {
        self.creator_child_id
    }

    pub fn size(&self) -> Size {
        self.size
    }

    pub fn session_storage_namespace_id(&self) -> Option<NamespaceId> {
        self.session_storage_namespace_id
    }

    pub fn created_at(&self) -> Instant {
        self.created_at
    }

    pub fn load_start_time(&self) -> Option<Instant> {
        self.load_start_time
    }

    pub fn start_time(&self) -> Option<SystemTime> {
        self.start_time
    }

    pub fn has_stopped_loading(&self) -> bool {
        self.has_stopped_loading
    }

    pub fn has_finished_loading(&self) -> bool {
        self.has_finished_loading
    }

    pub fn icon_url(&self) -> Option<&Url> {
        self.icon_url.as_ref()
    }

    pub fn cookie_status(&self) -> u8 {
        self.cookies.status()
    }

    pub fn hidden_session(&self) -> Option<&dyn HiddenSession> {
        self.hidden_session.as_deref()
    }

    fn config(&self) -> &PrerenderConfig {
        self.context.manager.config()
    }

    /// Creates the hidden session and issues the initial navigation.
    ///
    /// Members of the control group, and local-predictor prerenders when
    /// those are forced into control, are marked started but never load.
    pub fn start_prerendering(
        &mut self,
        creator_child_id: ChildId,
        size: Size,
        session_storage_namespace: &Arc<SessionStorageNamespace>,
    ) {
        assert!(!size.is_empty(), "prerender viewport must not be empty");
        assert!(!self.prerendering_has_started, "prerender already started");
        assert!(self.hidden_session.is_none());
        assert!(self.creator_child_id.is_none(), "creator already assigned");
        assert!(self.size.is_empty());
        assert_eq!(
            self.alias_urls.len(),
            1,
            "prerender must start with only its primary URL"
        );

        self.creator_child_id = Some(creator_child_id);
        self.session_storage_namespace_id = Some(session_storage_namespace.id());
        self.size = size;

        assert!(self.load_start_time.is_none());
        self.load_start_time = Some(Instant::now());
        let start_time = SystemTime::now();
        self.start_time = Some(start_time);
        self.cookies.set_start_time(start_time);

        self.prerendering_has_started = true;

        if self.context.manager.is_control_group(self.experiment_id) {
            debug!(url = %self.prerender_url, "control group prerender not loaded");
            return;
        }
        if self.origin == Origin::LocalPredictor && self.config().local_predictor_always_control
        {
            debug!(url = %self.prerender_url, "local predictor prerender forced into control");
            return;
        }

        let alias_namespace = session_storage_namespace.create_alias();
        let mut session = self
            .context
            .host
            .create_hidden_session(Arc::clone(&alias_namespace), size);
        session.size_contents(size);

        let route = session.global_route_id();
        assert!(self.global_route_id.is_none(), "route id already assigned");
        self.global_route_id = Some(route);
        alias_namespace.add_transaction_log_process_id(route.child_id);
        self.alias_session_storage_namespace = Some(alias_namespace);
        self.hidden_session = Some(session);

        let tracker: Arc<dyn PrerenderObserver> = self.context.tracker.clone();
        self.add_observer(tracker);
        self.notify_prerender_start();

        self.notifications_registered = true;

        let user_agent = self.config().user_agent_override.clone();
        let params = LoadUrlParams {
            url: self.prerender_url.clone(),
            referrer: self.referrer.clone(),
            transition: if self.origin.is_typed() {
                TransitionType::Typed
            } else {
                TransitionType::Link
            },
            override_user_agent: self.config().is_overriding_user_agent,
        };
        if let Some(session) = self.hidden_session.as_mut() {
            session.set_user_agent_override(&user_agent);
            session.load_url(params);
        }

        info!(
            url = %self.prerender_url,
            child_id = route.child_id.0,
            route_id = route.route_id.0,
            origin = self.origin.as_str(),
            "prerender started"
        );
    }

    /// Eligibility gate applied to every URL the prerender would load.
    ///
    /// A false return means the prerender has already been destroyed and the
    /// caller must stop handling the triggering event.
    pub fn check_url(&mut self, url: &Url) -> bool {
        let scheme = url.scheme();
        let is_https = scheme == "https";
        if scheme != "http" && !is_https {
            debug_assert_ne!(
                self.match_complete_status,
                MatchCompleteStatus::ReplacementPending
            );
            self.destroy(FinalStatus::UnsupportedScheme);
            return false;
        }
        if is_https && !self.config().https_allowed {
            debug_assert_ne!(
                self.match_complete_status,
                MatchCompleteStatus::ReplacementPending
            );
            self.destroy(FinalStatus::Https);
            return false;
        }
        // Skipped while a replacement is being cloned from a live prerender.
        if self.match_complete_status != MatchCompleteStatus::ReplacementPending
            && self
                .context
                .manager
                .has_recently_been_navigated_to(self.origin, url)
        {
            self.destroy(FinalStatus::RecentlyVisited);
            return false;
        }
        true
    }

    /// Appends `url` to the alias set if it passes [`check_url`](Self::check_url)
    /// and tells every render process about it.
    pub fn add_alias_url(&mut self, url: Url) -> bool {
        if !self.check_url(&url) {
            return false;
        }
        debug!(url = %self.prerender_url, alias = %url, "prerender alias added");
        self.context
            .host
            .broadcast_to_render_processes(&PrerenderMessage::AddAlias { url: url.clone() });
        self.alias_urls.push(url);
        true
    }

    /// True if `url` is one of this prerender's aliases and `namespace`, when
    /// given, is the one the prerender was started in.
    pub fn matches(&self, url: &Url, namespace: Option<&SessionStorageNamespace>) -> bool {
        if let Some(namespace) = namespace {
            if self.session_storage_namespace_id != Some(namespace.id()) {
                return false;
            }
        }
        self.alias_urls.contains(url)
    }

    /// Records the terminal status. Setting it twice is a programming error.
    pub fn set_final_status(&mut self, final_status: FinalStatus) {
        assert!(
            self.final_status.is_none(),
            "final status already set to {:?}",
            self.final_status
        );
        self.final_status = Some(final_status);
    }

    pub(crate) fn set_match_complete_status(&mut self, status: MatchCompleteStatus) {
        self.match_complete_status = status;
    }

    /// Cancels the prerender with `final_status`. Later calls are no-ops.
    ///
    /// Once a route exists the tracker decides the final status: a status
    /// recorded by a racing thread replaces `final_status`.
    pub fn destroy(&mut self, final_status: FinalStatus) {
        assert_ne!(
            final_status,
            FinalStatus::Used,
            "destroy cannot record a used prerender"
        );
        if self.prerendering_has_been_cancelled {
            return;
        }

        let mut final_status = final_status;
        if let Some(route) = self.global_route_id {
            let cancelled = self.context.tracker.try_cancel(route, final_status);
            assert!(cancelled, "tracker refused to cancel prerender at {route}");
            if let Some(recorded) = self.context.tracker.final_status(route) {
                if recorded != final_status {
                    debug!(
                        %route,
                        requested = final_status.as_str(),
                        recorded = recorded.as_str(),
                        "prerender already cancelled elsewhere"
                    );
                }
                final_status = recorded;
            }
        }
        self.set_final_status(final_status);
        self.prerendering_has_been_cancelled = true;

        warn!(
            url = %self.prerender_url,
            status = final_status.as_str(),
            "prerender cancelled"
        );

        let manager = Rc::clone(&self.context.manager);
        manager.add_to_history(self);
        if manager.move_entry_to_pending_delete(self, final_status)
            == PendingDelete::ReplaceWithMatchComplete
        {
            let replacement = self.create_match_complete_replacement();
            manager.adopt_match_complete_replacement(self.id, replacement);
        }

        // Observers that followed a replacement were already moved off this
        // prerender and will not hear it stop.
        if !manager.is_control_group(self.experiment_id)
            && (self.prerendering_has_started
                || self.match_complete_status == MatchCompleteStatus::Replacement)
        {
            self.notify_prerender_stop();
        }
    }

    /// Cancels with `MemoryLimitExceeded` if the render process is over the
    /// configured ceiling. Does nothing without a live process.
    pub fn destroy_when_using_too_many_resources(&mut self) {
        let Some(session) = self.hidden_session.as_deref() else {
            return;
        };
        if !self.resources.is_bound() {
            self.resources.bind(session.process_pid());
        }
        let max_bytes = self.config().max_bytes;
        if self.resources.exceeds(max_bytes) {
            self.destroy(FinalStatus::MemoryLimitExceeded);
        }
    }

    /// Clones this prerender's identity into an unstarted replacement that
    /// answers to the same aliases.
    pub fn create_match_complete_replacement(&mut self) -> PrerenderContents {
        let mut replacement = PrerenderContents::new(
            self.context.clone(),
            PrerenderRequest {
                url: self.prerender_url.clone(),
                referrer: self.referrer.clone(),
                origin: self.origin,
                experiment_id: self.experiment_id,
            },
        );
        replacement.load_start_time = self.load_start_time;
        replacement.session_storage_namespace_id = self.session_storage_namespace_id;
        replacement.set_match_complete_status(MatchCompleteStatus::ReplacementPending);

        let did_init = replacement.init();
        assert!(did_init, "match-complete replacement rejected its own URL");
        assert_eq!(self.alias_urls.first(), replacement.alias_urls.first());
        assert_eq!(replacement.alias_urls.len(), 1);
        replacement.alias_urls.replace_with(&self.alias_urls);
        replacement.set_match_complete_status(MatchCompleteStatus::Replacement);

        debug!(
            url = %self.prerender_url,
            replaced = self.id.0,
            replacement = replacement.id.0,
            "match-complete replacement created"
        );
        self.notify_prerender_created_match_complete_replacement(&mut replacement);
        replacement
    }

    pub fn did_start_provisional_load_for_frame(&mut self, is_main_frame: bool, url: &Url) {
        if !is_main_frame {
            return;
        }
        if !self.check_url(url) {
            return;
        }
        // A script-driven navigation restarts the visible loading progress.
        self.has_stopped_loading = false;
        self.has_finished_loading = false;
    }

    pub fn did_finish_load(&mut self, is_main_frame: bool) {
        if is_main_frame {
            self.has_finished_loading = true;
        }
    }

    pub fn did_stop_loading(&mut self) {
        self.has_stopped_loading = true;
        self.notify_prerender_stop_loading();
    }

    /// A main-frame navigation committed in the hidden session.
    pub fn did_navigate_main_frame(&mut self, details: &LoadCommittedDetails) {
        let entry_count = self
            .hidden_session
            .as_ref()
            .map_or(0, |session| session.entry_count());
        // History merging on swap-in cannot reconcile a second entry.
        if entry_count > 1 {
            self.destroy(FinalStatus::NewNavigationEntry);
            return;
        }
        for url in &details.redirects {
            if !self.add_alias_url(url.clone()) {
                return;
            }
        }
    }

    pub fn did_get_redirect_for_resource_request(&mut self, details: &ResourceRedirectDetails) {
        if details.resource_type != ResourceType::MainFrame {
            return;
        }
        self.check_url(&details.new_url);
    }

    pub fn render_process_gone(&mut self) {
        self.destroy(FinalStatus::RendererCrashed);
    }

    /// Remembers the first plain favicon in `urls`.
    pub fn did_update_favicon_url(&mut self, urls: &[FaviconUrl]) {
        if let Some(favicon) = urls
            .iter()
            .find(|candidate| candidate.icon_type == IconType::Favicon)
        {
            debug!(url = %self.prerender_url, icon = %favicon.icon_url, "prerender favicon");
            self.icon_url = Some(favicon.icon_url.clone());
        }
    }

    /// Tells a new frame it is prerendering before it navigates anywhere.
    pub fn render_frame_created(&mut self, frame: Rc<dyn FrameHost>) {
        let routing_id = frame.routing_id();
        frame.send(PrerenderMessage::SetIsPrerendering {
            routing_id,
            is_prerendering: true,
        });
        self.frame_hosts.insert(routing_id, frame);
    }

    pub fn render_frame_deleted(&mut self, routing_id: RouteId) {
        self.frame_hosts.remove(&routing_id);
    }

    pub fn tracked_frame_count(&self) -> usize {
        self.frame_hosts.len()
    }

    /// Delivers a browser-wide notification. Ignored until the prerender has
    /// a hidden session.
    pub fn observe(&mut self, notification: HostNotification) {
        if !self.notifications_registered {
            return;
        }
        match notification {
            HostNotification::ProfileDestroyed => self.destroy(FinalStatus::ProfileDestroyed),
            HostNotification::AppTerminating => self.destroy(FinalStatus::AppTerminating),
            HostNotification::RenderViewHostCreated(view) => {
                let Some(session) = self.hidden_session.as_mut() else {
                    return;
                };
                let routing_id = view.routing_id();
                view.send(PrerenderMessage::SetIsPrerendering {
                    routing_id,
                    is_prerendering: true,
                });
                // The view must learn its size before it can make itself visible.
                session.resize_render_view(routing_id);
                session.was_hidden();
            }
        }
    }

    pub fn did_navigate(&mut self, args: HistoryAddPageArgs) {
        self.add_page_args.push(args);
    }

    pub fn open_url_from_tab(&mut self, url: &Url) {
        debug!(url = %self.prerender_url, target = %url, "prerender tried to open a url");
        self.destroy(FinalStatus::OpenUrl);
    }

    /// Downloads are never allowed; the prerender is cancelled instead.
    pub fn can_download(&mut self) -> bool {
        self.destroy(FinalStatus::Download);
        false
    }

    pub fn on_go_to_entry_offset(&mut self, _offset: i32) -> bool {
        self.destroy(FinalStatus::GoToEntryOffset);
        false
    }

    pub fn js_out_of_memory(&mut self) {
        self.destroy(FinalStatus::JsOutOfMemory);
    }

    /// Dialogs are always suppressed. The prerender is cancelled so the user
    /// sees the dialog when they navigate for real.
    pub fn should_suppress_dialogs(&mut self) -> bool {
        self.destroy(FinalStatus::JavascriptAlert);
        true
    }

    pub fn register_protocol_handler(&mut self, _protocol: &str, _url: &Url) {
        self.destroy(FinalStatus::RegisterProtocolHandler);
    }

    pub fn size_for_new_render_view(&self) -> Size {
        self.size
    }

    /// Handles a message from the hidden session's renderer. Returns false
    /// for messages a prerender does not consume.
    pub fn handle_message(&mut self, message: &PrerenderMessage) -> bool {
        match message {
            PrerenderMessage::CancelForPrinting { .. } => {
                self.destroy(FinalStatus::WindowPrint);
                true
            }
            _ => false,
        }
    }

    /// Readies a used prerender for swap-in and hands its pending child
    /// prerenders to the manager.
    pub fn prepare_for_use(&mut self) {
        for (routing_id, frame) in std::mem::take(&mut self.frame_hosts) {
            frame.send(PrerenderMessage::SetIsPrerendering {
                routing_id,
                is_prerendering: false,
            });
        }

        self.notify_prerender_stop_loading();
        self.notify_prerender_stop();

        let namespace = self.session_storage_namespace();
        let pending = std::mem::take(&mut self.pending_prerenders);
        info!(
            url = %self.prerender_url,
            pending = pending.len(),
            "prerender prepared for use"
        );
        let child_id = self.global_route_id.map(|route| route.child_id);
        self.context
            .manager
            .start_pending_prerenders(child_id, pending, namespace);
    }

    /// Replays the navigations recorded while hidden, in order.
    pub fn commit_history(&self, history: &mut dyn HistoryStore) {
        for args in &self.add_page_args {
            history.update_history_for_navigation(args);
        }
    }

    pub fn recorded_navigation_count(&self) -> usize {
        self.add_page_args.len()
    }

    /// Detaches and returns the hidden session. The prerender keeps no
    /// reference to it afterwards.
    pub fn release_prerender_contents(&mut self) -> Option<Box<dyn HiddenSession>> {
        let mut session = self.hidden_session.take()?;
        session.detach();
        self.notifications_registered = false;
        if let (Some(namespace), Some(route)) =
            (self.alias_session_storage_namespace.as_ref(), self.global_route_id)
        {
            namespace.remove_transaction_log_process_id(route.child_id);
        }
        Some(session)
    }

    pub fn as_value(&self) -> Option<PrerenderSnapshot> {
        let session = self.hidden_session.as_ref()?;
        let duration = self
            .load_start_time
            .map_or(0, |start| start.elapsed().as_secs());
        Some(PrerenderSnapshot {
            url: self.prerender_url.to_string(),
            duration,
            is_loaded: !session.is_loading(),
        })
    }

    pub fn is_cross_site_navigation_pending(&self) -> bool {
        self.hidden_session
            .as_ref()
            .is_some_and(|session| session.is_cross_site_navigation_pending())
    }

    /// The hidden session's default namespace, while it has a session.
    pub fn session_storage_namespace(&self) -> Option<Arc<SessionStorageNamespace>> {
        self.hidden_session
            .as_ref()
            .map(|session| session.session_storage_namespace())
    }

    pub fn add_pending_prerender(&mut self, info: PendingPrerenderInfo) {
        self.pending_prerenders.push(info);
    }

    pub fn pending_prerender_count(&self) -> usize {
        self.pending_prerenders.len()
    }

    pub fn record_cookie_event(
        &mut self,
        event: CookieEvent,
        is_main_frame_http_request: bool,
        earliest_create_date: SystemTime,
    ) {
        self.cookies
            .record(event, is_main_frame_http_request, earliest_create_date);
    }

    pub fn add_observer(&mut self, observer: Arc<dyn PrerenderObserver>) {
        assert!(
            self.final_status.is_none(),
            "observer added to a finished prerender"
        );
        self.observers.push(observer);
    }

    pub fn remove_observer(&mut self, observer: &Arc<dyn PrerenderObserver>) {
        self.observers
            .retain(|registered| !Arc::ptr_eq(registered, observer));
    }

    pub fn observer_count(&self) -> usize {
        self.observers.len()
    }

    fn notify_prerender_start(&self) {
        assert!(self.final_status.is_none());
        for observer in &self.observers {
            observer.on_prerender_start(self);
        }
    }

    fn notify_prerender_stop_loading(&self) {
        for observer in &self.observers {
            observer.on_prerender_stop_loading(self);
        }
    }

    fn notify_prerender_stop(&mut self) {
        assert!(
            self.final_status.is_some(),
            "prerender stopped without a final status"
        );
        for observer in &self.observers {
            observer.on_prerender_stop(self);
        }
        self.observers.clear();
    }

    fn notify_prerender_created_match_complete_replacement(
        &mut self,
        replacement: &mut PrerenderContents,
    ) {
        let mut followers: Vec<Arc<dyn PrerenderObserver>> = Vec::new();
        for observer in &self.observers {
            if observer.on_prerender_created_match_complete_replacement(self, replacement) {
                followers.push(Arc::clone(observer));
            }
        }
        self.observers
            .retain(|observer| !followers.iter().any(|follower| Arc::ptr_eq(follower, observer)));
        for follower in followers {
            replacement.add_observer(follower);
        }
    }
}

impl Drop for PrerenderContents {
    fn drop(&mut self) {
        match self.final_status {
            Some(final_status) => {
                // Most prerenders end before any meaningful cookie activity.
                if self.prerendering_has_started
                    && matches!(
                        final_status,
                        FinalStatus::Used | FinalStatus::TimedOut | FinalStatus::Cancelled
                    )
                {
                    self.context.manager.record_cookie_status(
                        self.origin,
                        self.experiment_id,
                        self.cookies.status(),
                    );
                }
                self.context.manager.record_final_status(
                    self.origin,
                    self.experiment_id,
                    self.match_complete_status,
                    final_status,
                );
            }
            None => warn!(url = %self.prerender_url, "prerender dropped without a final status"),
        }

        if !self.alias_urls.is_empty() {
            self.context
                .host
                .broadcast_to_render_processes(&PrerenderMessage::RemoveAliases {
                    urls: self.alias_urls.as_slice().to_vec(),
                });
        }
        self.release_prerender_contents();
    }
}

impl std::fmt::Debug for PrerenderContents {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PrerenderContents")
            .field("id", &self.id)
            .field("url", &self.prerender_url.as_str())
            .field("origin", &self.origin)
            .field("started", &self.prerendering_has_started)
            .field("final_status", &self.final_status)
            .field("match_complete_status", &self.match_complete_status)
            .field("global_route_id", &self.global_route_id)
            .finish_non_exhaustive()
    }
}
