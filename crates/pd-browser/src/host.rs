//! A headless host environment.
//!
//! Hidden sessions here never fetch or render anything. Each one gets its own
//! channel-backed render process, records the navigation it was asked to
//! perform and leaves it pending until [`HeadlessHost::commit_pending_load`]
//! completes it, which lets callers drive a prerender through its navigation
//! events deterministically.

use crate::process::ChannelFrameHost;
use crate::process::RenderProcessHost;
use pd_core::ChildId;
use pd_core::GlobalRouteId;
use pd_core::RouteId;
use pd_ipc::PrerenderMessage;
use pd_prerender::FrameHost;
use pd_prerender::HiddenSession;
use pd_prerender::HostEnvironment;
use pd_prerender::Size;
use pd_prerender::host::LoadUrlParams;
use pd_prerender::host::Referrer;
use pd_prerender::host::TransitionType;
use pd_storage::SessionStorageNamespace;
use std::cell::Cell;
use std::cell::RefCell;
use std::rc::Rc;
use std::sync::Arc;
use tracing::debug;
use tracing::warn;
use url::Url;

const MAIN_FRAME_ROUTE: RouteId = RouteId(1);

#[derive(Debug)]
struct SessionRecord {
    route: GlobalRouteId,
    pid: Option<u32>,
    namespace: Arc<SessionStorageNamespace>,
    size: Size,
    user_agent: Option<String>,
    pending_load: Option<LoadUrlParams>,
    committed: Vec<Url>,
    hidden: bool,
    detached: bool,
}

struct HeadlessSession {
    record: Rc<RefCell<SessionRecord>>,
}

impl HiddenSession for HeadlessSession {
    fn global_route_id(&self) -> GlobalRouteId {
        self.record.borrow().route
    }

    fn process_pid(&self) -> Option<u32> {
        self.record.borrow().pid
    }

    fn entry_count(&self) -> usize {
        self.record.borrow().committed.len()
    }

    fn is_loading(&self) -> bool {
        self.record.borrow().pending_load.is_some()
    }

    fn set_user_agent_override(&mut self, user_agent: &str) {
        self.record.borrow_mut().user_agent = Some(user_agent.to_owned());
    }

    fn load_url(&mut self, params: LoadUrlParams) {
        let mut record = self.record.borrow_mut();
        debug!(route = %record.route, url = %params.url, "headless load requested");
        record.pending_load = Some(params);
    }

    fn size_contents(&mut self, size: Size) {
        self.record.borrow_mut().size = size;
    }

    fn resize_render_view(&mut self, routing_id: RouteId) {
        let record = self.record.borrow();
        debug!(route = %record.route, view = routing_id.0, "render view resized");
    }

    fn was_hidden(&mut self) {
        self.record.borrow_mut().hidden = true;
    }

    fn is_cross_site_navigation_pending(&self) -> bool {
        let record = self.record.borrow();
        match (record.committed.last(), record.pending_load.as_ref()) {
            (Some(current), Some(pending)) => current.host_str() != pending.url.host_str(),
            _ => false,
        }
    }

    fn session_storage_namespace(&self) -> Arc<SessionStorageNamespace> {
        Arc::clone(&self.record.borrow().namespace)
    }

    fn detach(&mut self) {
        self.record.borrow_mut().detached = true;
    }
}

/// Hosts hidden sessions without a rendering engine.
pub struct HeadlessHost {
    pid: Option<u32>,
    next_child_id: Cell<i32>,
    processes: RefCell<Vec<Rc<RenderProcessHost>>>,
    sessions: RefCell<Vec<Rc<RefCell<SessionRecord>>>>,
}

impl Default for HeadlessHost {
    fn default() -> Self {
        Self::new()
    }
}

impl HeadlessHost {
    /// Renderers are attributed to the current process for memory sampling.
    pub fn new() -> Self {
        Self::with_pid(Some(std::process::id()))
    }

    pub fn with_pid(pid: Option<u32>) -> Self {
        Self {
            pid,
            next_child_id: Cell::new(ChildId::BROWSER.0 + 1),
            processes: RefCell::new(Vec::new()),
            sessions: RefCell::new(Vec::new()),
        }
    }

    pub fn process_count(&self) -> usize {
        self.processes.borrow().len()
    }

    pub fn process(&self, child_id: ChildId) -> Option<Rc<RenderProcessHost>> {
        self.processes
            .borrow()
            .iter()
            .find(|process| process.child_id() == child_id)
            .cloned()
    }

    /// Frame host for the main frame of the session at `route`.
    pub fn main_frame(&self, route: GlobalRouteId) -> Option<Rc<dyn FrameHost>> {
        let process = self.process(route.child_id)?;
        Some(Rc::new(ChannelFrameHost::new(route.route_id, process)))
    }

    /// Attached sessions with a navigation waiting to commit.
    pub fn pending_loads(&self) -> Vec<(GlobalRouteId, LoadUrlParams)> {
        self.sessions
            .borrow()
            .iter()
            .filter_map(|record| {
                let record = record.borrow();
                if record.detached {
                    return None;
                }
                let params = record.pending_load.clone()?;
                Some((record.route, params))
            })
            .collect()
    }

    /// Commits the pending navigation of the session at `route`.
    pub fn commit_pending_load(&self, route: GlobalRouteId) -> Option<LoadUrlParams> {
        let sessions = self.sessions.borrow();
        let record = sessions
            .iter()
            .find(|record| record.borrow().route == route)?;
        let mut record = record.borrow_mut();
        let params = record.pending_load.take()?;
        record.committed.push(params.url.clone());
        Some(params)
    }

    /// Starts a renderer-initiated navigation in the session at `route`,
    /// as a script assigning `location` would.
    pub fn start_renderer_navigation(&self, route: GlobalRouteId, url: Url) -> bool {
        let sessions = self.sessions.borrow();
        let Some(record) = sessions.iter().find(|record| record.borrow().route == route) else {
            return false;
        };
        let mut record = record.borrow_mut();
        let referrer = record
            .committed
            .last()
            .cloned()
            .map(Referrer::new)
            .unwrap_or_default();
        record.pending_load = Some(LoadUrlParams {
            url,
            referrer,
            transition: TransitionType::Link,
            override_user_agent: record.user_agent.is_some(),
        });
        true
    }

    pub fn is_hidden(&self, route: GlobalRouteId) -> bool {
        self.sessions
            .borrow()
            .iter()
            .any(|record| {
                let record = record.borrow();
                record.route == route && record.hidden
            })
    }

    pub fn user_agent(&self, route: GlobalRouteId) -> Option<String> {
        self.sessions
            .borrow()
            .iter()
            .map(|record| record.borrow())
            .find(|record| record.route == route)
            .and_then(|record| record.user_agent.clone())
    }

    /// Every renderer-to-browser message queued so far, tagged with its
    /// sending process.
    pub fn drain_renderer_messages(&self) -> Vec<(ChildId, PrerenderMessage)> {
        let mut out = Vec::new();
        for process in self.processes.borrow().iter() {
            match process.drain_incoming() {
                Ok(messages) => out.extend(
                    messages
                        .into_iter()
                        .map(|message| (process.child_id(), message)),
                ),
                Err(error) => warn!(
                    child_id = process.child_id().0,
                    %error,
                    "dropping malformed renderer message"
                ),
            }
        }
        out
    }

    fn next_child_id(&self) -> ChildId {
        let id = self.next_child_id.get();
        self.next_child_id.set(id + 1);
        ChildId(id)
    }
}

impl HostEnvironment for HeadlessHost {
    fn create_hidden_session(
        &self,
        namespace: Arc<SessionStorageNamespace>,
        size: Size,
    ) -> Box<dyn HiddenSession> {
        let child_id = self.next_child_id();
        match RenderProcessHost::spawn(child_id, self.pid) {
            Ok(process) => self.processes.borrow_mut().push(Rc::new(process)),
            Err(error) => warn!(child_id = child_id.0, %error, "render process unavailable"),
        }

        let record = Rc::new(RefCell::new(SessionRecord {
            route: GlobalRouteId::new(child_id, MAIN_FRAME_ROUTE),
            pid: self.pid,
            namespace,
            size,
            user_agent: None,
            pending_load: None,
            committed: Vec::new(),
            hidden: false,
            detached: false,
        }));
        self.sessions.borrow_mut().push(Rc::clone(&record));
        Box::new(HeadlessSession { record })
    }

    fn broadcast_to_render_processes(&self, message: &PrerenderMessage) {
        for process in self.processes.borrow().iter() {
            if let Err(error) = process.send(message) {
                warn!(
                    child_id = process.child_id().0,
                    message = message.name(),
                    %error,
                    "broadcast failed"
                );
            }
        }
    }
}
