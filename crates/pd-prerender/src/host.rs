//! The embedding browser as seen from a prerender.
//!
//! A prerender never renders anything itself. It asks a [`HostEnvironment`]
//! for a hidden browsing session and is then driven by navigation and
//! process events the host delivers back into
//! [`PrerenderContents`](crate::PrerenderContents).

use pd_core::GlobalRouteId;
use pd_core::RouteId;
use pd_ipc::PrerenderMessage;
use pd_storage::SessionStorageNamespace;
use std::rc::Rc;
use std::sync::Arc;
use std::time::SystemTime;
use url::Url;

/// Viewport dimensions in device-independent pixels.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Size {
    pub width: u32,
    pub height: u32,
}

impl Size {
    pub fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }

    pub fn is_empty(&self) -> bool {
        self.width == 0 || self.height == 0
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum ReferrerPolicy {
    #[default]
    Default,
    Always,
    Never,
    Origin,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Referrer {
    pub url: Option<Url>,
    pub policy: ReferrerPolicy,
}

impl Referrer {
    pub fn new(url: Url) -> Self {
        Self {
            url: Some(url),
            policy: ReferrerPolicy::Default,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransitionType {
    Link,
    Typed,
}

/// Parameters of the initial navigation issued into a hidden session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoadUrlParams {
    pub url: Url,
    pub referrer: Referrer,
    pub transition: TransitionType,
    pub override_user_agent: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IconType {
    Favicon,
    TouchIcon,
    TouchPrecomposedIcon,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FaviconUrl {
    pub icon_url: Url,
    pub icon_type: IconType,
}

/// A committed main-frame navigation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoadCommittedDetails {
    /// Every URL the navigation passed through, ending with the committed URL.
    pub redirects: Vec<Url>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResourceType {
    MainFrame,
    SubFrame,
    Stylesheet,
    Script,
    Image,
    Other,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResourceRedirectDetails {
    pub resource_type: ResourceType,
    pub new_url: Url,
}

/// One history addition produced by a navigation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HistoryAddPageArgs {
    pub url: Url,
    pub time: SystemTime,
    pub referrer: Option<Url>,
    pub redirects: Vec<Url>,
    pub transition: TransitionType,
    pub title: Option<String>,
}

/// Browser-wide notifications a started prerender subscribes to.
pub enum HostNotification {
    AppTerminating,
    ProfileDestroyed,
    RenderViewHostCreated(Rc<dyn FrameHost>),
}

/// A frame or view living in a render process.
pub trait FrameHost {
    fn routing_id(&self) -> RouteId;
    fn send(&self, message: PrerenderMessage);
}

/// A hidden, fully instantiated browsing session owned by one prerender.
pub trait HiddenSession {
    /// Address of the session's main view.
    fn global_route_id(&self) -> GlobalRouteId;

    /// Operating system pid of the render process, once it has one.
    fn process_pid(&self) -> Option<u32>;

    /// Number of committed navigation entries.
    fn entry_count(&self) -> usize;

    fn is_loading(&self) -> bool;

    fn set_user_agent_override(&mut self, user_agent: &str);

    fn load_url(&mut self, params: LoadUrlParams);

    fn size_contents(&mut self, size: Size);

    fn resize_render_view(&mut self, routing_id: RouteId);

    fn was_hidden(&mut self);

    fn is_cross_site_navigation_pending(&self) -> bool;

    fn session_storage_namespace(&self) -> Arc<SessionStorageNamespace>;

    /// Stops delivering events to the prerender that created the session.
    fn detach(&mut self);
}

/// Services the embedding browser offers to prerenders.
pub trait HostEnvironment {
    fn create_hidden_session(
        &self,
        namespace: Arc<SessionStorageNamespace>,
        size: Size,
    ) -> Box<dyn HiddenSession>;

    /// Sends `message` to every live render process.
    fn broadcast_to_render_processes(&self, message: &PrerenderMessage);
}

/// A tab's real navigation history.
pub trait HistoryStore {
    fn update_history_for_navigation(&mut self, args: &HistoryAddPageArgs);
}

impl HistoryStore for Vec<HistoryAddPageArgs> {
    fn update_history_for_navigation(&mut self, args: &HistoryAddPageArgs) {
        self.push(args.clone());
    }
}
