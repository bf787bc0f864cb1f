//! Render processes reached over in-memory channels.

use pd_core::BrowserResult;
use pd_core::ChildId;
use pd_core::GlobalRouteId;
use pd_core::RouteId;
use pd_ipc::ChannelConfig;
use pd_ipc::LocalIpcEndpoint;
use pd_ipc::PrerenderMessage;
use pd_ipc::ProcessRole;
use pd_ipc::local_channel_pair;
use pd_prerender::FinalStatus;
use pd_prerender::FrameHost;
use pd_prerender::PrerenderTracker;
use std::rc::Rc;
use std::sync::Arc;
use std::thread;
use std::thread::JoinHandle;
use std::time::Duration;
use tracing::debug;
use tracing::warn;

/// Browser-side handle to one render process.
///
/// Headless renderers run in-process, so the host also keeps the renderer
/// end of the channel and exposes it for the code playing the renderer.
pub struct RenderProcessHost {
    child_id: ChildId,
    pid: Option<u32>,
    browser: LocalIpcEndpoint,
    renderer: LocalIpcEndpoint,
}

impl RenderProcessHost {
    pub fn spawn(child_id: ChildId, pid: Option<u32>) -> BrowserResult<Self> {
        let (browser, renderer) = local_channel_pair(
            ChannelConfig::hardened(ProcessRole::Browser)?,
            ChannelConfig::hardened(ProcessRole::Renderer)?,
        )?;
        debug!(child_id = child_id.0, "render process spawned");
        Ok(Self {
            child_id,
            pid,
            browser,
            renderer,
        })
    }

    pub fn child_id(&self) -> ChildId {
        self.child_id
    }

    pub fn pid(&self) -> Option<u32> {
        self.pid
    }

    /// Sends a browser-to-renderer message.
    pub fn send(&self, message: &PrerenderMessage) -> BrowserResult<()> {
        self.browser.send(message)
    }

    /// Messages the renderer has sent since the last call.
    pub fn drain_incoming(&self) -> BrowserResult<Vec<PrerenderMessage>> {
        self.browser.drain()
    }

    /// The renderer's end of the channel.
    pub fn renderer(&self) -> &LocalIpcEndpoint {
        &self.renderer
    }
}

impl std::fmt::Debug for RenderProcessHost {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RenderProcessHost")
            .field("child_id", &self.child_id)
            .field("pid", &self.pid)
            .finish_non_exhaustive()
    }
}

/// A frame living in a channel-backed render process.
pub struct ChannelFrameHost {
    routing_id: RouteId,
    process: Rc<RenderProcessHost>,
}

impl ChannelFrameHost {
    pub fn new(routing_id: RouteId, process: Rc<RenderProcessHost>) -> Self {
        Self {
            routing_id,
            process,
        }
    }
}

impl FrameHost for ChannelFrameHost {
    fn routing_id(&self) -> RouteId {
        self.routing_id
    }

    fn send(&self, message: PrerenderMessage) {
        if let Err(error) = self.process.send(&message) {
            warn!(
                child_id = self.process.child_id().0,
                route_id = self.routing_id.0,
                message = message.name(),
                %error,
                "frame message dropped"
            );
        }
    }
}

/// Watches `endpoint` on its own thread and cancels print-triggering
/// prerenders through the tracker without waiting for the home thread.
///
/// The thread exits once the channel has been idle for `idle_timeout` or
/// disconnects, returning how many prerenders it cancelled.
pub fn spawn_print_cancellation_watcher(
    tracker: Arc<PrerenderTracker>,
    child_id: ChildId,
    endpoint: LocalIpcEndpoint,
    idle_timeout: Duration,
) -> JoinHandle<usize> {
    thread::spawn(move || {
        let mut cancelled = 0;
        loop {
            let message = match endpoint.recv_timeout(idle_timeout) {
                Ok(message) => message,
                Err(error) => {
                    debug!(child_id = child_id.0, %error, "print watcher stopping");
                    break;
                }
            };
            let PrerenderMessage::CancelForPrinting { routing_id } = message else {
                continue;
            };
            let route = GlobalRouteId::new(child_id, routing_id);
            if tracker.try_cancel(route, FinalStatus::WindowPrint) {
                debug!(%route, "prerender cancelled for printing off the home thread");
                cancelled += 1;
            }
        }
        cancelled
    })
}

#[cfg(test)]
mod tests {
    use super::ChannelFrameHost;
    use super::RenderProcessHost;
    use pd_core::ChildId;
    use pd_core::RouteId;
    use pd_ipc::PrerenderMessage;
    use pd_prerender::FrameHost;
    use std::rc::Rc;
    use std::time::Duration;

    #[test]
    fn frame_messages_reach_the_renderer() {
        let process = RenderProcessHost::spawn(ChildId(4), None);
        assert!(process.is_ok());
        let process = Rc::new(process.unwrap_or_else(|_| unreachable!()));
        let frame = ChannelFrameHost::new(RouteId(2), Rc::clone(&process));

        frame.send(PrerenderMessage::SetIsPrerendering {
            routing_id: frame.routing_id(),
            is_prerendering: true,
        });

        let received = process.renderer().recv_timeout(Duration::from_secs(1));
        assert_eq!(
            received,
            Ok(PrerenderMessage::SetIsPrerendering {
                routing_id: RouteId(2),
                is_prerendering: true,
            })
        );
    }

    #[test]
    fn renderer_messages_are_drained_by_browser() {
        let process = RenderProcessHost::spawn(ChildId(4), Some(99))
            .unwrap_or_else(|_| unreachable!());
        assert_eq!(process.pid(), Some(99));
        let cancel = PrerenderMessage::CancelForPrinting {
            routing_id: RouteId(1),
        };
        assert!(process.renderer().send(&cancel).is_ok());

        assert_eq!(process.drain_incoming(), Ok(vec![cancel]));
        assert_eq!(process.drain_incoming(), Ok(Vec::new()));
    }
}
