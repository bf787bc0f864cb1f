//! Browser process coordinator for prerendering.
//!
//! [`Browser`] wires a [`PrerenderManager`] to a [`HeadlessHost`] and plays
//! the part of one tab: it requests prerenders, drives their hidden loads,
//! routes renderer messages and swaps a prerender in when the tab navigates
//! to a matching URL.

pub mod host;
pub mod manager;
pub mod process;

pub use host::HeadlessHost;
pub use manager::ClearData;
pub use manager::PrerenderManager;
pub use manager::PrerenderMode;
pub use manager::PrerenderStats;

use pd_core::BrowserResult;
use pd_prerender::HiddenSession;
use pd_prerender::MemorySampler;
use pd_prerender::PrerenderConfig;
use pd_prerender::PrerenderHandle;
use pd_prerender::PrerenderHistoryEntry;
use pd_prerender::PrerenderSnapshot;
use pd_prerender::SystemMemorySampler;
use pd_prerender::host::HistoryAddPageArgs;
use pd_prerender::host::LoadCommittedDetails;
use pd_storage::NamespaceAllocator;
use pd_storage::SessionStorageNamespace;
use serde::Serialize;
use std::rc::Rc;
use std::sync::Arc;
use std::time::SystemTime;
use tracing::debug;
use tracing::info;
use url::Url;

/// How a tab navigation was satisfied.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum NavigationOutcome {
    /// A prerender was swapped in.
    Prerendered,
    /// The tab loaded the page itself.
    Loaded,
}

/// Diagnostic summary printed by the shell/app layer.
#[derive(Debug, Clone, Serialize)]
pub struct BrowserReport {
    pub mode: PrerenderMode,
    pub active: Vec<PrerenderSnapshot>,
    pub history: Vec<PrerenderHistoryEntry>,
    pub stats: PrerenderStats,
    pub tab_history: Vec<String>,
    pub render_processes: usize,
}

/// Browser process top-level orchestration object.
pub struct Browser {
    host: Rc<HeadlessHost>,
    manager: PrerenderManager,
    namespaces: Arc<NamespaceAllocator>,
    tab_namespace: Arc<SessionStorageNamespace>,
    tab_history: Vec<HistoryAddPageArgs>,
    shown: Option<Box<dyn HiddenSession>>,
    handles: Vec<Arc<PrerenderHandle>>,
}

impl Browser {
    pub fn new(config: PrerenderConfig, mode: PrerenderMode) -> BrowserResult<Self> {
        Self::with_sampler(config, mode, Arc::new(SystemMemorySampler::new()))
    }

    pub fn with_sampler(
        config: PrerenderConfig,
        mode: PrerenderMode,
        memory: Arc<dyn MemorySampler>,
    ) -> BrowserResult<Self> {
        let host = Rc::new(HeadlessHost::new());
        let manager = PrerenderManager::new(config, mode, host.clone(), memory)?;
        let namespaces = NamespaceAllocator::new();
        let tab_namespace = namespaces.create();
        Ok(Self {
            host,
            manager,
            namespaces,
            tab_namespace,
            tab_history: Vec::new(),
            shown: None,
            handles: Vec::new(),
        })
    }

    pub fn host(&self) -> &HeadlessHost {
        &self.host
    }

    pub fn manager(&self) -> &PrerenderManager {
        &self.manager
    }

    pub fn manager_mut(&mut self) -> &mut PrerenderManager {
        &mut self.manager
    }

    /// Session storage namespace of the browser's one tab.
    pub fn tab_namespace(&self) -> &Arc<SessionStorageNamespace> {
        &self.tab_namespace
    }

    /// A fresh namespace, as a newly opened tab would get.
    pub fn new_namespace(&self) -> Arc<SessionStorageNamespace> {
        self.namespaces.create()
    }

    /// Prerenders `url` for the tab as if it had been typed.
    pub fn prerender(&mut self, url: Url) -> Option<Arc<PrerenderHandle>> {
        let handle = self
            .manager
            .add_prerender_from_omnibox(url, &self.tab_namespace)?;
        self.handles.push(Arc::clone(&handle));
        Some(handle)
    }

    /// Completes every hidden navigation the host is holding and feeds the
    /// resulting events to the owning prerenders. Returns how many loads
    /// finished.
    pub fn run_pending_loads(&mut self) -> usize {
        let mut finished = 0;
        for (route, params) in self.host.pending_loads() {
            let started = self.manager.with_contents_for_route(route, |contents| {
                contents.did_start_provisional_load_for_frame(true, &params.url);
                !contents.prerendering_has_been_cancelled()
            });
            if started != Some(true) {
                continue;
            }
            if self.host.commit_pending_load(route).is_none() {
                continue;
            }

            let frame = self.host.main_frame(route);
            let url = params.url;
            let loaded = self.manager.with_contents_for_route(route, |contents| {
                if let Some(frame) = frame {
                    contents.render_frame_created(frame);
                }
                let redirects = if contents.alias_urls().contains(&url) {
                    Vec::new()
                } else {
                    vec![url.clone()]
                };
                contents.did_navigate_main_frame(&LoadCommittedDetails { redirects });
                if contents.prerendering_has_been_cancelled() {
                    return false;
                }
                contents.did_navigate(HistoryAddPageArgs {
                    url: url.clone(),
                    time: SystemTime::now(),
                    referrer: params.referrer.url.clone(),
                    redirects: Vec::new(),
                    transition: params.transition,
                    title: None,
                });
                contents.did_finish_load(true);
                contents.did_stop_loading();
                true
            });
            if loaded == Some(true) {
                debug!(%route, %url, "hidden load finished");
                finished += 1;
            }
        }
        finished
    }

    /// Delivers queued renderer messages. Returns how many were consumed.
    pub fn pump_renderer_messages(&mut self) -> usize {
        self.host
            .drain_renderer_messages()
            .into_iter()
            .filter(|(child_id, message)| self.manager.handle_message(*child_id, message))
            .count()
    }

    /// Navigates the tab to `url`, swapping in a matching prerender when
    /// one is ready.
    pub fn navigate(&mut self, url: Url) -> NavigationOutcome {
        let swapped = self.manager.maybe_use_prerendered_page(
            &url,
            &self.tab_namespace,
            &mut self.tab_history,
        );
        let outcome = match swapped {
            Some(session) => {
                self.shown = Some(session);
                NavigationOutcome::Prerendered
            }
            None => {
                self.shown = None;
                self.tab_history.push(HistoryAddPageArgs {
                    url: url.clone(),
                    time: SystemTime::now(),
                    referrer: None,
                    redirects: Vec::new(),
                    transition: pd_prerender::host::TransitionType::Typed,
                    title: None,
                });
                NavigationOutcome::Loaded
            }
        };
        info!(%url, ?outcome, "tab navigated");
        self.manager.record_navigation(url);
        self.handles.retain(|handle| handle.is_prerendering());
        outcome
    }

    /// The swapped-in session the tab is currently showing, if any.
    pub fn shown_session(&self) -> Option<&dyn HiddenSession> {
        self.shown.as_deref()
    }

    pub fn periodic_cleanup(&mut self) {
        self.manager.periodic_cleanup();
    }

    pub fn report(&self) -> BrowserReport {
        BrowserReport {
            mode: self.manager.mode(),
            active: self.manager.snapshots(),
            history: self.manager.history(),
            stats: self.manager.stats(),
            tab_history: self
                .tab_history
                .iter()
                .map(|args| args.url.to_string())
                .collect(),
            render_processes: self.host.process_count(),
        }
    }
}

impl std::fmt::Debug for Browser {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Browser")
            .field("manager", &self.manager)
            .field("tab_history", &self.tab_history.len())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::Browser;
    use super::NavigationOutcome;
    use super::PrerenderMode;
    use pd_ipc::PrerenderMessage;
    use pd_prerender::FinalStatus;
    use pd_prerender::HandlePhase;
    use pd_prerender::MemorySampler;
    use pd_prerender::PrerenderConfig;
    use std::sync::Arc;
    use url::Url;

    struct NoMemory;

    impl MemorySampler for NoMemory {
        fn private_bytes(&self, _pid: u32) -> Option<u64> {
            None
        }
    }

    fn browser(mode: PrerenderMode) -> Browser {
        Browser::with_sampler(PrerenderConfig::default(), mode, Arc::new(NoMemory))
            .unwrap_or_else(|_| unreachable!())
    }

    fn url(raw: &str) -> Url {
        Url::parse(raw).unwrap_or_else(|_| unreachable!())
    }

    #[test]
    fn prerender_loads_then_swaps_in() {
        let mut browser = browser(PrerenderMode::Enabled);
        let handle = browser
            .prerender(url("https://a.com/"))
            .unwrap_or_else(|| unreachable!());
        assert_eq!(handle.phase(), HandlePhase::Loading);

        assert_eq!(browser.run_pending_loads(), 1);
        assert_eq!(handle.phase(), HandlePhase::Loaded);
        let report = browser.report();
        assert_eq!(report.active.len(), 1);
        assert!(report.active[0].is_loaded);

        assert_eq!(
            browser.navigate(url("https://a.com/")),
            NavigationOutcome::Prerendered
        );
        assert!(browser.shown_session().is_some());
        let report = browser.report();
        assert!(report.active.is_empty());
        assert_eq!(report.tab_history, vec!["https://a.com/".to_owned()]);
        assert_eq!(report.stats.final_status.get("used"), Some(&1));
    }

    #[test]
    fn frames_learn_they_stopped_prerendering() {
        let mut browser = browser(PrerenderMode::Enabled);
        browser.prerender(url("https://a.com/"));
        browser.run_pending_loads();
        let route = browser.manager().active_routes()[0];
        let process = browser
            .host()
            .process(route.child_id)
            .unwrap_or_else(|| unreachable!());
        let renderer = process.renderer();
        let before = renderer.drain().unwrap_or_else(|_| unreachable!());
        assert!(before.contains(&PrerenderMessage::SetIsPrerendering {
            routing_id: route.route_id,
            is_prerendering: true,
        }));

        browser.navigate(url("https://a.com/"));

        let after = renderer.drain().unwrap_or_else(|_| unreachable!());
        assert!(after.contains(&PrerenderMessage::SetIsPrerendering {
            routing_id: route.route_id,
            is_prerendering: false,
        }));
    }

    #[test]
    fn unmatched_navigation_loads_normally_and_blocks_prerender() {
        let mut browser = browser(PrerenderMode::Enabled);
        assert_eq!(
            browser.navigate(url("https://b.com/")),
            NavigationOutcome::Loaded
        );
        assert!(browser.shown_session().is_none());

        assert!(browser.prerender(url("https://b.com/")).is_none());
        let stats = browser.report().stats;
        assert_eq!(
            stats.final_status.get(FinalStatus::RecentlyVisited.as_str()),
            Some(&1)
        );
    }

    #[test]
    fn renderer_print_request_cancels_prerender() {
        let mut browser = browser(PrerenderMode::Enabled);
        let handle = browser
            .prerender(url("https://a.com/"))
            .unwrap_or_else(|| unreachable!());
        let route = browser.manager().active_routes()[0];
        let process = browser
            .host()
            .process(route.child_id)
            .unwrap_or_else(|| unreachable!());
        assert!(
            process
                .renderer()
                .send(&PrerenderMessage::CancelForPrinting {
                    routing_id: route.route_id,
                })
                .is_ok()
        );

        assert_eq!(browser.pump_renderer_messages(), 1);
        assert_eq!(handle.phase(), HandlePhase::Stopped);
        assert_eq!(
            browser.navigate(url("https://a.com/")),
            NavigationOutcome::Loaded
        );
        assert_eq!(
            browser.report().history[0].final_status,
            FinalStatus::WindowPrint
        );
    }

    #[test]
    fn https_prerender_refused_when_disallowed() {
        let config = PrerenderConfig {
            https_allowed: false,
            ..PrerenderConfig::default()
        };
        let mut browser = Browser::with_sampler(config, PrerenderMode::Enabled, Arc::new(NoMemory))
            .unwrap_or_else(|_| unreachable!());

        assert!(browser.prerender(url("https://a.com/")).is_none());
        assert!(browser.prerender(url("http://a.com/")).is_some());
        assert_eq!(browser.report().render_processes, 1);
    }

    #[test]
    fn other_tabs_do_not_get_this_tabs_prerender() {
        let mut browser = browser(PrerenderMode::Enabled);
        browser.prerender(url("https://a.com/"));
        let other = browser.new_namespace();

        assert!(browser.manager().find(&url("https://a.com/"), Some(&*other)).is_none());
        assert!(
            browser
                .manager()
                .find(&url("https://a.com/"), Some(&**browser.tab_namespace()))
                .is_some()
        );
    }

    #[test]
    fn report_serializes_to_json() {
        let mut browser = browser(PrerenderMode::ControlGroup);
        browser.prerender(url("https://a.com/"));
        browser.navigate(url("https://a.com/"));

        let json = serde_json::to_value(browser.report()).unwrap_or_else(|_| unreachable!());
        assert_eq!(json["mode"], "control_group");
        assert_eq!(json["stats"]["final_status"]["would_have_been_used"], 1);
        assert_eq!(json["render_processes"], 0);
    }
}
