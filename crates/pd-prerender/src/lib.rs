//! Speculative page loads: the prerender lifecycle and its cancellation
//! protocol.

pub mod alias;
pub mod config;
pub mod contents;
pub mod cookies;
pub mod final_status;
pub mod handle;
pub mod host;
pub mod manager;
pub mod observer;
pub mod resources;
pub mod tracker;

#[cfg(test)]
mod test_support;

pub use alias::AliasSet;
pub use config::PrerenderConfig;
pub use contents::PrerenderContents;
pub use contents::PrerenderContext;
pub use contents::PrerenderRequest;
pub use contents::PrerenderSnapshot;
pub use cookies::CookieEvent;
pub use final_status::FinalStatus;
pub use final_status::MatchCompleteStatus;
pub use final_status::Origin;
pub use handle::HandlePhase;
pub use handle::PrerenderHandle;
pub use host::FrameHost;
pub use host::HiddenSession;
pub use host::HistoryStore;
pub use host::HostEnvironment;
pub use host::HostNotification;
pub use host::Size;
pub use manager::PendingDelete;
pub use manager::PendingPrerenderInfo;
pub use manager::PrerenderHistoryEntry;
pub use manager::PrerenderId;
pub use manager::PrerenderManagerDelegate;
pub use observer::PrerenderObserver;
pub use resources::MemorySampler;
pub use resources::SystemMemorySampler;
pub use tracker::PrerenderTracker;
