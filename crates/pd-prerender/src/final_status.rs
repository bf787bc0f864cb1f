//! Terminal outcomes and classification enums for prerenders.

use serde::Serialize;

/// Terminal outcome of a prerender. Exactly one is recorded per prerender.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FinalStatus {
    Used,
    TimedOut,
    Evicted,
    ManagerShutdown,
    Closed,
    ProfileDestroyed,
    AppTerminating,
    JavascriptAlert,
    Https,
    Download,
    MemoryLimitExceeded,
    JsOutOfMemory,
    TooManyProcesses,
    CacheOrHistoryCleared,
    Cancelled,
    RendererCrashed,
    UnsupportedScheme,
    RecentlyVisited,
    WindowPrint,
    OpenUrl,
    NewNavigationEntry,
    RegisterProtocolHandler,
    GoToEntryOffset,
    WouldHaveBeenUsed,
}

impl FinalStatus {
    pub const ALL: [FinalStatus; 24] = [
        Self::Used,
        Self::TimedOut,
        Self::Evicted,
        Self::ManagerShutdown,
        Self::Closed,
        Self::ProfileDestroyed,
        Self::AppTerminating,
        Self::JavascriptAlert,
        Self::Https,
        Self::Download,
        Self::MemoryLimitExceeded,
        Self::JsOutOfMemory,
        Self::TooManyProcesses,
        Self::CacheOrHistoryCleared,
        Self::Cancelled,
        Self::RendererCrashed,
        Self::UnsupportedScheme,
        Self::RecentlyVisited,
        Self::WindowPrint,
        Self::OpenUrl,
        Self::NewNavigationEntry,
        Self::RegisterProtocolHandler,
        Self::GoToEntryOffset,
        Self::WouldHaveBeenUsed,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Used => "used",
            Self::TimedOut => "timed_out",
            Self::Evicted => "evicted",
            Self::ManagerShutdown => "manager_shutdown",
            Self::Closed => "closed",
            Self::ProfileDestroyed => "profile_destroyed",
            Self::AppTerminating => "app_terminating",
            Self::JavascriptAlert => "javascript_alert",
            Self::Https => "https",
            Self::Download => "download",
            Self::MemoryLimitExceeded => "memory_limit_exceeded",
            Self::JsOutOfMemory => "js_out_of_memory",
            Self::TooManyProcesses => "too_many_processes",
            Self::CacheOrHistoryCleared => "cache_or_history_cleared",
            Self::Cancelled => "cancelled",
            Self::RendererCrashed => "renderer_crashed",
            Self::UnsupportedScheme => "unsupported_scheme",
            Self::RecentlyVisited => "recently_visited",
            Self::WindowPrint => "window_print",
            Self::OpenUrl => "open_url",
            Self::NewNavigationEntry => "new_navigation_entry",
            Self::RegisterProtocolHandler => "register_protocol_handler",
            Self::GoToEntryOffset => "go_to_entry_offset",
            Self::WouldHaveBeenUsed => "would_have_been_used",
        }
    }

    /// Whether a cancellation for this reason could not also have happened
    /// to a control-group prerender, so the match-complete group needs a
    /// stand-in entry to keep the two groups comparable.
    pub fn needs_match_complete_dummy(self) -> bool {
        !matches!(
            self,
            Self::Used
                | Self::TimedOut
                | Self::Evicted
                | Self::ManagerShutdown
                | Self::ProfileDestroyed
                | Self::AppTerminating
                | Self::CacheOrHistoryCleared
                | Self::Cancelled
                | Self::WouldHaveBeenUsed
        )
    }
}

/// What triggered a prerender request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Origin {
    Omnibox,
    Instant,
    LocalPredictor,
    LinkRelPrerender,
    Other,
}

impl Origin {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Omnibox => "omnibox",
            Self::Instant => "instant",
            Self::LocalPredictor => "local_predictor",
            Self::LinkRelPrerender => "link_rel_prerender",
            Self::Other => "other",
        }
    }

    /// Navigations started from typed input are recorded as typed transitions.
    pub fn is_typed(self) -> bool {
        matches!(self, Self::Omnibox | Self::Instant)
    }
}

/// Relationship of a prerender to match-complete accounting.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum MatchCompleteStatus {
    Default,
    ReplacementPending,
    Replacement,
}

#[cfg(test)]
mod tests {
    use super::FinalStatus;
    use super::Origin;
    use std::collections::HashSet;

    #[test]
    fn status_names_are_unique() {
        let names: HashSet<&str> = FinalStatus::ALL.iter().map(|s| s.as_str()).collect();
        assert_eq!(names.len(), FinalStatus::ALL.len());
    }

    #[test]
    fn control_group_reasons_do_not_need_dummy() {
        assert!(!FinalStatus::TimedOut.needs_match_complete_dummy());
        assert!(!FinalStatus::ManagerShutdown.needs_match_complete_dummy());
        assert!(FinalStatus::JavascriptAlert.needs_match_complete_dummy());
        assert!(FinalStatus::RendererCrashed.needs_match_complete_dummy());
    }

    #[test]
    fn typed_origins() {
        assert!(Origin::Omnibox.is_typed());
        assert!(Origin::Instant.is_typed());
        assert!(!Origin::LinkRelPrerender.is_typed());
    }
}
