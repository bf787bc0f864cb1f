//! Prerender policy knobs.

use pd_core::BrowserError;
use pd_core::BrowserResult;
use std::time::Duration;

const DEFAULT_MAX_BYTES: u64 = 150 * 1024 * 1024;
const DEFAULT_MAX_CONCURRENCY: usize = 3;
const DEFAULT_TIME_TO_LIVE: Duration = Duration::from_secs(300);

/// Read-only policy snapshot consulted by every prerender.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PrerenderConfig {
    pub https_allowed: bool,
    /// Private memory ceiling for a prerender's render process.
    pub max_bytes: u64,
    pub max_concurrency: usize,
    pub time_to_live: Duration,
    pub user_agent_override: String,
    pub is_overriding_user_agent: bool,
    /// Treat every local-predictor prerender as a control-group member.
    pub local_predictor_always_control: bool,
}

impl Default for PrerenderConfig {
    fn default() -> Self {
        Self {
            https_allowed: true,
            max_bytes: DEFAULT_MAX_BYTES,
            max_concurrency: DEFAULT_MAX_CONCURRENCY,
            time_to_live: DEFAULT_TIME_TO_LIVE,
            user_agent_override: String::new(),
            is_overriding_user_agent: false,
            local_predictor_always_control: false,
        }
    }
}

impl PrerenderConfig {
    pub fn validate(&self) -> BrowserResult<()> {
        if self.max_bytes == 0 {
            return Err(BrowserError::new(
                "prerender.config.max_bytes_invalid",
                "max_bytes must be greater than zero",
            ));
        }

        if self.max_concurrency == 0 {
            return Err(BrowserError::new(
                "prerender.config.max_concurrency_invalid",
                "max_concurrency must be greater than zero",
            ));
        }

        if self.time_to_live.is_zero() {
            return Err(BrowserError::new(
                "prerender.config.time_to_live_invalid",
                "time_to_live must be non-zero",
            ));
        }

        if self.is_overriding_user_agent && self.user_agent_override.trim().is_empty() {
            return Err(BrowserError::new(
                "prerender.config.user_agent_missing",
                "user agent override is enabled but no user agent was given",
            ));
        }

        Ok(())
    }
}
