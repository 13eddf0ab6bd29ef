//! Rate-limit window state

use serde::{Deserialize, Serialize};

/// A `{limit, window}` pair from configuration
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RateLimitRule {
    /// Requests allowed per window
    pub limit: u32,
    /// Window length in milliseconds
    pub window_duration_ms: u64,
}

/// Fixed-window counter for one endpoint key
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RateLimitWindow {
    /// Normalized endpoint key
    pub endpoint_key: String,
    /// Start of the current window, ms since epoch
    pub window_start: u64,
    /// Requests admitted in the current window
    pub count: u32,
    /// Requests allowed per window
    pub limit: u32,
    /// Window length in milliseconds
    pub window_duration_ms: u64,
}

impl RateLimitWindow {
    /// Empty window opening at `now_ms`
    pub fn open(endpoint_key: impl Into<String>, rule: RateLimitRule, now_ms: u64) -> Self {
        Self {
            endpoint_key: endpoint_key.into(),
            window_start: now_ms,
            count: 0,
            limit: rule.limit,
            window_duration_ms: rule.window_duration_ms,
        }
    }

    /// End of the current window
    pub fn window_end(&self) -> u64 {
        self.window_start.saturating_add(self.window_duration_ms)
    }

    /// Whether `now_ms` has reached the end of the current window
    pub fn has_elapsed(&self, now_ms: u64) -> bool {
        now_ms >= self.window_end()
    }
}
