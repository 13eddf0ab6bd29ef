//! Per-endpoint fixed-window rate limiting
//!
//! Each endpoint key owns an independent [`RateLimitWindow`] behind its own
//! lock, so a burst on one endpoint never delays or throttles another. The
//! map of windows is an advisory cache: the gateway persists windows through
//! the durable store and restores them at startup.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::{Mutex, RwLock};
use syncgate_core::config::RateLimitConfig;
use syncgate_core::{RateLimitRule, RateLimitWindow};
use tracing::debug;

/// Outcome of [`RateLimiter::try_acquire`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RateLimitDecision {
    /// No rule covers the path
    Unlimited,
    /// The request fits in the current window
    Allowed {
        /// Window state after counting this request
        window: RateLimitWindow,
    },
    /// The window is exhausted
    Denied {
        /// Endpoint key whose window is exhausted
        endpoint_key: String,
        /// Whole seconds until the window rolls over, at least 1
        retry_after_seconds: u64,
    },
}

impl RateLimitDecision {
    /// Whether the request may proceed
    pub fn is_allowed(&self) -> bool {
        !matches!(self, Self::Denied { .. })
    }
}

/// Fixed-window counter per endpoint key
#[derive(Debug)]
pub struct RateLimiter {
    /// Configured prefixes, longest first
    prefixes: Vec<(String, RateLimitRule)>,
    default: Option<RateLimitRule>,
    max_tracked: usize,
    windows: RwLock<HashMap<String, Arc<Mutex<RateLimitWindow>>>>,
}

impl RateLimiter {
    /// Build from configuration
    pub fn new(config: &RateLimitConfig) -> Self {
        let mut prefixes: Vec<(String, RateLimitRule)> = config
            .endpoints
            .iter()
            .map(|e| (e.prefix.clone(), e.rule()))
            .collect();
        prefixes.sort_by(|a, b| b.0.len().cmp(&a.0.len()).then_with(|| a.0.cmp(&b.0)));

        Self {
            prefixes,
            default: config.default,
            max_tracked: config.max_tracked_endpoints,
            windows: RwLock::new(HashMap::new()),
        }
    }

    /// Endpoint key and rule for a request path, or `None` when unlimited.
    ///
    /// The longest configured prefix that matches on a segment boundary wins.
    /// Under the default rule the key is the normalized path.
    pub fn resolve(&self, path: &str) -> Option<(String, RateLimitRule)> {
        let path = strip_query(path);
        self.prefixes
            .iter()
            .find(|(prefix, _)| prefix_matches(prefix, path))
            .map(|(prefix, rule)| (prefix.clone(), *rule))
            .or_else(|| self.default.map(|rule| (normalize_endpoint(path), rule)))
    }

    /// Count one request against the endpoint's window
    pub fn try_acquire(&self, path: &str, now_ms: u64) -> RateLimitDecision {
        let Some((endpoint_key, rule)) = self.resolve(path) else {
            return RateLimitDecision::Unlimited;
        };

        let slot = self.window_slot(&endpoint_key, rule, now_ms);
        let mut window = slot.lock();

        // A restored window may predate a config change.
        window.limit = rule.limit;
        window.window_duration_ms = rule.window_duration_ms;

        if window.has_elapsed(now_ms) {
            window.window_start = now_ms;
            window.count = 0;
        }

        if window.count < window.limit {
            window.count += 1;
            RateLimitDecision::Allowed {
                window: window.clone(),
            }
        } else {
            let remaining_ms = window.window_end().saturating_sub(now_ms);
            let retry_after_seconds = remaining_ms.div_ceil(1000).max(1);
            debug!(
                endpoint = %endpoint_key,
                count = window.count,
                limit = window.limit,
                retry_after_seconds,
                "Rate limit window exhausted"
            );
            RateLimitDecision::Denied {
                endpoint_key,
                retry_after_seconds,
            }
        }
    }

    fn window_slot(
        &self,
        endpoint_key: &str,
        rule: RateLimitRule,
        now_ms: u64,
    ) -> Arc<Mutex<RateLimitWindow>> {
        if let Some(slot) = self.windows.read().get(endpoint_key) {
            return Arc::clone(slot);
        }
        let mut windows = self.windows.write();
        Arc::clone(windows.entry(endpoint_key.to_string()).or_insert_with(|| {
            Arc::new(Mutex::new(RateLimitWindow::open(endpoint_key, rule, now_ms)))
        }))
    }

    /// Load previously persisted windows, replacing any in memory
    pub fn restore(&self, restored: impl IntoIterator<Item = RateLimitWindow>) -> usize {
        let mut windows = self.windows.write();
        let mut count = 0;
        for window in restored {
            windows.insert(window.endpoint_key.clone(), Arc::new(Mutex::new(window)));
            count += 1;
        }
        count
    }

    /// Snapshot of one endpoint's window
    pub fn window(&self, endpoint_key: &str) -> Option<RateLimitWindow> {
        self.windows
            .read()
            .get(endpoint_key)
            .map(|slot| slot.lock().clone())
    }

    /// Number of endpoint windows held
    pub fn tracked_endpoints(&self) -> usize {
        self.windows.read().len()
    }

    /// Shrink to `max_tracked_endpoints`, dropping elapsed windows first and
    /// then the oldest. Returns the evicted keys.
    pub fn evict(&self, now_ms: u64) -> Vec<String> {
        let mut windows = self.windows.write();
        if windows.len() <= self.max_tracked {
            return Vec::new();
        }

        let mut candidates: Vec<(bool, u64, String)> = windows
            .iter()
            .map(|(key, slot)| {
                let window = slot.lock();
                (!window.has_elapsed(now_ms), window.window_start, key.clone())
            })
            .collect();
        // Elapsed (false) sorts before live (true), then oldest first.
        candidates.sort();

        let excess = windows.len() - self.max_tracked;
        let evicted: Vec<String> = candidates
            .into_iter()
            .take(excess)
            .map(|(_, _, key)| key)
            .collect();
        for key in &evicted {
            windows.remove(key);
        }
        debug!(evicted = evicted.len(), "Evicted rate-limit windows");
        evicted
    }
}

fn strip_query(path: &str) -> &str {
    path.split(['?', '#']).next().unwrap_or(path)
}

fn prefix_matches(prefix: &str, path: &str) -> bool {
    path.starts_with(prefix)
        && (prefix.ends_with('/')
            || path.len() == prefix.len()
            || path.as_bytes().get(prefix.len()) == Some(&b'/'))
}

/// Logical endpoint for a path: query dropped, trailing slash dropped, and
/// numeric or UUID segments replaced by `:id`
pub fn normalize_endpoint(path: &str) -> String {
    let path = strip_query(path);
    let segments: Vec<&str> = path
        .split('/')
        .filter(|s| !s.is_empty())
        .map(|segment| {
            if is_identifier_segment(segment) {
                ":id"
            } else {
                segment
            }
        })
        .collect();
    format!("/{}", segments.join("/"))
}

fn is_identifier_segment(segment: &str) -> bool {
    segment.bytes().all(|b| b.is_ascii_digit()) || uuid::Uuid::parse_str(segment).is_ok()
}
