//! Response cache for read requests
//!
//! Routes are glob patterns over the request path, checked in configuration
//! order; the first match decides the strategy and bounds. Each route holds
//! its own LRU of at most `max_entries` successful responses. The cache is
//! process-local: it is an optimization, never a source of truth.

use std::collections::{HashMap, VecDeque};

use parking_lot::Mutex;
use syncgate_core::config::{CacheConfig, CacheRoute};
use syncgate_core::{
    CacheStrategy, GatewayError, GatewayRequest, GatewayResponse, GatewayResult,
};
use tracing::trace;

/// A cached response and when it was stored
#[derive(Debug, Clone, PartialEq)]
pub struct CachedResponse {
    /// Response as received from the network
    pub response: GatewayResponse,
    /// Storage time in ms
    pub stored_at: u64,
}

/// Result of a cache lookup
#[derive(Debug, Clone, PartialEq)]
pub struct CacheLookup {
    /// The entry
    pub entry: CachedResponse,
    /// Age at lookup time in ms
    pub age_ms: u64,
    /// Whether the entry is within the route's `max_age_seconds`
    pub fresh: bool,
    /// Whether the entry is past half its `max_age_seconds`
    pub refresh_due: bool,
}

/// Route chosen for a request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RouteMatch {
    /// Position of the route in configuration
    pub index: usize,
    /// Strategy of the route
    pub strategy: CacheStrategy,
}

#[derive(Debug)]
struct RouteCache {
    route: CacheRoute,
    pattern: glob::Pattern,
    entries: HashMap<String, CachedResponse>,
    access_order: VecDeque<String>,
}

impl RouteCache {
    fn touch(&mut self, key: &str) {
        if let Some(pos) = self.access_order.iter().position(|k| k == key) {
            self.access_order.remove(pos);
        }
        self.access_order.push_back(key.to_string());
    }

    fn max_age_ms(&self) -> u64 {
        self.route.max_age_seconds.saturating_mul(1000)
    }
}

/// Per-route LRU response cache
#[derive(Debug)]
pub struct ResponseCache {
    routes: Vec<Mutex<RouteCache>>,
}

impl ResponseCache {
    /// Build from configuration, compiling every route pattern
    pub fn new(config: &CacheConfig) -> GatewayResult<Self> {
        let routes = config
            .routes
            .iter()
            .map(|route| {
                let pattern = glob::Pattern::new(&route.pattern).map_err(|e| {
                    GatewayError::config(format!("cache pattern '{}': {e}", route.pattern))
                })?;
                Ok(Mutex::new(RouteCache {
                    route: route.clone(),
                    pattern,
                    entries: HashMap::new(),
                    access_order: VecDeque::new(),
                }))
            })
            .collect::<GatewayResult<Vec<_>>>()?;
        Ok(Self { routes })
    }

    /// First route whose pattern matches the path (query ignored)
    pub fn route_for(&self, url: &str) -> Option<RouteMatch> {
        let path = url.split(['?', '#']).next().unwrap_or(url);
        self.routes.iter().enumerate().find_map(|(index, route)| {
            let route = route.lock();
            route.pattern.matches(path).then_some(RouteMatch {
                index,
                strategy: route.route.strategy,
            })
        })
    }

    /// Look up `key` in a route, refreshing its recency
    pub fn get(&self, route: RouteMatch, key: &str, now_ms: u64) -> Option<CacheLookup> {
        let mut cache = self.routes.get(route.index)?.lock();
        let entry = cache.entries.get(key)?.clone();
        cache.touch(key);

        let age_ms = now_ms.saturating_sub(entry.stored_at);
        let max_age_ms = cache.max_age_ms();
        let fresh = age_ms <= max_age_ms;
        let refresh_due = age_ms >= max_age_ms / 2;
        trace!(key, age_ms, fresh, refresh_due, "Cache lookup hit");
        Some(CacheLookup {
            entry,
            age_ms,
            fresh,
            refresh_due,
        })
    }

    /// Store a successful response, evicting least-recently-used entries
    /// beyond the route's `max_entries`. Non-2xx responses are ignored.
    pub fn put(&self, route: RouteMatch, key: &str, response: &GatewayResponse, now_ms: u64) {
        if !response.is_success() {
            return;
        }
        let Some(slot) = self.routes.get(route.index) else {
            return;
        };
        let mut cache = slot.lock();
        cache.entries.insert(
            key.to_string(),
            CachedResponse {
                response: response.clone(),
                stored_at: now_ms,
            },
        );
        cache.touch(key);

        while cache.entries.len() > cache.route.max_entries {
            let Some(oldest) = cache.access_order.pop_front() else {
                break;
            };
            cache.entries.remove(&oldest);
            trace!(key = %oldest, "Evicted cache entry");
        }
    }

    /// Number of entries held by a route
    pub fn len(&self, route: RouteMatch) -> usize {
        self.routes
            .get(route.index)
            .map_or(0, |slot| slot.lock().entries.len())
    }

    /// Whether a route holds no entries
    pub fn is_empty(&self, route: RouteMatch) -> bool {
        self.len(route) == 0
    }
}

/// Cache key for a read request: method and URL, plus a body digest for
/// query-style POSTs
pub fn cache_key(request: &GatewayRequest, url: &str) -> String {
    if request.body.is_empty() {
        format!("{} {url}", request.method)
    } else {
        let digest = blake3::hash(&request.body.to_bytes());
        format!("{} {url}#{}", request.method, digest.to_hex())
    }
}
