//! Gateway configuration
//!
//! An immutable value built once at startup and injected into every
//! component. Loaded from TOML; every field has a default, so an empty file
//! is a valid configuration.
//!
//! ```toml
//! [api]
//! origin = "https://api.example.com"
//!
//! [rate_limits]
//! default = { limit = 100, window_duration_ms = 60000 }
//!
//! [[rate_limits.endpoints]]
//! prefix = "/api/reports"
//! limit = 5
//! window_duration_ms = 60000
//!
//! [versioning.mappings]
//! "/api/users" = "/api/v2/users"
//!
//! [[cache.routes]]
//! pattern = "/api/reference/*"
//! strategy = "cache_first"
//! max_entries = 100
//! max_age_seconds = 86400
//! ```

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::errors::{GatewayError, GatewayResult};
use crate::rate_limit::RateLimitRule;

/// Resolve the default storage path.
///
/// Priority:
/// 1. `$SYNCGATE_PATH/.syncgate` if SYNCGATE_PATH is set
/// 2. `~/.syncgate` (home directory)
/// 3. `./.syncgate` (current directory fallback)
pub fn default_storage_path() -> PathBuf {
    std::env::var("SYNCGATE_PATH")
        .ok()
        .map(PathBuf::from)
        .or_else(dirs::home_dir)
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".syncgate")
}

/// Complete gateway configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct GatewayConfig {
    /// Remote API identity
    pub api: ApiConfig,
    /// Timeouts
    pub network: NetworkConfig,
    /// Per-endpoint request budgets
    pub rate_limits: RateLimitConfig,
    /// Legacy path mapping and header names
    pub versioning: VersioningConfig,
    /// Backoff and retention
    pub retry: RetryConfig,
    /// Read caching strategies
    pub cache: CacheConfig,
    /// How the server signals a stale base version
    pub conflicts: ConflictConfig,
    /// Durable storage location
    pub storage: StorageConfig,
}

impl GatewayConfig {
    /// Parse and validate a TOML document
    pub fn from_toml_str(raw: &str) -> GatewayResult<Self> {
        let config: GatewayConfig = toml::from_str(raw)
            .map_err(|e| GatewayError::config(format!("invalid TOML: {e}")))?;
        config.validate()?;
        Ok(config)
    }

    /// Load, parse and validate a TOML file
    pub fn load_from_file(path: &Path) -> GatewayResult<Self> {
        let raw = std::fs::read_to_string(path).map_err(|e| {
            GatewayError::config(format!("failed to read {}: {e}", path.display()))
        })?;
        Self::from_toml_str(&raw)
    }

    /// Reject configurations the gateway cannot run with
    pub fn validate(&self) -> GatewayResult<()> {
        if let Some(origin) = &self.api.origin {
            if !(origin.starts_with("http://") || origin.starts_with("https://")) {
                return Err(GatewayError::config(format!(
                    "api.origin must be an http(s) URL, got '{origin}'"
                )));
            }
        }
        for prefix in &self.api.allowed_prefixes {
            require_path("api.allowed_prefixes", prefix)?;
        }

        if self.network.request_timeout_ms == 0 || self.network.network_first_timeout_ms == 0 {
            return Err(GatewayError::config("network timeouts must be non-zero"));
        }

        if let Some(rule) = &self.rate_limits.default {
            validate_rule("rate_limits.default", rule)?;
        }
        for endpoint in &self.rate_limits.endpoints {
            require_path("rate_limits.endpoints.prefix", &endpoint.prefix)?;
            validate_rule(&endpoint.prefix, &endpoint.rule())?;
        }
        if self.rate_limits.max_tracked_endpoints == 0 {
            return Err(GatewayError::config(
                "rate_limits.max_tracked_endpoints must be non-zero",
            ));
        }

        for (legacy, versioned) in &self.versioning.mappings {
            require_path("versioning.mappings", legacy)?;
            require_path("versioning.mappings", versioned)?;
        }
        if self.versioning.version_header.is_empty() || self.versioning.trace_header.is_empty() {
            return Err(GatewayError::config("versioning header names must be set"));
        }

        let retry = &self.retry;
        if retry.base_delay_ms == 0 {
            return Err(GatewayError::config("retry.base_delay_ms must be non-zero"));
        }
        if retry.max_delay_ms < retry.base_delay_ms {
            return Err(GatewayError::config(
                "retry.max_delay_ms must be at least retry.base_delay_ms",
            ));
        }
        if !(0.0..=1.0).contains(&retry.jitter_ratio) {
            return Err(GatewayError::config("retry.jitter_ratio must be within [0, 1]"));
        }
        if retry.poll_interval_ms == 0 {
            return Err(GatewayError::config("retry.poll_interval_ms must be non-zero"));
        }

        for route in &self.cache.routes {
            glob::Pattern::new(&route.pattern).map_err(|e| {
                GatewayError::config(format!("cache pattern '{}': {e}", route.pattern))
            })?;
            if route.max_entries == 0 {
                return Err(GatewayError::config(format!(
                    "cache route '{}' needs max_entries > 0",
                    route.pattern
                )));
            }
        }

        Ok(())
    }
}

fn require_path(field: &str, value: &str) -> GatewayResult<()> {
    if value.starts_with('/') {
        Ok(())
    } else {
        Err(GatewayError::config(format!(
            "{field}: '{value}' must start with '/'"
        )))
    }
}

fn validate_rule(name: &str, rule: &RateLimitRule) -> GatewayResult<()> {
    if rule.limit == 0 || rule.window_duration_ms == 0 {
        return Err(GatewayError::config(format!(
            "rate limit '{name}' needs limit > 0 and window_duration_ms > 0"
        )));
    }
    Ok(())
}

/// Remote API identity
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ApiConfig {
    /// Scheme and authority of the API. Absolute request URLs must match it.
    pub origin: Option<String>,
    /// Paths the gateway will forward
    pub allowed_prefixes: Vec<String>,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            origin: None,
            allowed_prefixes: vec!["/".to_string()],
        }
    }
}

/// Network timeouts
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NetworkConfig {
    /// Upper bound on any network attempt
    pub request_timeout_ms: u64,
    /// Shorter bound used by the network-first strategy before falling back
    pub network_first_timeout_ms: u64,
}

impl NetworkConfig {
    /// Request timeout as a duration
    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }

    /// Network-first timeout as a duration
    pub fn network_first_timeout(&self) -> Duration {
        Duration::from_millis(self.network_first_timeout_ms)
    }
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            request_timeout_ms: 15_000,
            network_first_timeout_ms: 3_000,
        }
    }
}

/// Rate limit for one path prefix
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EndpointRateLimit {
    /// Path prefix the rule applies to
    pub prefix: String,
    /// Requests allowed per window
    pub limit: u32,
    /// Window length in milliseconds
    pub window_duration_ms: u64,
}

impl EndpointRateLimit {
    /// The `{limit, window}` pair
    pub fn rule(&self) -> RateLimitRule {
        RateLimitRule {
            limit: self.limit,
            window_duration_ms: self.window_duration_ms,
        }
    }
}

/// Rate limiting configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RateLimitConfig {
    /// Applied to endpoints matching no prefix. `None` leaves them unlimited.
    pub default: Option<RateLimitRule>,
    /// Prefix rules; the longest matching prefix wins
    pub endpoints: Vec<EndpointRateLimit>,
    /// Write windows through to the durable store
    pub persist_windows: bool,
    /// Windows kept in memory before idle ones are evicted
    pub max_tracked_endpoints: usize,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            default: None,
            endpoints: Vec::new(),
            persist_windows: true,
            max_tracked_endpoints: 1024,
        }
    }
}

/// Versioning configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct VersioningConfig {
    /// Legacy path (or prefix) to versioned path
    pub mappings: BTreeMap<String, String>,
    /// Header carrying the API version
    pub version_header: String,
    /// Header carrying the per-attempt trace id
    pub trace_header: String,
    /// Version stamped when the path embeds none
    pub default_version: String,
}

impl Default for VersioningConfig {
    fn default() -> Self {
        Self {
            mappings: BTreeMap::new(),
            version_header: "x-api-version".to_string(),
            trace_header: "x-request-id".to_string(),
            default_version: "latest".to_string(),
        }
    }
}

/// Retry and retention configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    /// Delay before the first retry
    pub base_delay_ms: u64,
    /// Cap on any single delay
    pub max_delay_ms: u64,
    /// Uniform jitter as a fraction of the delay
    pub jitter_ratio: f64,
    /// Age after which a pending operation is given up
    pub retention_horizon_ms: u64,
    /// Scheduler wake interval
    pub poll_interval_ms: u64,
    /// How long permanently failed operations are kept for inspection
    pub audit_retention_ms: u64,
}

impl RetryConfig {
    /// Scheduler wake interval as a duration
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            base_delay_ms: 60_000,
            max_delay_ms: 4 * 60 * 60 * 1000,
            jitter_ratio: 0.2,
            retention_horizon_ms: 24 * 60 * 60 * 1000,
            poll_interval_ms: 30_000,
            audit_retention_ms: 7 * 24 * 60 * 60 * 1000,
        }
    }
}

/// How a read is served relative to the cache and the network
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CacheStrategy {
    /// Serve the cache; refresh in the background
    #[serde(alias = "CacheFirst")]
    CacheFirst,
    /// Try the network; fall back to the last good entry
    #[serde(alias = "NetworkFirst")]
    NetworkFirst,
    /// Serve the cache immediately and always refresh in the background
    #[serde(alias = "StaleWhileRevalidate")]
    StaleWhileRevalidate,
}

/// Strategy assignment for one URL pattern
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheRoute {
    /// Glob over the request path (query excluded)
    pub pattern: String,
    /// Strategy for matching reads
    pub strategy: CacheStrategy,
    /// Entry bound for this route
    #[serde(default = "default_max_entries")]
    pub max_entries: usize,
    /// Age after which an entry is no longer served
    #[serde(default = "default_max_age_seconds")]
    pub max_age_seconds: u64,
}

const fn default_max_entries() -> usize {
    50
}

const fn default_max_age_seconds() -> u64 {
    24 * 60 * 60
}

/// Read caching configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    /// Header that tags a POST as a read-only query
    pub query_header: String,
    /// Routes, first match wins
    pub routes: Vec<CacheRoute>,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            query_header: "x-query-operation".to_string(),
            routes: Vec::new(),
        }
    }
}

/// How the server reports a stale base version
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ConflictConfig {
    /// Status code meaning "version mismatch"
    pub status: u16,
    /// Response header whose presence means "version mismatch"
    pub header: String,
    /// Response header carrying the server's version
    pub server_version_header: String,
    /// Request header carrying the client's base version
    pub local_version_header: String,
    /// Request or response header naming the entity type
    pub entity_type_header: String,
}

impl Default for ConflictConfig {
    fn default() -> Self {
        Self {
            status: 409,
            header: "x-version-conflict".to_string(),
            server_version_header: "x-server-version".to_string(),
            local_version_header: "x-entity-version".to_string(),
            entity_type_header: "x-entity-type".to_string(),
        }
    }
}

/// Durable storage location
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// Directory holding the store
    pub path: PathBuf,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            path: default_storage_path(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_document_is_valid() {
        let config = GatewayConfig::from_toml_str("").unwrap();
        assert_eq!(config.network.request_timeout_ms, 15_000);
        assert_eq!(config.retry.base_delay_ms, 60_000);
        assert_eq!(config.retry.max_delay_ms, 14_400_000);
        assert_eq!(config.retry.retention_horizon_ms, 86_400_000);
        assert_eq!(config.versioning.default_version, "latest");
        assert!(config.rate_limits.default.is_none());
    }

    #[test]
    fn test_full_document_parses() {
        let raw = r#"
            [api]
            origin = "https://api.example.com"

            [rate_limits]
            default = { limit = 100, window_duration_ms = 60000 }

            [[rate_limits.endpoints]]
            prefix = "/api/reports"
            limit = 5
            window_duration_ms = 60000

            [versioning.mappings]
            "/api/users" = "/api/v2/users"

            [[cache.routes]]
            pattern = "/api/reference/*"
            strategy = "stale_while_revalidate"

            [[cache.routes]]
            pattern = "/api/users/*"
            strategy = "NetworkFirst"
            max_entries = 10
            max_age_seconds = 60
        "#;
        let config = GatewayConfig::from_toml_str(raw).unwrap();
        assert_eq!(config.rate_limits.endpoints[0].rule().limit, 5);
        assert_eq!(
            config.versioning.mappings.get("/api/users").map(String::as_str),
            Some("/api/v2/users")
        );
        assert_eq!(config.cache.routes[0].strategy, CacheStrategy::StaleWhileRevalidate);
        assert_eq!(config.cache.routes[0].max_entries, 50);
        assert_eq!(config.cache.routes[1].strategy, CacheStrategy::NetworkFirst);
        assert_eq!(config.cache.routes[1].max_age_seconds, 60);
    }

    #[test]
    fn test_validation_rejects_bad_values() {
        let cases = [
            "[retry]\nbase_delay_ms = 0",
            "[retry]\nbase_delay_ms = 10\nmax_delay_ms = 5",
            "[retry]\njitter_ratio = 1.5",
            "[rate_limits]\ndefault = { limit = 0, window_duration_ms = 1000 }",
            "[versioning.mappings]\n\"api/users\" = \"/api/v2/users\"",
            "[[cache.routes]]\npattern = \"/api/[\"\nstrategy = \"cache_first\"",
            "[api]\norigin = \"ftp://example.com\"",
        ];
        for raw in cases {
            let err = GatewayConfig::from_toml_str(raw).unwrap_err();
            assert!(matches!(err, GatewayError::Config { .. }), "{raw}: {err}");
        }
    }

    #[test]
    fn test_load_from_missing_file_is_config_error() {
        let err = GatewayConfig::load_from_file(Path::new("/definitely/not/here.toml")).unwrap_err();
        assert!(matches!(err, GatewayError::Config { .. }));
    }
}
