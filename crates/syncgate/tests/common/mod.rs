//! Shared fixture for gateway integration tests
#![allow(dead_code)]
#![allow(clippy::expect_used)]

use syncgate::{ConnectivityMonitor, GatewayEffects, GatewayEvent, RequestGateway, RetryScheduler};
use syncgate_core::config::{CacheRoute, EndpointRateLimit};
use syncgate_core::{CacheStrategy, GatewayConfig};
use syncgate_testkit::TestEffects;
use tokio::sync::broadcast;

/// Clock reading every harness starts from
pub const START_MS: u64 = 1_700_000_000_000;

/// Rate-limited endpoint in [`test_config`]: 5 requests per minute
pub const REPORTS: &str = "/api/reports";

/// Configuration shared by the integration tests
pub fn test_config() -> GatewayConfig {
    let mut config = GatewayConfig::default();
    config.api.origin = Some("https://api.example.com".to_string());
    config.api.allowed_prefixes = vec!["/api".to_string()];
    config.rate_limits.endpoints.push(EndpointRateLimit {
        prefix: REPORTS.to_string(),
        limit: 5,
        window_duration_ms: 60_000,
    });
    config
        .versioning
        .mappings
        .insert("/api/users".to_string(), "/api/v2/users".to_string());
    config.cache.routes = vec![
        route("/api/reference/*", CacheStrategy::CacheFirst),
        route("/api/users/*", CacheStrategy::NetworkFirst),
        route("/api/feed", CacheStrategy::StaleWhileRevalidate),
        route("/api/search", CacheStrategy::CacheFirst),
    ];
    config
}

fn route(pattern: &str, strategy: CacheStrategy) -> CacheRoute {
    CacheRoute {
        pattern: pattern.to_string(),
        strategy,
        max_entries: 16,
        max_age_seconds: 60,
    }
}

/// Effects bundle backed by the deterministic handlers
pub fn gateway_effects(effects: &TestEffects) -> GatewayEffects {
    GatewayEffects {
        time: effects.time_handler(),
        random: effects.random_handler(),
        storage: effects.storage_handler(),
        transport: effects.transport_handler(),
    }
}

/// Gateway, scheduler and the handlers behind them
pub struct Harness {
    pub effects: TestEffects,
    pub gateway: RequestGateway,
    pub scheduler: RetryScheduler,
}

impl Harness {
    pub async fn new() -> Self {
        Self::with_config(test_config()).await
    }

    pub async fn with_config(config: GatewayConfig) -> Self {
        Self::open(TestEffects::new(7, START_MS), config).await
    }

    /// Open a gateway over existing handlers, as after a restart
    pub async fn open(effects: TestEffects, config: GatewayConfig) -> Self {
        let connectivity = ConnectivityMonitor::new(effects.transport.is_online());
        let gateway = RequestGateway::open(config, gateway_effects(&effects), connectivity)
            .await
            .expect("gateway opens");
        let scheduler = RetryScheduler::new(gateway.clone());
        Self {
            effects,
            gateway,
            scheduler,
        }
    }

    /// Host and network both down
    pub fn go_offline(&self) {
        self.effects.transport.set_online(false);
        self.gateway.connectivity().set_online(false);
    }

    /// Host and network both up
    pub fn go_online(&self) {
        self.effects.transport.set_online(true);
        self.gateway.connectivity().set_online(true);
    }

    /// Host believes it is online but sends fail
    pub fn drop_link(&self) {
        self.effects.transport.set_online(false);
    }

    pub fn restore_link(&self) {
        self.effects.transport.set_online(true);
    }

    pub fn advance_ms(&self, ms: u64) {
        self.effects.time.advance_ms(ms);
    }

    pub fn now_ms(&self) -> u64 {
        self.effects.time.current_ms()
    }
}

/// Every event already published on `rx`
pub fn drain(rx: &mut broadcast::Receiver<GatewayEvent>) -> Vec<GatewayEvent> {
    let mut events = Vec::new();
    while let Ok(event) = rx.try_recv() {
        events.push(event);
    }
    events
}
