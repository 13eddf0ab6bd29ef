//! Configuration loading and gateway construction shared by the commands

use std::path::Path;
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use serde::Serialize;
use syncgate::{ConnectivityMonitor, GatewayEffects, RequestGateway, RetryScheduler, ScanTrigger};
use syncgate_core::GatewayConfig;
use syncgate_effects::{
    FilesystemStorageHandler, HttpTransportHandler, RealRandomHandler, RealTimeHandler,
};
use tracing::{info, warn};

/// Load `path`, falling back to defaults when it is missing and not
/// `required`
pub fn load_config(path: &Path, required: bool) -> Result<GatewayConfig> {
    if path.exists() {
        let config = GatewayConfig::load_from_file(path)
            .with_context(|| format!("loading {}", path.display()))?;
        info!(path = %path.display(), "Configuration loaded");
        return Ok(config);
    }
    if required {
        bail!("config file not found: {}", path.display());
    }
    warn!(path = %path.display(), "Config file not found, using defaults");
    let config = GatewayConfig::default();
    config.validate()?;
    Ok(config)
}

/// Gateway over the filesystem store and the HTTP transport
pub async fn open_gateway(config: GatewayConfig, online: bool) -> Result<RequestGateway> {
    let storage = FilesystemStorageHandler::new(config.storage.path.clone())
        .with_context(|| format!("opening store at {}", config.storage.path.display()))?;
    let transport = HttpTransportHandler::new(config.api.origin.clone())?;

    let effects = GatewayEffects {
        time: Arc::new(RealTimeHandler::new()),
        random: Arc::new(RealRandomHandler::new()),
        storage: Arc::new(storage),
        transport: Arc::new(transport),
    };
    let gateway = RequestGateway::open(config, effects, ConnectivityMonitor::new(online)).await?;
    Ok(gateway)
}

/// Print `value` as pretty JSON on stdout
pub fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

/// One flush scan
pub async fn flush(config: GatewayConfig) -> Result<()> {
    let gateway = open_gateway(config, true).await?;
    let report = RetryScheduler::new(gateway)
        .run_once(ScanTrigger::Flush)
        .await?;
    print_json(&report)
}

/// Human-readable overview of a validated configuration
pub fn print_summary(path: &Path, config: &GatewayConfig) {
    println!("=== Configuration OK: {} ===", path.display());
    println!(
        "Origin: {}",
        config.api.origin.as_deref().unwrap_or("(relative paths only)")
    );
    println!("Allowed prefixes: {}", config.api.allowed_prefixes.join(", "));
    println!("Storage: {}", config.storage.path.display());
    println!(
        "Rate limits: {} endpoint rule(s), default {}",
        config.rate_limits.endpoints.len(),
        config.rate_limits.default.map_or_else(
            || "unlimited".to_string(),
            |rule| format!("{}/{}ms", rule.limit, rule.window_duration_ms)
        )
    );
    for (legacy, target) in &config.versioning.mappings {
        println!("Rewrite: {legacy} -> {target}");
    }
    for route in &config.cache.routes {
        println!(
            "Cache: {} {:?} (max {} entries, {}s)",
            route.pattern, route.strategy, route.max_entries, route.max_age_seconds
        );
    }
    println!(
        "Retry: base {}ms, max {}ms, retention {}ms, poll {}ms",
        config.retry.base_delay_ms,
        config.retry.max_delay_ms,
        config.retry.retention_horizon_ms,
        config.retry.poll_interval_ms
    );
}
