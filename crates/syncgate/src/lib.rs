//! Syncgate: offline request-synchronization gateway
//!
//! Sits between application code and a remote HTTP API:
//!
//! - [`RequestGateway`]: the façade. Rewrites and versions requests,
//!   enforces per-endpoint rate limits, serves reads through a caching
//!   strategy and queues mutations that cannot be delivered.
//! - [`DurableStore`]: crash-safe tables of queued operations, rate-limit
//!   windows and conflict records over any [`StorageEffects`] backend.
//! - [`RateLimiter`]: fixed-window counters, one per endpoint key.
//! - [`VersionRewriter`]: legacy-to-versioned path mapping and trace stamping.
//! - [`RetryScheduler`]: background re-delivery with exponential backoff,
//!   woken by a poll interval and by the [`ConnectivityMonitor`].
//! - [`EventBus`]: lifecycle events for notification layers.
//!
//! ```rust,no_run
//! # use std::sync::Arc;
//! # use syncgate::{ConnectivityMonitor, GatewayEffects, RequestGateway, RetryScheduler};
//! # use syncgate_core::{GatewayConfig, GatewayRequest};
//! # async fn demo(effects: GatewayEffects) -> syncgate_core::GatewayResult<()> {
//! let gateway = RequestGateway::open(
//!     GatewayConfig::default(),
//!     effects,
//!     ConnectivityMonitor::new(true),
//! )
//! .await?;
//! let scheduler = Arc::new(RetryScheduler::new(gateway.clone())).spawn();
//!
//! let outcome = gateway
//!     .execute(GatewayRequest::post("/api/care-plans", serde_json::json!({"title": "Walk"})))
//!     .await?;
//! println!("status {}", outcome.status());
//!
//! scheduler.shutdown().await;
//! # Ok(())
//! # }
//! ```
//!
//! [`StorageEffects`]: syncgate_core::effects::StorageEffects

#![forbid(unsafe_code)]

pub mod backoff;
pub mod cache;
pub mod connectivity;
pub mod events;
pub mod gateway;
pub mod rate_limit;
pub mod rewrite;
pub mod scheduler;
pub mod store;

pub use backoff::BackoffPolicy;
pub use cache::{CacheLookup, CachedResponse, ResponseCache};
pub use connectivity::ConnectivityMonitor;
pub use events::{EventBus, GatewayEvent};
pub use gateway::{ExecuteOutcome, GatewayEffects, QueuedAck, RequestGateway};
pub use rate_limit::{RateLimitDecision, RateLimiter};
pub use rewrite::{Rewritten, VersionRewriter};
pub use scheduler::{RetryScheduler, ScanReport, ScanTrigger, SchedulerHandle};
pub use store::{DurableStore, RecoveryReport};
