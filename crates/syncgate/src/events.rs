//! Lifecycle events
//!
//! Published on a broadcast channel. Publishing never blocks; a subscriber
//! that falls behind sees `RecvError::Lagged` and skips ahead.

use serde::Serialize;
use syncgate_core::{ConflictId, OperationId};
use tokio::sync::broadcast;
use tracing::trace;

const DEFAULT_CAPACITY: usize = 256;

/// Something observable happened to a request or queued operation
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum GatewayEvent {
    /// A mutating request was accepted into the durable queue
    Queued {
        /// Queued operation
        operation_id: OperationId,
        /// Logical URL of the request
        url: String,
    },
    /// A queued operation reached the server
    Delivered {
        /// Delivered operation
        operation_id: OperationId,
        /// HTTP status returned
        status: u16,
    },
    /// A delivery attempt of a queued operation failed
    DeliveryFailed {
        /// Affected operation
        operation_id: OperationId,
        /// Failure description
        error: String,
    },
    /// A queued operation will not be retried again
    PermanentlyFailed {
        /// Affected operation
        operation_id: OperationId,
    },
    /// A pending operation was canceled
    Canceled {
        /// Canceled operation
        operation_id: OperationId,
    },
    /// A request was refused by the rate limiter
    RateLimited {
        /// Endpoint key whose window is exhausted
        endpoint: String,
        /// Seconds until the window rolls over
        retry_after_seconds: u64,
    },
    /// A response signalled a version conflict
    ConflictDetected {
        /// The new conflict record
        conflict_id: ConflictId,
    },
    /// A conflict record was marked resolved
    ConflictResolved {
        /// The resolved record
        conflict_id: ConflictId,
    },
    /// A cached response was replaced by a background refresh
    CacheRefreshed {
        /// Refreshed URL
        url: String,
    },
}

/// Broadcast publisher of [`GatewayEvent`]s
#[derive(Debug, Clone)]
pub struct EventBus {
    sender: broadcast::Sender<GatewayEvent>,
}

impl EventBus {
    /// Bus buffering up to `capacity` events per subscriber
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self { sender }
    }

    /// New subscription, seeing events published from now on
    pub fn subscribe(&self) -> broadcast::Receiver<GatewayEvent> {
        self.sender.subscribe()
    }

    /// Publish an event. Having no subscribers is not an error.
    pub fn emit(&self, event: GatewayEvent) {
        trace!(?event, "Emitting gateway event");
        let _ = self.sender.send(event);
    }

    /// Current number of subscribers
    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY)
    }
}
