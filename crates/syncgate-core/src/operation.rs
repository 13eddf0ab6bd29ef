//! Queued operations
//!
//! A [`QueuedOperation`] is a mutating request that could not be delivered
//! when it was issued. It is owned by the durable store and moved through its
//! lifecycle by the retry scheduler:
//!
//! ```text
//! pending -> in_flight -> completed
//!                      -> pending (retry_count + 1)
//!                      -> failed_permanent
//! pending -> failed_permanent   (retention horizon exceeded)
//! ```

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

use serde::{Deserialize, Serialize};

use crate::http::{Body, GatewayRequest, Headers, Method};

/// Unique operation identifier.
///
/// Rendered as `<13-digit millis>-<16 hex random>`, so lexicographic order is
/// generation order as long as ids come from one [`OperationIdGenerator`].
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct OperationId(String);

impl OperationId {
    /// Build an id from its timestamp and random suffix
    pub fn from_parts(timestamp_ms: u64, suffix: u64) -> Self {
        Self(format!("{timestamp_ms:013}-{suffix:016x}"))
    }

    /// Parse an id previously rendered with [`OperationId::from_parts`]
    pub fn parse(raw: &str) -> Option<Self> {
        let (ts, suffix) = raw.split_once('-')?;
        let well_formed = ts.len() == 13
            && ts.bytes().all(|b| b.is_ascii_digit())
            && suffix.len() == 16
            && suffix.bytes().all(|b| b.is_ascii_hexdigit());
        well_formed.then(|| Self(raw.to_string()))
    }

    /// Timestamp component
    pub fn timestamp_ms(&self) -> u64 {
        self.0
            .split_once('-')
            .and_then(|(ts, _)| ts.parse().ok())
            .unwrap_or(0)
    }

    /// String form
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for OperationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Hands out [`OperationId`]s whose timestamp component strictly increases,
/// even when the clock stalls or several ids are minted in one millisecond.
#[derive(Debug, Default)]
pub struct OperationIdGenerator {
    last_ms: AtomicU64,
}

impl OperationIdGenerator {
    /// Generator with no history
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed the generator so new ids sort after `floor_ms` (used after a
    /// restart with ids already on disk)
    pub fn observe(&self, floor_ms: u64) {
        self.last_ms.fetch_max(floor_ms, Ordering::SeqCst);
    }

    /// Mint the next id
    pub fn next(&self, now_ms: u64, suffix: u64) -> OperationId {
        let mut current = self.last_ms.load(Ordering::SeqCst);
        loop {
            let candidate = now_ms.max(current.saturating_add(1));
            match self.last_ms.compare_exchange(
                current,
                candidate,
                Ordering::SeqCst,
                Ordering::SeqCst,
            ) {
                Ok(_) => return OperationId::from_parts(candidate, suffix),
                Err(actual) => current = actual,
            }
        }
    }
}

/// Delivery tier. Lower drains first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Priority(pub u8);

impl Priority {
    /// Most urgent tier
    pub const HIGH: Priority = Priority(0);
    /// Default tier
    pub const NORMAL: Priority = Priority(1);
    /// Background tier
    pub const LOW: Priority = Priority(2);
}

impl Default for Priority {
    fn default() -> Self {
        Self::NORMAL
    }
}

/// Lifecycle state of a queued operation
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OperationStatus {
    /// Waiting for delivery
    Pending,
    /// A delivery attempt is in progress
    InFlight,
    /// Delivered successfully
    Completed,
    /// Given up; kept for inspection until purged
    FailedPermanent,
}

impl OperationStatus {
    /// All states, in lifecycle order
    pub const ALL: [OperationStatus; 4] = [
        OperationStatus::Pending,
        OperationStatus::InFlight,
        OperationStatus::Completed,
        OperationStatus::FailedPermanent,
    ];

    /// Whether the state machine allows `self -> next`
    pub fn can_transition_to(self, next: OperationStatus) -> bool {
        use OperationStatus::*;
        matches!(
            (self, next),
            (Pending, InFlight)
                | (Pending, FailedPermanent)
                | (InFlight, Pending)
                | (InFlight, Completed)
                | (InFlight, FailedPermanent)
        )
    }

    /// Completed and failed operations never move again
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::FailedPermanent)
    }

    /// Stable lower-case name
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::InFlight => "in_flight",
            Self::Completed => "completed",
            Self::FailedPermanent => "failed_permanent",
        }
    }
}

impl fmt::Display for OperationStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for OperationStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|status| status.as_str() == s)
            .ok_or_else(|| format!("unknown operation status '{s}'"))
    }
}

/// A durably stored pending mutation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueuedOperation {
    /// Unique id, stable across retries
    pub id: OperationId,
    /// HTTP method
    pub method: Method,
    /// Path as issued by the caller (rewritten again on every attempt)
    pub url: String,
    /// Caller headers
    pub headers: Headers,
    /// Caller payload
    pub body: Body,
    /// Enqueue time, ms since epoch
    pub created_at: u64,
    /// Lifecycle state
    pub status: OperationStatus,
    /// Failed delivery attempts so far
    pub retry_count: u32,
    /// Time of the most recent attempt
    pub last_attempt_at: Option<u64>,
    /// Delivery tier
    pub priority: Priority,
    /// Backoff gate: not eligible for a poll-driven attempt before this time
    #[serde(default)]
    pub next_attempt_at: Option<u64>,
    /// Description of the most recent failure
    #[serde(default)]
    pub last_error: Option<String>,
    /// Time of the most recent state change
    #[serde(default)]
    pub updated_at: u64,
}

impl QueuedOperation {
    /// Fresh `pending` operation for a request that failed its first attempt
    pub fn from_request(id: OperationId, request: &GatewayRequest, now_ms: u64) -> Self {
        Self {
            id,
            method: request.method,
            url: request.url.clone(),
            headers: request.headers.clone(),
            body: request.body.clone(),
            created_at: now_ms,
            status: OperationStatus::Pending,
            retry_count: 0,
            last_attempt_at: None,
            priority: request.priority,
            next_attempt_at: None,
            last_error: None,
            updated_at: now_ms,
        }
    }

    /// Rebuild the request for redelivery
    pub fn to_request(&self) -> GatewayRequest {
        GatewayRequest {
            method: self.method,
            url: self.url.clone(),
            headers: self.headers.clone(),
            body: self.body.clone(),
            query_operation: false,
            priority: self.priority,
        }
    }

    /// Older than the retention horizon
    pub fn is_expired(&self, now_ms: u64, retention_horizon_ms: u64) -> bool {
        now_ms.saturating_sub(self.created_at) > retention_horizon_ms
    }

    /// Past its backoff gate
    pub fn is_due(&self, now_ms: u64) -> bool {
        self.next_attempt_at.map_or(true, |at| now_ms >= at)
    }
}
