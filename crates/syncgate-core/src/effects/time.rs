//! Physical clock seam

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// Error type for time operations.
#[derive(Debug, Clone, thiserror::Error, Serialize, Deserialize)]
pub enum TimeError {
    /// The clock could not be read
    #[error("Clock unavailable: {reason}")]
    ClockUnavailable {
        /// Why
        reason: String,
    },
}

/// Wall-clock reading in milliseconds since the Unix epoch
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct PhysicalTime {
    /// Milliseconds since the Unix epoch
    pub ts_ms: u64,
}

/// Wall-clock time for timestamps, backoff gates and window arithmetic
#[async_trait]
pub trait PhysicalTimeEffects: Send + Sync {
    /// Current wall-clock time
    async fn physical_time(&self) -> Result<PhysicalTime, TimeError>;

    /// Suspend for `ms` milliseconds of this clock's time
    async fn sleep_ms(&self, ms: u64) -> Result<(), TimeError>;

    /// Current time in ms, 0 if the clock is unreadable
    async fn now_ms(&self) -> u64 {
        self.physical_time().await.map(|t| t.ts_ms).unwrap_or(0)
    }
}

#[async_trait]
impl<T: PhysicalTimeEffects + ?Sized> PhysicalTimeEffects for std::sync::Arc<T> {
    async fn physical_time(&self) -> Result<PhysicalTime, TimeError> {
        (**self).physical_time().await
    }

    async fn sleep_ms(&self, ms: u64) -> Result<(), TimeError> {
        (**self).sleep_ms(ms).await
    }
}
