//! Wall-clock time handler

use std::time::{Duration, SystemTime, UNIX_EPOCH};

use async_trait::async_trait;
use syncgate_core::effects::{PhysicalTime, PhysicalTimeEffects, TimeError};

/// System clock and tokio timers
#[derive(Debug, Clone, Copy, Default)]
pub struct RealTimeHandler;

impl RealTimeHandler {
    /// Create a new real time handler
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl PhysicalTimeEffects for RealTimeHandler {
    async fn physical_time(&self) -> Result<PhysicalTime, TimeError> {
        let elapsed = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map_err(|e| TimeError::ClockUnavailable {
                reason: format!("system clock before Unix epoch: {e}"),
            })?;
        Ok(PhysicalTime {
            ts_ms: elapsed.as_millis() as u64,
        })
    }

    async fn sleep_ms(&self, ms: u64) -> Result<(), TimeError> {
        tokio::time::sleep(Duration::from_millis(ms)).await;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_clock_is_after_2020() {
        let now = RealTimeHandler::new().now_ms().await;
        assert!(now > 1_577_836_800_000);
    }
}
