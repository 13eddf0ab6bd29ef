//! Controllable clock

use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use syncgate_core::effects::{PhysicalTime, PhysicalTimeEffects, TimeError};

/// Clock that only moves when told to
///
/// `sleep_ms` advances the clock instead of waiting, unless frozen.
#[derive(Debug, Clone)]
pub struct SimulatedTimeHandler {
    current_ms: Arc<Mutex<u64>>,
    frozen: Arc<Mutex<bool>>,
}

impl SimulatedTimeHandler {
    /// Start at `initial_ms`
    pub fn new(initial_ms: u64) -> Self {
        Self {
            current_ms: Arc::new(Mutex::new(initial_ms)),
            frozen: Arc::new(Mutex::new(false)),
        }
    }

    /// Move forward by `ms`
    pub fn advance_ms(&self, ms: u64) {
        *self.current_ms.lock() += ms;
    }

    /// Jump to an absolute time
    pub fn set_ms(&self, ms: u64) {
        *self.current_ms.lock() = ms;
    }

    /// Current reading
    pub fn current_ms(&self) -> u64 {
        *self.current_ms.lock()
    }

    /// Stop `sleep_ms` from advancing the clock
    pub fn freeze(&self) {
        *self.frozen.lock() = true;
    }

    /// Let `sleep_ms` advance the clock again
    pub fn unfreeze(&self) {
        *self.frozen.lock() = false;
    }
}

impl Default for SimulatedTimeHandler {
    fn default() -> Self {
        Self::new(0)
    }
}

#[async_trait]
impl PhysicalTimeEffects for SimulatedTimeHandler {
    async fn physical_time(&self) -> Result<PhysicalTime, TimeError> {
        Ok(PhysicalTime {
            ts_ms: self.current_ms(),
        })
    }

    async fn sleep_ms(&self, ms: u64) -> Result<(), TimeError> {
        if !*self.frozen.lock() {
            self.advance_ms(ms);
        }
        tokio::task::yield_now().await;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_sleep_advances_unless_frozen() {
        let time = SimulatedTimeHandler::new(1_000);
        time.sleep_ms(500).await.unwrap();
        assert_eq!(time.now_ms().await, 1_500);

        time.freeze();
        time.sleep_ms(500).await.unwrap();
        assert_eq!(time.now_ms().await, 1_500);
    }
}
