//! Seeded randomness

use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use rand::rngs::StdRng;
use rand::{Rng, RngCore, SeedableRng};
use syncgate_core::effects::RandomEffects;

/// Reproducible random source
#[derive(Debug, Clone)]
pub struct SeededRandomHandler {
    rng: Arc<Mutex<StdRng>>,
}

impl SeededRandomHandler {
    /// Create from a seed
    pub fn new(seed: u64) -> Self {
        Self {
            rng: Arc::new(Mutex::new(StdRng::seed_from_u64(seed))),
        }
    }
}

#[async_trait]
impl RandomEffects for SeededRandomHandler {
    async fn random_bytes(&self, len: usize) -> Vec<u8> {
        let mut bytes = vec![0u8; len];
        self.rng.lock().fill_bytes(&mut bytes);
        bytes
    }

    async fn random_u64(&self) -> u64 {
        self.rng.lock().gen()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_same_seed_same_sequence() {
        let a = SeededRandomHandler::new(7);
        let b = SeededRandomHandler::new(7);
        assert_eq!(a.random_u64().await, b.random_u64().await);
        assert_eq!(a.random_bytes(8).await, b.random_bytes(8).await);
    }
}
