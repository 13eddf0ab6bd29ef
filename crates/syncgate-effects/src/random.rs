//! OS-backed randomness

use async_trait::async_trait;
use rand::{Rng, RngCore};
use syncgate_core::effects::RandomEffects;

/// Thread-local CSPRNG
#[derive(Debug, Clone, Copy, Default)]
pub struct RealRandomHandler;

impl RealRandomHandler {
    /// Create a new real random handler
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl RandomEffects for RealRandomHandler {
    async fn random_bytes(&self, len: usize) -> Vec<u8> {
        let mut bytes = vec![0u8; len];
        rand::thread_rng().fill_bytes(&mut bytes);
        bytes
    }

    async fn random_u64(&self) -> u64 {
        rand::thread_rng().gen()
    }
}
