//! Randomness seam

use async_trait::async_trait;

/// Source of randomness for id suffixes, trace ids and jitter
#[async_trait]
pub trait RandomEffects: Send + Sync {
    /// `len` random bytes
    async fn random_bytes(&self, len: usize) -> Vec<u8>;

    /// A random u64
    async fn random_u64(&self) -> u64;

    /// 16 random bytes, for UUIDs
    async fn random_bytes_16(&self) -> [u8; 16] {
        let bytes = self.random_bytes(16).await;
        let mut out = [0u8; 16];
        for (dst, src) in out.iter_mut().zip(bytes) {
            *dst = src;
        }
        out
    }

    /// Uniform sample in `[0, 1)`
    async fn random_unit(&self) -> f64 {
        // 53 significant bits, the f64 mantissa width
        (self.random_u64().await >> 11) as f64 / (1u64 << 53) as f64
    }
}

#[async_trait]
impl<T: RandomEffects + ?Sized> RandomEffects for std::sync::Arc<T> {
    async fn random_bytes(&self, len: usize) -> Vec<u8> {
        (**self).random_bytes(len).await
    }

    async fn random_u64(&self) -> u64 {
        (**self).random_u64().await
    }
}
