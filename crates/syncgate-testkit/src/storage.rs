//! Storage with injectable failures

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use syncgate_core::effects::{StorageEffects, StorageStats};
use syncgate_core::StorageError;
use syncgate_effects::MemoryStorageHandler;

/// Memory storage whose writes can be made to fail
#[derive(Debug, Clone, Default)]
pub struct FaultyStorageHandler {
    inner: MemoryStorageHandler,
    fail_writes: Arc<AtomicBool>,
}

impl FaultyStorageHandler {
    /// Wrap an existing memory store
    pub fn new(inner: MemoryStorageHandler) -> Self {
        Self {
            inner,
            fail_writes: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Make `store` and `remove` fail until reset
    pub fn set_fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }

    /// The wrapped store
    pub fn inner(&self) -> &MemoryStorageHandler {
        &self.inner
    }

    fn check_writable(&self) -> Result<(), StorageError> {
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(StorageError::WriteFailed("injected write failure".to_string()));
        }
        Ok(())
    }
}

#[async_trait]
impl StorageEffects for FaultyStorageHandler {
    async fn store(&self, key: &str, value: Vec<u8>) -> Result<(), StorageError> {
        self.check_writable()?;
        self.inner.store(key, value).await
    }

    async fn retrieve(&self, key: &str) -> Result<Option<Vec<u8>>, StorageError> {
        self.inner.retrieve(key).await
    }

    async fn remove(&self, key: &str) -> Result<bool, StorageError> {
        self.check_writable()?;
        self.inner.remove(key).await
    }

    async fn list_keys(&self, prefix: Option<&str>) -> Result<Vec<String>, StorageError> {
        self.inner.list_keys(prefix).await
    }

    async fn stats(&self) -> Result<StorageStats, StorageError> {
        self.inner.stats().await
    }
}
