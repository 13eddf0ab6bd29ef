//! Durable key/value storage seam
//!
//! The durable store layers typed tables and indices on top of this. A handler
//! must make each `store` and `remove` durable before returning.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::errors::StorageError;

/// Backend statistics
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StorageStats {
    /// Number of keys held
    pub key_count: u64,
    /// Total stored bytes
    pub total_size: u64,
    /// Backend name
    pub backend_type: String,
}

/// Raw durable key/value operations
#[async_trait]
pub trait StorageEffects: Send + Sync {
    /// Write `value` under `key`, replacing any previous value atomically
    async fn store(&self, key: &str, value: Vec<u8>) -> Result<(), StorageError>;

    /// Read the value under `key`
    async fn retrieve(&self, key: &str) -> Result<Option<Vec<u8>>, StorageError>;

    /// Delete `key`. Returns whether it existed.
    async fn remove(&self, key: &str) -> Result<bool, StorageError>;

    /// Keys starting with `prefix` (all keys when `None`)
    async fn list_keys(&self, prefix: Option<&str>) -> Result<Vec<String>, StorageError>;

    /// Whether `key` exists
    async fn exists(&self, key: &str) -> Result<bool, StorageError> {
        Ok(self.retrieve(key).await?.is_some())
    }

    /// Backend statistics
    async fn stats(&self) -> Result<StorageStats, StorageError>;
}

#[async_trait]
impl<T: StorageEffects + ?Sized> StorageEffects for std::sync::Arc<T> {
    async fn store(&self, key: &str, value: Vec<u8>) -> Result<(), StorageError> {
        (**self).store(key, value).await
    }

    async fn retrieve(&self, key: &str) -> Result<Option<Vec<u8>>, StorageError> {
        (**self).retrieve(key).await
    }

    async fn remove(&self, key: &str) -> Result<bool, StorageError> {
        (**self).remove(key).await
    }

    async fn list_keys(&self, prefix: Option<&str>) -> Result<Vec<String>, StorageError> {
        (**self).list_keys(prefix).await
    }

    async fn exists(&self, key: &str) -> Result<bool, StorageError> {
        (**self).exists(key).await
    }

    async fn stats(&self) -> Result<StorageStats, StorageError> {
        (**self).stats().await
    }
}
