//! In-memory storage handler
//!
//! Clones share the same map, so a "reopened" store built from a clone sees
//! everything written before. Nothing survives the process.

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::RwLock;
use syncgate_core::effects::{StorageEffects, StorageStats};
use syncgate_core::StorageError;

/// In-memory key/value storage
#[derive(Debug, Clone, Default)]
pub struct MemoryStorageHandler {
    data: Arc<RwLock<BTreeMap<String, Vec<u8>>>>,
}

impl MemoryStorageHandler {
    /// Create an empty store
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of keys held
    pub fn len(&self) -> usize {
        self.data.read().len()
    }

    /// Whether the store is empty
    pub fn is_empty(&self) -> bool {
        self.data.read().is_empty()
    }
}

#[async_trait]
impl StorageEffects for MemoryStorageHandler {
    async fn store(&self, key: &str, value: Vec<u8>) -> Result<(), StorageError> {
        if key.is_empty() {
            return Err(StorageError::InvalidKey {
                reason: "key cannot be empty".to_string(),
            });
        }
        self.data.write().insert(key.to_string(), value);
        Ok(())
    }

    async fn retrieve(&self, key: &str) -> Result<Option<Vec<u8>>, StorageError> {
        Ok(self.data.read().get(key).cloned())
    }

    async fn remove(&self, key: &str) -> Result<bool, StorageError> {
        Ok(self.data.write().remove(key).is_some())
    }

    async fn list_keys(&self, prefix: Option<&str>) -> Result<Vec<String>, StorageError> {
        let data = self.data.read();
        let keys = match prefix {
            Some(prefix) => data
                .range(prefix.to_string()..)
                .take_while(|(k, _)| k.starts_with(prefix))
                .map(|(k, _)| k.clone())
                .collect(),
            None => data.keys().cloned().collect(),
        };
        Ok(keys)
    }

    async fn exists(&self, key: &str) -> Result<bool, StorageError> {
        Ok(self.data.read().contains_key(key))
    }

    async fn stats(&self) -> Result<StorageStats, StorageError> {
        let data = self.data.read();
        Ok(StorageStats {
            key_count: data.len() as u64,
            total_size: data.values().map(|v| v.len() as u64).sum(),
            backend_type: "memory".to_string(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_prefix_listing_is_sorted_and_bounded() {
        let storage = MemoryStorageHandler::new();
        storage.store("op/2", vec![2]).await.unwrap();
        storage.store("op/1", vec![1]).await.unwrap();
        storage.store("opx", vec![0]).await.unwrap();
        storage.store("window/a", vec![9]).await.unwrap();

        assert_eq!(
            storage.list_keys(Some("op/")).await.unwrap(),
            vec!["op/1".to_string(), "op/2".to_string()]
        );
        assert_eq!(storage.list_keys(None).await.unwrap().len(), 4);
    }

    #[tokio::test]
    async fn test_clones_share_state() {
        let storage = MemoryStorageHandler::new();
        let reopened = storage.clone();
        storage.store("k", b"v".to_vec()).await.unwrap();

        assert_eq!(reopened.retrieve("k").await.unwrap(), Some(b"v".to_vec()));
        assert!(reopened.remove("k").await.unwrap());
        assert!(storage.is_empty());
    }
}
