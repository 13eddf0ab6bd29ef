//! Filesystem storage handler with atomic writes and integrity protection
//!
//! Each key lives in its own file named after the hex encoding of the key, so
//! enumeration never has to open a file. A record file holds a small JSON
//! envelope:
//!
//! ```json
//! {"version":1,"key":"op/...","checksum":"<blake3 hex>","payload":"<base64>"}
//! ```
//!
//! Writes go to a uniquely named temp file, are fsynced, then renamed over the
//! target and the directory is fsynced, so a crash leaves either the old or
//! the new record and never a torn one. Stray temp files from a crash are
//! removed when the handler is opened.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use rand::Rng;
use serde::{Deserialize, Serialize};
use syncgate_core::effects::{StorageEffects, StorageStats};
use syncgate_core::StorageError;
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tracing::{debug, info, warn};

const RECORD_EXTENSION: &str = "rec";
const TEMP_EXTENSION: &str = "tmp";
const ENVELOPE_VERSION: u32 = 1;
const MAX_KEY_LEN: usize = 120;

/// Configuration for filesystem storage
#[derive(Debug, Clone)]
pub struct FilesystemStorageConfig {
    /// File permissions mode (owner-only by default)
    pub file_permissions: u32,
    /// Directory permissions mode (owner-only by default)
    pub dir_permissions: u32,
    /// Verify the checksum on every read
    pub always_verify_integrity: bool,
    /// Maximum payload size in bytes
    pub max_value_size: u64,
}

impl Default for FilesystemStorageConfig {
    fn default() -> Self {
        Self {
            file_permissions: 0o600,
            dir_permissions: 0o700,
            always_verify_integrity: true,
            max_value_size: 16 * 1024 * 1024,
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
struct RecordEnvelope {
    version: u32,
    key: String,
    checksum: String,
    payload: String,
}

/// Durable, crash-safe key/value storage on a local directory
#[derive(Debug)]
pub struct FilesystemStorageHandler {
    base_path: PathBuf,
    config: FilesystemStorageConfig,
}

impl FilesystemStorageHandler {
    /// Open (creating if needed) a store rooted at `base_path`
    pub fn new(base_path: impl Into<PathBuf>) -> Result<Self, StorageError> {
        Self::with_config(base_path, FilesystemStorageConfig::default())
    }

    /// Open a store with custom configuration
    pub fn with_config(
        base_path: impl Into<PathBuf>,
        config: FilesystemStorageConfig,
    ) -> Result<Self, StorageError> {
        let base_path = base_path.into();
        std::fs::create_dir_all(&base_path).map_err(|e| StorageError::ConfigurationError {
            reason: format!("failed to create {}: {e}", base_path.display()),
        })?;
        set_permissions_sync(&base_path, config.dir_permissions)?;

        let removed = remove_stray_temp_files(&base_path)?;
        if removed > 0 {
            warn!(
                path = %base_path.display(),
                removed,
                "Removed temp files left by an interrupted write"
            );
        }

        info!(path = %base_path.display(), "Opened filesystem storage");
        Ok(Self { base_path, config })
    }

    /// Root directory
    pub fn base_path(&self) -> &Path {
        &self.base_path
    }

    fn validate_key(&self, key: &str) -> Result<(), StorageError> {
        if key.is_empty() {
            return Err(StorageError::InvalidKey {
                reason: "key cannot be empty".to_string(),
            });
        }
        if key.len() > MAX_KEY_LEN {
            return Err(StorageError::InvalidKey {
                reason: format!("key longer than {MAX_KEY_LEN} bytes"),
            });
        }
        if key.contains('\0') {
            return Err(StorageError::InvalidKey {
                reason: "key contains NUL".to_string(),
            });
        }
        Ok(())
    }

    fn key_to_path(&self, key: &str) -> PathBuf {
        self.base_path
            .join(format!("{}.{RECORD_EXTENSION}", hex::encode(key.as_bytes())))
    }

    fn path_to_key(path: &Path) -> Option<String> {
        if path.extension()?.to_str()? != RECORD_EXTENSION {
            return None;
        }
        let stem = path.file_stem()?.to_str()?;
        let bytes = hex::decode(stem).ok()?;
        String::from_utf8(bytes).ok()
    }

    fn checksum(data: &[u8]) -> String {
        blake3::hash(data).to_hex().to_string()
    }

    async fn write_atomic(&self, path: &Path, data: &[u8]) -> Result<(), StorageError> {
        let suffix: u64 = rand::thread_rng().gen();
        let temp_path = path.with_extension(format!("{suffix:016x}.{TEMP_EXTENSION}"));

        let mut file = fs::File::create(&temp_path)
            .await
            .map_err(|e| StorageError::WriteFailed(format!("failed to create temp file: {e}")))?;
        file.write_all(data)
            .await
            .map_err(|e| StorageError::WriteFailed(format!("failed to write data: {e}")))?;
        file.sync_all()
            .await
            .map_err(|e| StorageError::WriteFailed(format!("failed to sync: {e}")))?;
        drop(file);

        set_permissions(&temp_path, self.config.file_permissions).await?;

        if let Err(e) = fs::rename(&temp_path, path).await {
            let _ = fs::remove_file(&temp_path).await;
            return Err(StorageError::WriteFailed(format!(
                "failed to rename temp file: {e}"
            )));
        }

        self.sync_directory().await;
        Ok(())
    }

    async fn sync_directory(&self) {
        // Makes the rename itself durable. Not every platform lets a
        // directory be opened for syncing.
        match fs::File::open(&self.base_path).await {
            Ok(dir) => {
                if let Err(e) = dir.sync_all().await {
                    debug!(error = %e, "Directory fsync unsupported");
                }
            }
            Err(e) => debug!(error = %e, "Directory open for fsync failed"),
        }
    }

    async fn record_paths(&self) -> Result<Vec<PathBuf>, StorageError> {
        let mut paths = Vec::new();
        let mut read_dir = fs::read_dir(&self.base_path)
            .await
            .map_err(|e| StorageError::ListFailed(format!("failed to read directory: {e}")))?;
        while let Some(entry) = read_dir
            .next_entry()
            .await
            .map_err(|e| StorageError::ListFailed(format!("failed to read entry: {e}")))?
        {
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) == Some(RECORD_EXTENSION) {
                paths.push(path);
            }
        }
        Ok(paths)
    }
}

#[async_trait]
impl StorageEffects for FilesystemStorageHandler {
    async fn store(&self, key: &str, value: Vec<u8>) -> Result<(), StorageError> {
        self.validate_key(key)?;
        if value.len() as u64 > self.config.max_value_size {
            return Err(StorageError::WriteFailed(format!(
                "value of {} bytes exceeds limit of {} bytes",
                value.len(),
                self.config.max_value_size
            )));
        }

        let envelope = RecordEnvelope {
            version: ENVELOPE_VERSION,
            key: key.to_string(),
            checksum: Self::checksum(&value),
            payload: STANDARD.encode(&value),
        };
        let encoded = serde_json::to_vec(&envelope)?;
        self.write_atomic(&self.key_to_path(key), &encoded).await?;

        debug!(key, bytes = value.len(), "Stored record");
        Ok(())
    }

    async fn retrieve(&self, key: &str) -> Result<Option<Vec<u8>>, StorageError> {
        self.validate_key(key)?;
        let path = self.key_to_path(key);

        let raw = match fs::read(&path).await {
            Ok(raw) => raw,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => {
                return Err(StorageError::ReadFailed(format!(
                    "failed to read {}: {e}",
                    path.display()
                )))
            }
        };

        let envelope: RecordEnvelope =
            serde_json::from_slice(&raw).map_err(|e| StorageError::CorruptionDetected {
                details: format!("unreadable envelope for '{key}': {e}"),
            })?;
        if envelope.key != key {
            return Err(StorageError::CorruptionDetected {
                details: format!("envelope key '{}' does not match '{key}'", envelope.key),
            });
        }
        let payload = STANDARD
            .decode(envelope.payload.as_bytes())
            .map_err(|e| StorageError::CorruptionDetected {
                details: format!("payload for '{key}' is not base64: {e}"),
            })?;

        if self.config.always_verify_integrity {
            let actual = Self::checksum(&payload);
            if actual != envelope.checksum {
                return Err(StorageError::IntegrityCheckFailed {
                    key: key.to_string(),
                    expected: envelope.checksum,
                    actual,
                });
            }
        }

        Ok(Some(payload))
    }

    async fn remove(&self, key: &str) -> Result<bool, StorageError> {
        self.validate_key(key)?;
        match fs::remove_file(self.key_to_path(key)).await {
            Ok(()) => {
                self.sync_directory().await;
                debug!(key, "Removed record");
                Ok(true)
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(StorageError::DeleteFailed(format!(
                "failed to remove '{key}': {e}"
            ))),
        }
    }

    async fn list_keys(&self, prefix: Option<&str>) -> Result<Vec<String>, StorageError> {
        let mut keys: Vec<String> = self
            .record_paths()
            .await?
            .iter()
            .filter_map(|path| Self::path_to_key(path))
            .filter(|key| prefix.map_or(true, |p| key.starts_with(p)))
            .collect();
        keys.sort();
        Ok(keys)
    }

    async fn exists(&self, key: &str) -> Result<bool, StorageError> {
        self.validate_key(key)?;
        Ok(fs::try_exists(self.key_to_path(key)).await.unwrap_or(false))
    }

    async fn stats(&self) -> Result<StorageStats, StorageError> {
        let mut stats = StorageStats {
            backend_type: "filesystem".to_string(),
            ..StorageStats::default()
        };
        for path in self.record_paths().await? {
            if let Ok(metadata) = fs::metadata(&path).await {
                stats.key_count += 1;
                stats.total_size += metadata.len();
            }
        }
        Ok(stats)
    }
}

fn remove_stray_temp_files(base_path: &Path) -> Result<usize, StorageError> {
    let mut removed = 0;
    let entries = std::fs::read_dir(base_path).map_err(|e| StorageError::ConfigurationError {
        reason: format!("failed to scan {}: {e}", base_path.display()),
    })?;
    for entry in entries.flatten() {
        let path = entry.path();
        if path.extension().and_then(|e| e.to_str()) == Some(TEMP_EXTENSION)
            && std::fs::remove_file(&path).is_ok()
        {
            removed += 1;
        }
    }
    Ok(removed)
}

#[cfg(unix)]
fn set_permissions_sync(path: &Path, mode: u32) -> Result<(), StorageError> {
    use std::os::unix::fs::PermissionsExt;
    std::fs::set_permissions(path, std::fs::Permissions::from_mode(mode)).map_err(|e| {
        StorageError::ConfigurationError {
            reason: format!("failed to set permissions on {}: {e}", path.display()),
        }
    })
}

#[cfg(not(unix))]
fn set_permissions_sync(_path: &Path, _mode: u32) -> Result<(), StorageError> {
    Ok(())
}

#[cfg(unix)]
async fn set_permissions(path: &Path, mode: u32) -> Result<(), StorageError> {
    use std::os::unix::fs::PermissionsExt;
    fs::set_permissions(path, std::fs::Permissions::from_mode(mode))
        .await
        .map_err(|e| StorageError::WriteFailed(format!("failed to set permissions: {e}")))
}

#[cfg(not(unix))]
async fn set_permissions(_path: &Path, _mode: u32) -> Result<(), StorageError> {
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_store_retrieve_remove() {
        let dir = TempDir::new().unwrap();
        let storage = FilesystemStorageHandler::new(dir.path()).unwrap();

        storage.store("op/1", b"hello".to_vec()).await.unwrap();
        assert_eq!(storage.retrieve("op/1").await.unwrap(), Some(b"hello".to_vec()));
        assert!(storage.exists("op/1").await.unwrap());

        storage.store("op/1", b"replaced".to_vec()).await.unwrap();
        assert_eq!(storage.retrieve("op/1").await.unwrap(), Some(b"replaced".to_vec()));

        assert!(storage.remove("op/1").await.unwrap());
        assert!(!storage.remove("op/1").await.unwrap());
        assert_eq!(storage.retrieve("op/1").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_list_keys_by_prefix_survives_reopen() {
        let dir = TempDir::new().unwrap();
        {
            let storage = FilesystemStorageHandler::new(dir.path()).unwrap();
            storage.store("op/b", vec![1]).await.unwrap();
            storage.store("op/a", vec![2]).await.unwrap();
            storage.store("window//api/users", vec![3]).await.unwrap();
        }

        let storage = FilesystemStorageHandler::new(dir.path()).unwrap();
        assert_eq!(
            storage.list_keys(Some("op/")).await.unwrap(),
            vec!["op/a".to_string(), "op/b".to_string()]
        );
        assert_eq!(storage.list_keys(None).await.unwrap().len(), 3);
        assert_eq!(storage.stats().await.unwrap().key_count, 3);
    }

    #[tokio::test]
    async fn test_tampered_payload_fails_integrity_check() {
        let dir = TempDir::new().unwrap();
        let storage = FilesystemStorageHandler::new(dir.path()).unwrap();
        storage.store("op/x", b"original".to_vec()).await.unwrap();

        let path = storage.key_to_path("op/x");
        let raw = std::fs::read(&path).unwrap();
        let mut envelope: RecordEnvelope = serde_json::from_slice(&raw).unwrap();
        envelope.payload = STANDARD.encode(b"tampered");
        std::fs::write(&path, serde_json::to_vec(&envelope).unwrap()).unwrap();

        let err = storage.retrieve("op/x").await.unwrap_err();
        assert!(matches!(err, StorageError::IntegrityCheckFailed { .. }));
    }

    #[tokio::test]
    async fn test_garbage_file_is_corruption() {
        let dir = TempDir::new().unwrap();
        let storage = FilesystemStorageHandler::new(dir.path()).unwrap();
        std::fs::write(storage.key_to_path("op/y"), b"not json").unwrap();

        let err = storage.retrieve("op/y").await.unwrap_err();
        assert!(matches!(err, StorageError::CorruptionDetected { .. }));
    }

    #[tokio::test]
    async fn test_stray_temp_files_are_cleaned_on_open() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join("abcd.0000000000000001.tmp"), b"partial").unwrap();

        let storage = FilesystemStorageHandler::new(dir.path()).unwrap();
        assert!(!dir.path().join("abcd.0000000000000001.tmp").exists());
        assert!(storage.list_keys(None).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_invalid_keys_rejected() {
        let dir = TempDir::new().unwrap();
        let storage = FilesystemStorageHandler::new(dir.path()).unwrap();
        assert!(matches!(
            storage.store("", vec![]).await,
            Err(StorageError::InvalidKey { .. })
        ));
        let long = "k".repeat(MAX_KEY_LEN + 1);
        assert!(matches!(
            storage.store(&long, vec![]).await,
            Err(StorageError::InvalidKey { .. })
        ));
    }
}
