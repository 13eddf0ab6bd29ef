//! Durable store
//!
//! Typed tables over a raw [`StorageEffects`] backend:
//!
//! | table | key |
//! |-------|-----|
//! | queued operations | `op/<operation id>` |
//! | rate-limit windows | `window/<blake3(endpoint key)>` |
//! | conflict records | `conflict/<conflict id>` |
//!
//! Every mutation is written through to the backend before the call returns;
//! the backend is the only authoritative copy. The in-memory index (status
//! sets ordered by delivery key) is rebuilt from the backend at [`DurableStore::open`]
//! and kept in step on every write.
//!
//! Mutations of one record are serialized by a per-key async lock, so
//! unrelated records never contend and a read-modify-write is never torn.
//! The index lock is synchronous and never held across an await.

use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;

use parking_lot::{Mutex, RwLock};
use serde::de::DeserializeOwned;
use serde::Serialize;
use syncgate_core::effects::StorageEffects;
use syncgate_core::{
    ConflictId, ConflictRecord, ConflictStatus, GatewayError, GatewayResult, OperationId,
    OperationStatus, Priority, QueuedOperation, RateLimitWindow, StorageError,
};
use tracing::{debug, error, info, warn};

const OP_PREFIX: &str = "op/";
const WINDOW_PREFIX: &str = "window/";
const CONFLICT_PREFIX: &str = "conflict/";

/// Delivery order: priority tier first, then creation time, then id
pub type DeliveryKey = (Priority, u64, OperationId);

fn delivery_key(op: &QueuedOperation) -> DeliveryKey {
    (op.priority, op.created_at, op.id.clone())
}

fn op_key(id: &OperationId) -> String {
    format!("{OP_PREFIX}{id}")
}

fn window_key(endpoint_key: &str) -> String {
    let digest = blake3::hash(endpoint_key.as_bytes());
    format!("{WINDOW_PREFIX}{}", hex::encode(&digest.as_bytes()[..16]))
}

fn conflict_key(id: &ConflictId) -> String {
    format!("{CONFLICT_PREFIX}{id}")
}

/// What [`DurableStore::open`] found on disk
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RecoveryReport {
    /// Operations indexed
    pub operations: usize,
    /// `in_flight` operations returned to `pending`
    pub reset_in_flight: usize,
    /// `completed` leftovers deleted
    pub removed_completed: usize,
    /// Records that could not be decoded and were skipped
    pub skipped_corrupt: usize,
    /// Newest operation id timestamp seen
    pub latest_operation_ms: u64,
}

#[derive(Debug, Default)]
struct StoreIndex {
    entries: HashMap<OperationId, (OperationStatus, DeliveryKey)>,
    by_status: HashMap<OperationStatus, BTreeSet<DeliveryKey>>,
}

impl StoreIndex {
    fn upsert(&mut self, op: &QueuedOperation) {
        self.remove(&op.id);
        let key = delivery_key(op);
        self.by_status
            .entry(op.status)
            .or_default()
            .insert(key.clone());
        self.entries.insert(op.id.clone(), (op.status, key));
    }

    fn remove(&mut self, id: &OperationId) -> Option<OperationStatus> {
        let (status, key) = self.entries.remove(id)?;
        if let Some(set) = self.by_status.get_mut(&status) {
            set.remove(&key);
        }
        Some(status)
    }

    fn status_of(&self, id: &OperationId) -> Option<OperationStatus> {
        self.entries.get(id).map(|(status, _)| *status)
    }

    fn ids_with_status(&self, status: OperationStatus) -> Vec<OperationId> {
        self.by_status
            .get(&status)
            .map(|set| set.iter().map(|(_, _, id)| id.clone()).collect())
            .unwrap_or_default()
    }

    fn count(&self, status: OperationStatus) -> usize {
        self.by_status.get(&status).map_or(0, BTreeSet::len)
    }
}

/// Crash-safe persistence for queued operations, rate-limit windows and
/// conflict records
pub struct DurableStore {
    storage: Arc<dyn StorageEffects>,
    index: RwLock<StoreIndex>,
    record_locks: Mutex<HashMap<String, Arc<tokio::sync::Mutex<()>>>>,
    recovery: RecoveryReport,
}

impl std::fmt::Debug for DurableStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DurableStore")
            .field("operations", &self.index.read().entries.len())
            .field("recovery", &self.recovery)
            .finish_non_exhaustive()
    }
}

impl DurableStore {
    /// Open the store, rebuilding the index from the backend.
    ///
    /// Operations left `in_flight` by a crash go back to `pending` with their
    /// `retry_count` untouched. Leftover `completed` records are deleted.
    pub async fn open(storage: Arc<dyn StorageEffects>) -> GatewayResult<Self> {
        let mut report = RecoveryReport::default();
        let mut index = StoreIndex::default();

        for key in storage.list_keys(Some(OP_PREFIX)).await? {
            let Some(mut op) = decode_record::<QueuedOperation>(storage.as_ref(), &key).await?
            else {
                report.skipped_corrupt += 1;
                continue;
            };

            match op.status {
                OperationStatus::Completed => {
                    storage.remove(&key).await?;
                    report.removed_completed += 1;
                    continue;
                }
                OperationStatus::InFlight => {
                    op.status = OperationStatus::Pending;
                    storage.store(&key, encode(&op)?).await?;
                    report.reset_in_flight += 1;
                    warn!(operation_id = %op.id, "Recovered interrupted delivery, back to pending");
                }
                OperationStatus::Pending | OperationStatus::FailedPermanent => {}
            }

            report.latest_operation_ms = report.latest_operation_ms.max(op.id.timestamp_ms());
            report.operations += 1;
            index.upsert(&op);
        }

        info!(
            operations = report.operations,
            pending = index.count(OperationStatus::Pending),
            reset_in_flight = report.reset_in_flight,
            removed_completed = report.removed_completed,
            skipped_corrupt = report.skipped_corrupt,
            "Opened durable store"
        );

        Ok(Self {
            storage,
            index: RwLock::new(index),
            record_locks: Mutex::new(HashMap::new()),
            recovery: report,
        })
    }

    /// What was found at open
    pub fn recovery_report(&self) -> &RecoveryReport {
        &self.recovery
    }

    async fn lock_record(&self, key: &str) -> tokio::sync::OwnedMutexGuard<()> {
        let lock = self
            .record_locks
            .lock()
            .entry(key.to_string())
            .or_default()
            .clone();
        lock.lock_owned().await
    }

    fn release_record_lock(&self, key: &str) {
        let mut locks = self.record_locks.lock();
        // Only drop the entry when nobody else holds or waits on it.
        if locks.get(key).is_some_and(|l| Arc::strong_count(l) == 1) {
            locks.remove(key);
        }
    }

    async fn write<T: Serialize>(&self, key: &str, value: &T) -> GatewayResult<()> {
        self.storage.store(key, encode(value)?).await?;
        Ok(())
    }

    // ----- queued operations -------------------------------------------------

    /// Persist a new operation
    pub async fn insert(&self, op: &QueuedOperation) -> GatewayResult<()> {
        let key = op_key(&op.id);
        let guard = self.lock_record(&key).await;
        if self.index.read().status_of(&op.id).is_some() {
            return Err(GatewayError::invalid_state(format!(
                "operation {} already exists",
                op.id
            )));
        }
        self.write(&key, op).await?;
        self.index.write().upsert(op);
        drop(guard);
        debug!(operation_id = %op.id, status = %op.status, "Inserted operation");
        Ok(())
    }

    /// Load an operation by id
    pub async fn get(&self, id: &OperationId) -> GatewayResult<Option<QueuedOperation>> {
        if self.index.read().status_of(id).is_none() {
            return Ok(None);
        }
        decode_record(self.storage.as_ref(), &op_key(id)).await
    }

    /// Read-modify-write one operation under its record lock.
    ///
    /// `mutate` may change any field; a status change must be a legal
    /// lifecycle transition or the write is refused with `InvalidState`.
    pub async fn update<F>(&self, id: &OperationId, mutate: F) -> GatewayResult<QueuedOperation>
    where
        F: FnOnce(&mut QueuedOperation) -> GatewayResult<()>,
    {
        let key = op_key(id);
        let guard = self.lock_record(&key).await;
        let mut op = self
            .load_indexed(id)
            .await?
            .ok_or_else(|| GatewayError::not_found(format!("operation {id}")))?;

        let before = op.status;
        mutate(&mut op)?;
        if op.status != before && !before.can_transition_to(op.status) {
            return Err(GatewayError::invalid_state(format!(
                "operation {id} cannot move from {before} to {}",
                op.status
            )));
        }

        self.write(&key, &op).await?;
        self.index.write().upsert(&op);
        drop(guard);

        if op.status != before {
            debug!(operation_id = %id, from = %before, to = %op.status, "Operation transitioned");
        }
        Ok(op)
    }

    /// Atomically move a `pending` operation to `in_flight`.
    ///
    /// Returns `None` when the operation is gone or not `pending`, which is
    /// how concurrent claimants lose the race.
    pub async fn claim(
        &self,
        id: &OperationId,
        now_ms: u64,
    ) -> GatewayResult<Option<QueuedOperation>> {
        let key = op_key(id);
        let guard = self.lock_record(&key).await;
        let Some(mut op) = self.load_indexed(id).await? else {
            return Ok(None);
        };
        if op.status != OperationStatus::Pending {
            return Ok(None);
        }

        op.status = OperationStatus::InFlight;
        op.updated_at = now_ms;
        self.write(&key, &op).await?;
        self.index.write().upsert(&op);
        drop(guard);
        Ok(Some(op))
    }

    /// Hand an `in_flight` operation back to `pending` without touching its
    /// attempt counters.
    ///
    /// Returns `None` when the operation is gone or no longer `in_flight`.
    pub async fn release_claim(
        &self,
        id: &OperationId,
        now_ms: u64,
    ) -> GatewayResult<Option<QueuedOperation>> {
        let key = op_key(id);
        let guard = self.lock_record(&key).await;
        let Some(mut op) = self.load_indexed(id).await? else {
            return Ok(None);
        };
        if op.status != OperationStatus::InFlight {
            return Ok(None);
        }

        op.status = OperationStatus::Pending;
        op.updated_at = now_ms;
        self.write(&key, &op).await?;
        self.index.write().upsert(&op);
        drop(guard);
        Ok(Some(op))
    }

    /// Remove a `pending` operation before it is claimed
    pub async fn cancel(&self, id: &OperationId) -> GatewayResult<QueuedOperation> {
        let key = op_key(id);
        let guard = self.lock_record(&key).await;
        let op = self
            .load_indexed(id)
            .await?
            .ok_or_else(|| GatewayError::not_found(format!("operation {id}")))?;
        if op.status != OperationStatus::Pending {
            return Err(GatewayError::invalid_state(format!(
                "operation {id} is {} and can no longer be canceled",
                op.status
            )));
        }

        self.storage.remove(&key).await?;
        self.index.write().remove(id);
        drop(guard);
        self.release_record_lock(&key);
        Ok(op)
    }

    /// Delete an operation in any state. Returns whether it existed.
    pub async fn delete(&self, id: &OperationId) -> GatewayResult<bool> {
        let key = op_key(id);
        let guard = self.lock_record(&key).await;
        let existed = self.storage.remove(&key).await?;
        let indexed = self.index.write().remove(id).is_some();
        drop(guard);
        self.release_record_lock(&key);
        Ok(existed || indexed)
    }

    async fn load_indexed(&self, id: &OperationId) -> GatewayResult<Option<QueuedOperation>> {
        if self.index.read().status_of(id).is_none() {
            return Ok(None);
        }
        decode_record(self.storage.as_ref(), &op_key(id))
            .await?
            .map_or_else(
                || {
                    Err(GatewayError::Storage(StorageError::CorruptionDetected {
                        details: format!("operation {id} is indexed but unreadable"),
                    }))
                },
                |op| Ok(Some(op)),
            )
    }

    /// Ids in the given status, in delivery order
    pub fn ids_with_status(&self, status: OperationStatus) -> Vec<OperationId> {
        self.index.read().ids_with_status(status)
    }

    /// `pending` ids in delivery order: `(priority asc, created_at asc)`
    pub fn pending_in_order(&self) -> Vec<OperationId> {
        self.ids_with_status(OperationStatus::Pending)
    }

    /// Number of operations in the given status
    pub fn count_with_status(&self, status: OperationStatus) -> usize {
        self.index.read().count(status)
    }

    /// Operations in the given status, in delivery order
    pub async fn operations_with_status(
        &self,
        status: OperationStatus,
    ) -> GatewayResult<Vec<QueuedOperation>> {
        let mut out = Vec::new();
        for id in self.ids_with_status(status) {
            // Skip records that moved or vanished since the snapshot.
            if let Some(op) = self.get(&id).await? {
                if op.status == status {
                    out.push(op);
                }
            }
        }
        Ok(out)
    }

    // ----- rate-limit windows ------------------------------------------------

    /// Persist a rate-limit window
    pub async fn save_window(&self, window: &RateLimitWindow) -> GatewayResult<()> {
        let key = window_key(&window.endpoint_key);
        let _guard = self.lock_record(&key).await;
        self.write(&key, window).await
    }

    /// Delete a persisted window
    pub async fn delete_window(&self, endpoint_key: &str) -> GatewayResult<bool> {
        let key = window_key(endpoint_key);
        let guard = self.lock_record(&key).await;
        let existed = self.storage.remove(&key).await?;
        drop(guard);
        self.release_record_lock(&key);
        Ok(existed)
    }

    /// All persisted windows
    pub async fn load_windows(&self) -> GatewayResult<Vec<RateLimitWindow>> {
        let mut windows = Vec::new();
        for key in self.storage.list_keys(Some(WINDOW_PREFIX)).await? {
            if let Some(window) = decode_record(self.storage.as_ref(), &key).await? {
                windows.push(window);
            }
        }
        Ok(windows)
    }

    // ----- conflict records --------------------------------------------------

    /// Persist a new conflict record
    pub async fn insert_conflict(&self, record: &ConflictRecord) -> GatewayResult<()> {
        let key = conflict_key(&record.id);
        let guard = self.lock_record(&key).await;
        let written = self.write(&key, record).await;
        drop(guard);
        self.release_record_lock(&key);
        written
    }

    /// Load a conflict record
    pub async fn get_conflict(&self, id: &ConflictId) -> GatewayResult<Option<ConflictRecord>> {
        decode_record(self.storage.as_ref(), &conflict_key(id)).await
    }

    /// Conflict records, optionally filtered by status, oldest first
    pub async fn conflicts(
        &self,
        status: Option<ConflictStatus>,
    ) -> GatewayResult<Vec<ConflictRecord>> {
        let mut records = Vec::new();
        for key in self.storage.list_keys(Some(CONFLICT_PREFIX)).await? {
            if let Some(record) = decode_record::<ConflictRecord>(self.storage.as_ref(), &key).await?
            {
                if status.map_or(true, |s| record.status == s) {
                    records.push(record);
                }
            }
        }
        records.sort_by(|a, b| {
            a.detected_at
                .cmp(&b.detected_at)
                .then_with(|| a.id.cmp(&b.id))
        });
        Ok(records)
    }

    /// Mark a conflict resolved
    pub async fn resolve_conflict(
        &self,
        id: &ConflictId,
        now_ms: u64,
    ) -> GatewayResult<ConflictRecord> {
        let key = conflict_key(id);
        let guard = self.lock_record(&key).await;
        let resolved = self.resolve_conflict_locked(&key, id, now_ms).await;
        drop(guard);
        self.release_record_lock(&key);
        resolved
    }

    async fn resolve_conflict_locked(
        &self,
        key: &str,
        id: &ConflictId,
        now_ms: u64,
    ) -> GatewayResult<ConflictRecord> {
        let mut record = decode_record::<ConflictRecord>(self.storage.as_ref(), key)
            .await?
            .ok_or_else(|| GatewayError::not_found(format!("conflict {id}")))?;
        if !record.resolve(now_ms) {
            return Err(GatewayError::invalid_state(format!(
                "conflict {id} is already resolved"
            )));
        }
        self.write(key, &record).await?;
        Ok(record)
    }
}

fn encode<T: Serialize>(value: &T) -> Result<Vec<u8>, StorageError> {
    Ok(serde_json::to_vec(value)?)
}

/// Read and decode one record. Undecodable records are logged and reported
/// as absent so a single bad file cannot take the store down.
async fn decode_record<T: DeserializeOwned>(
    storage: &dyn StorageEffects,
    key: &str,
) -> GatewayResult<Option<T>> {
    let bytes = match storage.retrieve(key).await {
        Ok(Some(bytes)) => bytes,
        Ok(None) => return Ok(None),
        Err(
            err @ (StorageError::CorruptionDetected { .. }
            | StorageError::IntegrityCheckFailed { .. }),
        ) => {
            error!(key, error = %err, "Skipping corrupt record");
            return Ok(None);
        }
        Err(err) => return Err(err.into()),
    };
    match serde_json::from_slice(&bytes) {
        Ok(value) => Ok(Some(value)),
        Err(err) => {
            error!(key, error = %err, "Skipping undecodable record");
            Ok(None)
        }
    }
}
