//! Retry scheduler
//!
//! Drives queued operations through
//!
//! ```text
//! pending -> in_flight -> completed (removed)
//!                      -> pending (retry_count + 1, backoff)
//!                      -> failed_permanent
//! ```
//!
//! A scan runs on a fixed poll interval and immediately when connectivity is
//! restored. Poll scans honour each operation's backoff gate; reconnect and
//! flush scans treat every `pending` operation as eligible. Retention and the
//! audit purge apply to every scan, online or not.
//!
//! Within a priority tier operations leave in creation order: once one is
//! not yet due or is deferred by the rate limiter, the rest of its tier waits
//! for a later scan. Lower tiers still proceed.
//!
//! A claim that cannot be settled (the store refused the follow-up write) is
//! handed back to `pending` on the next scan, so nothing stays `in_flight`
//! while the process runs.

use std::collections::BTreeSet;
use std::sync::Arc;

use parking_lot::Mutex;
use serde::Serialize;
use syncgate_core::{
    GatewayError, GatewayResponse, GatewayResult, OperationId, OperationStatus, QueuedOperation,
    TransportError,
};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, warn};

use crate::events::GatewayEvent;
use crate::gateway::RequestGateway;

/// Why a scan ran
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScanTrigger {
    /// Periodic wake; backoff gates apply
    Poll,
    /// Connectivity restored; backoff bypassed
    Reconnect,
    /// Explicit request; backoff bypassed
    Flush,
}

impl ScanTrigger {
    fn bypasses_backoff(self) -> bool {
        matches!(self, Self::Reconnect | Self::Flush)
    }
}

/// What one scan did
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ScanReport {
    /// Operations moved to `failed_permanent` for exceeding retention
    pub expired: usize,
    /// Audit records deleted
    pub purged: usize,
    /// Delivery attempts made
    pub attempted: usize,
    /// Operations delivered and removed
    pub delivered: usize,
    /// Deliveries that raised a conflict record
    pub conflicts: usize,
    /// Operations returned to `pending` after a transport failure
    pub rescheduled: usize,
    /// Operations deferred by the rate limiter
    pub rate_limited: usize,
    /// Operations failed by an error status from the server
    pub rejected: usize,
    /// Operations whose backoff gate had not opened
    pub not_due: usize,
    /// Operations held behind an earlier operation of their tier
    pub held_back: usize,
    /// Stranded claims from earlier scans that are now settled
    pub released: usize,
    /// The scan stopped early after a transport failure
    pub stopped_early: bool,
    /// Deliveries skipped because the host is offline
    pub offline: bool,
}

/// Background re-delivery of queued operations
#[derive(Debug)]
pub struct RetryScheduler {
    gateway: RequestGateway,
    scan_lock: tokio::sync::Mutex<()>,
    unsettled: Mutex<BTreeSet<OperationId>>,
}

/// Running scheduler loop
#[derive(Debug)]
pub struct SchedulerHandle {
    shutdown: watch::Sender<bool>,
    join: JoinHandle<()>,
}

impl SchedulerHandle {
    /// Stop the loop and wait for the current scan to finish
    pub async fn shutdown(self) {
        let _ = self.shutdown.send(true);
        if let Err(err) = self.join.await {
            error!(error = %err, "Retry scheduler task failed");
        }
    }
}

enum AttemptResult {
    Continue,
    /// Later operations of the same tier must wait
    HoldTier,
    Stop,
}

impl RetryScheduler {
    /// Scheduler for `gateway`
    pub fn new(gateway: RequestGateway) -> Self {
        Self {
            gateway,
            scan_lock: tokio::sync::Mutex::new(()),
            unsettled: Mutex::new(BTreeSet::new()),
        }
    }

    /// Run one scan. Scans never overlap.
    pub async fn run_once(&self, trigger: ScanTrigger) -> GatewayResult<ScanReport> {
        let _scan = self.scan_lock.lock().await;
        let mut report = ScanReport::default();
        let now = self.gateway.now().await;
        debug!(?trigger, "Retry scan started");

        self.settle_stranded(now, &mut report).await;
        self.expire(now, &mut report).await?;
        self.purge(now, &mut report).await?;

        if !self.gateway.connectivity().is_online() {
            report.offline = true;
            debug!(expired = report.expired, "Offline, skipping deliveries");
            return Ok(report);
        }

        let mut held_tiers = BTreeSet::new();
        for id in self.gateway.store().pending_in_order() {
            let Some(op) = self.gateway.store().get(&id).await? else {
                continue;
            };
            if held_tiers.contains(&op.priority) {
                report.held_back += 1;
                continue;
            }
            if !trigger.bypasses_backoff() && !op.is_due(self.gateway.now().await) {
                report.not_due += 1;
                held_tiers.insert(op.priority);
                continue;
            }
            match self.attempt(&id, &mut report).await? {
                AttemptResult::Continue => {}
                AttemptResult::HoldTier => {
                    held_tiers.insert(op.priority);
                }
                AttemptResult::Stop => {
                    report.stopped_early = true;
                    break;
                }
            }
        }

        if report.attempted > 0 || report.expired > 0 || report.purged > 0 || report.released > 0 {
            info!(
                ?trigger,
                attempted = report.attempted,
                delivered = report.delivered,
                rescheduled = report.rescheduled,
                rate_limited = report.rate_limited,
                rejected = report.rejected,
                held_back = report.held_back,
                expired = report.expired,
                purged = report.purged,
                "Retry scan finished"
            );
        }
        Ok(report)
    }

    /// Move `pending` operations past the retention horizon to
    /// `failed_permanent`
    async fn expire(&self, now: u64, report: &mut ScanReport) -> GatewayResult<()> {
        let horizon = self.gateway.config().retry.retention_horizon_ms;
        for op in self.gateway.store().operations_with_status(OperationStatus::Pending).await? {
            if !op.is_expired(now, horizon) {
                continue;
            }
            let failure = GatewayError::PermanentDeliveryFailure {
                operation_id: op.id.clone(),
            };
            let updated = self
                .gateway
                .store()
                .update(&op.id, |o| {
                    // Claimed by a concurrent delivery since the snapshot.
                    if o.status != OperationStatus::Pending {
                        return Err(GatewayError::invalid_state("no longer pending"));
                    }
                    o.status = OperationStatus::FailedPermanent;
                    o.last_error = Some(failure.to_string());
                    o.updated_at = now;
                    Ok(())
                })
                .await;
            match updated {
                Ok(_) => {
                    report.expired += 1;
                    warn!(operation_id = %op.id, created_at = op.created_at, "Retention horizon exceeded");
                    self.permanently_failed(&op.id, failure.to_string());
                }
                Err(GatewayError::InvalidState { .. } | GatewayError::NotFound { .. }) => {}
                Err(err) => return Err(err),
            }
        }
        Ok(())
    }

    /// Delete `failed_permanent` records older than the audit retention
    async fn purge(&self, now: u64, report: &mut ScanReport) -> GatewayResult<()> {
        let retention = self.gateway.config().retry.audit_retention_ms;
        for op in self
            .gateway
            .store()
            .operations_with_status(OperationStatus::FailedPermanent)
            .await?
        {
            if now.saturating_sub(op.updated_at) >= retention {
                self.gateway.store().delete(&op.id).await?;
                report.purged += 1;
                debug!(operation_id = %op.id, "Purged failed operation");
            }
        }
        Ok(())
    }

    async fn attempt(
        &self,
        id: &OperationId,
        report: &mut ScanReport,
    ) -> GatewayResult<AttemptResult> {
        let now = self.gateway.now().await;
        let Some(op) = self.gateway.store().claim(id, now).await? else {
            // Canceled or claimed since the snapshot.
            return Ok(AttemptResult::Continue);
        };
        debug!(operation_id = %id, retry_count = op.retry_count, "Delivery attempt");

        let result = self.gateway.deliver_queued(&op).await;
        let finished_at = self.gateway.now().await;

        match self.settle(&op, result, finished_at, report).await {
            Ok(next) => Ok(next),
            Err(err) => {
                warn!(operation_id = %id, error = %err, "Failed to record delivery outcome");
                self.hand_back_claim(id, finished_at).await;
                Err(err)
            }
        }
    }

    /// Record the outcome of one delivery of a claimed operation
    async fn settle(
        &self,
        op: &QueuedOperation,
        result: GatewayResult<GatewayResponse>,
        finished_at: u64,
        report: &mut ScanReport,
    ) -> GatewayResult<AttemptResult> {
        let id = &op.id;
        if let Err(GatewayError::NetworkFailure(TransportError::Offline)) = result {
            // Nothing was sent; the attempt does not count.
            self.gateway.store().release_claim(id, finished_at).await?;
            report.offline = true;
            debug!(operation_id = %id, "Went offline before delivery");
            return Ok(AttemptResult::Stop);
        }
        report.attempted += 1;

        match result {
            Ok(response) => {
                self.complete(op, response.status, finished_at).await?;
                report.delivered += 1;
                if response.conflict.is_some() {
                    report.conflicts += 1;
                }
                Ok(AttemptResult::Continue)
            }
            Err(GatewayError::RateLimited {
                retry_after_seconds,
                ..
            }) => {
                let retry_at = finished_at.saturating_add(retry_after_seconds.saturating_mul(1000));
                self.gateway
                    .store()
                    .update(id, |o| {
                        o.status = OperationStatus::Pending;
                        o.next_attempt_at = Some(retry_at);
                        o.updated_at = finished_at;
                        Ok(())
                    })
                    .await?;
                report.rate_limited += 1;
                debug!(operation_id = %id, retry_after_seconds, "Delivery deferred by rate limit");
                Ok(AttemptResult::HoldTier)
            }
            Err(GatewayError::NetworkFailure(err)) => {
                self.reschedule(op, err.to_string(), finished_at).await?;
                report.rescheduled += 1;
                Ok(AttemptResult::Stop)
            }
            Err(err) => {
                let reason = err.to_string();
                self.gateway
                    .store()
                    .update(id, |o| {
                        o.status = OperationStatus::FailedPermanent;
                        o.retry_count += 1;
                        o.last_attempt_at = Some(finished_at);
                        o.last_error = Some(reason.clone());
                        o.updated_at = finished_at;
                        Ok(())
                    })
                    .await?;
                report.rejected += 1;
                warn!(operation_id = %id, error = %reason, "Queued operation rejected");
                self.permanently_failed(id, reason);
                Ok(AttemptResult::Continue)
            }
        }
    }

    /// Best-effort hand-back of a claim whose outcome could not be recorded.
    /// Claims that still cannot be settled are retried by the next scan.
    async fn hand_back_claim(&self, id: &OperationId, now: u64) -> bool {
        match self.settle_claim(id, now).await {
            Ok(()) => {
                self.unsettled.lock().remove(id);
                true
            }
            Err(err) => {
                warn!(operation_id = %id, error = %err, "Claim left unsettled");
                self.unsettled.lock().insert(id.clone());
                false
            }
        }
    }

    async fn settle_claim(&self, id: &OperationId, now: u64) -> GatewayResult<()> {
        let Some(op) = self.gateway.store().get(id).await? else {
            return Ok(());
        };
        match op.status {
            OperationStatus::InFlight => {
                self.gateway.store().release_claim(id, now).await?;
                info!(operation_id = %id, retry_count = op.retry_count, "Claim returned to pending");
            }
            // Delivered, but the record outlived its deletion.
            OperationStatus::Completed => {
                self.gateway.store().delete(id).await?;
            }
            OperationStatus::Pending | OperationStatus::FailedPermanent => {}
        }
        Ok(())
    }

    async fn settle_stranded(&self, now: u64, report: &mut ScanReport) {
        let stranded: Vec<OperationId> = self.unsettled.lock().iter().cloned().collect();
        for id in stranded {
            if self.hand_back_claim(&id, now).await {
                report.released += 1;
            }
        }
    }

    async fn complete(&self, op: &QueuedOperation, status: u16, now: u64) -> GatewayResult<()> {
        self.gateway
            .store()
            .update(&op.id, |o| {
                o.status = OperationStatus::Completed;
                o.last_attempt_at = Some(now);
                o.updated_at = now;
                Ok(())
            })
            .await?;
        info!(operation_id = %op.id, status, retry_count = op.retry_count, "Queued operation delivered");
        self.gateway.emit(GatewayEvent::Delivered {
            operation_id: op.id.clone(),
            status,
        });
        self.gateway.store().delete(&op.id).await?;
        Ok(())
    }

    async fn reschedule(&self, op: &QueuedOperation, error: String, now: u64) -> GatewayResult<()> {
        let retry_count = op.retry_count.saturating_add(1);
        let unit = self.gateway.random_unit().await;
        let next_attempt_at = self.gateway.backoff().next_attempt_at(now, retry_count, unit);

        self.gateway
            .store()
            .update(&op.id, |o| {
                o.status = OperationStatus::Pending;
                o.retry_count = retry_count;
                o.last_attempt_at = Some(now);
                o.next_attempt_at = Some(next_attempt_at);
                o.last_error = Some(error.clone());
                o.updated_at = now;
                Ok(())
            })
            .await?;

        info!(
            operation_id = %op.id,
            retry_count,
            next_attempt_in_ms = next_attempt_at.saturating_sub(now),
            error = %error,
            "Delivery failed, rescheduled"
        );
        self.gateway.emit(GatewayEvent::DeliveryFailed {
            operation_id: op.id.clone(),
            error,
        });
        Ok(())
    }

    fn permanently_failed(&self, id: &OperationId, error: String) {
        self.gateway.emit(GatewayEvent::DeliveryFailed {
            operation_id: id.clone(),
            error,
        });
        self.gateway.emit(GatewayEvent::PermanentlyFailed {
            operation_id: id.clone(),
        });
    }

    /// Run scans in the background until the handle is shut down.
    ///
    /// Wakes on the poll interval and whenever the connectivity signal turns
    /// online. Scan errors are logged and the loop keeps going.
    pub fn spawn(self: Arc<Self>) -> SchedulerHandle {
        let (shutdown, mut shutdown_rx) = watch::channel(false);
        let mut online_rx = self.gateway.connectivity().subscribe();
        let poll_interval = self.gateway.config().retry.poll_interval();

        let join = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(poll_interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            info!(poll_interval_ms = poll_interval.as_millis() as u64, "Retry scheduler started");

            loop {
                let trigger = tokio::select! {
                    _ = ticker.tick() => ScanTrigger::Poll,
                    changed = online_rx.changed() => {
                        if changed.is_err() {
                            break;
                        }
                        if !*online_rx.borrow_and_update() {
                            continue;
                        }
                        ScanTrigger::Reconnect
                    }
                    _ = shutdown_rx.changed() => break,
                };
                debug!(?trigger, "Retry scheduler woke");
                if let Err(err) = self.run_once(trigger).await {
                    error!(error = %err, "Retry scan failed");
                }
            }
            info!("Retry scheduler stopped");
        });

        SchedulerHandle { shutdown, join }
    }
}
