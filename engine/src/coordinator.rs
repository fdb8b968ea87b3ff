//! Sync coordinator.
//!
//! Drains the operation queue against the remote store. A drain takes every
//! pending operation, sorts it oldest first and replays it strictly one at a
//! time; each outcome updates or removes the queue entry before the next
//! operation starts.

use crate::{
    config::SyncConfig,
    error::{RemoteError, Result},
    executor::Executor,
    lock::{DatasetLock, LockHolder},
    network::Connectivity,
    notify::{Notice, NoticeLevel, Notifier},
    queue::{OperationQueue, QueueStats},
    remote::RemoteStore,
    Error, NewOperation, OperationStatus, QueueId, QueuedOperation,
};
use serde::Serialize;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// Why a drain did not run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SkipReason {
    AlreadySyncing,
    Offline,
}

/// Outcome of one call to [`SyncCoordinator::sync_to_cloud`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct SyncReport {
    /// Operations confirmed by the remote, duplicates included
    pub success: usize,
    /// Operations that failed this drain, parked ones included
    pub failed: usize,
    /// Failures that exhausted the retry budget
    pub parked: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub skipped: Option<SkipReason>,
}

impl SyncReport {
    fn skipped(reason: SkipReason) -> Self {
        Self {
            skipped: Some(reason),
            ..Self::default()
        }
    }

    pub fn is_empty(&self) -> bool {
        self.success == 0 && self.failed == 0
    }
}

enum Outcome {
    Synced,
    Duplicate,
    Retry,
    Parked,
}

/// Resets the in-flight flag however the drain ends.
struct SyncingFlag<'a>(&'a AtomicBool);

impl Drop for SyncingFlag<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

/// Drives the queue to empty against the remote store.
pub struct SyncCoordinator {
    queue: Arc<OperationQueue>,
    executor: Executor,
    connectivity: Connectivity,
    notifier: Arc<dyn Notifier>,
    lock: DatasetLock,
    max_retries: u32,
    operation_timeout: Duration,
    syncing: AtomicBool,
    started: AtomicBool,
}

impl SyncCoordinator {
    pub fn new(
        queue: Arc<OperationQueue>,
        remote: Arc<dyn RemoteStore>,
        connectivity: Connectivity,
        notifier: Arc<dyn Notifier>,
        lock: DatasetLock,
        config: &SyncConfig,
    ) -> Self {
        Self {
            queue,
            executor: Executor::new(remote),
            connectivity,
            notifier,
            lock,
            max_retries: config.max_retries,
            operation_timeout: config.operation_timeout,
            syncing: AtomicBool::new(false),
            started: AtomicBool::new(false),
        }
    }

    /// Prepare the queue for draining.
    ///
    /// The first call returns operations left `syncing` by an interrupted
    /// drain to `pending`; later calls do nothing.
    pub async fn start(&self) -> Result<usize> {
        if self.started.swap(true, Ordering::SeqCst) {
            return Ok(0);
        }
        match self.queue.recover_interrupted().await {
            Ok(n) => Ok(n),
            Err(e) => {
                self.started.store(false, Ordering::SeqCst);
                Err(e)
            }
        }
    }

    pub fn queue(&self) -> &Arc<OperationQueue> {
        &self.queue
    }

    pub fn is_syncing(&self) -> bool {
        self.syncing.load(Ordering::SeqCst)
    }

    /// Durably queue a mutation. The mutation counts as applied once this
    /// returns.
    pub async fn enqueue(&self, op: NewOperation) -> Result<QueueId> {
        self.queue.add_operation(op).await
    }

    pub async fn stats(&self) -> Result<QueueStats> {
        self.queue.stats().await
    }

    pub async fn purge_failed(&self) -> Result<usize> {
        self.queue.purge_failed().await
    }

    pub async fn retry_failed(&self) -> Result<usize> {
        self.queue.retry_failed().await
    }

    /// Drain the queue once.
    ///
    /// Returns at once with a skipped report when a drain is already running
    /// or the device is offline. One operation failing never stops the
    /// drain; only an authentication failure or a queue storage failure
    /// ends it early, as an error.
    pub async fn sync_to_cloud(&self) -> Result<SyncReport> {
        if self
            .syncing
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            tracing::debug!("Sync already in progress, skipping");
            return Ok(SyncReport::skipped(SkipReason::AlreadySyncing));
        }
        let _flag = SyncingFlag(&self.syncing);

        if !self.connectivity.is_online() {
            tracing::debug!("Offline, skipping sync");
            return Ok(SyncReport::skipped(SkipReason::Offline));
        }

        let _guard = self.lock.acquire(LockHolder::Drain).await;

        let mut pending = self.queue.pending_operations().await?;
        pending.sort();

        if pending.is_empty() {
            return Ok(SyncReport::default());
        }
        tracing::info!(count = pending.len(), "Draining operation queue");

        let mut report = SyncReport::default();
        for op in pending {
            match self.replay(op).await {
                Ok(Outcome::Synced | Outcome::Duplicate) => report.success += 1,
                Ok(Outcome::Retry) => report.failed += 1,
                Ok(Outcome::Parked) => {
                    report.failed += 1;
                    report.parked += 1;
                }
                Err(e) => {
                    if e.is_fatal() {
                        self.notifier
                            .notify(Notice::new(NoticeLevel::Error, fatal_message(&e)));
                    }
                    return Err(e);
                }
            }
        }

        tracing::info!(
            success = report.success,
            failed = report.failed,
            parked = report.parked,
            "Sync finished"
        );
        self.announce(&report);
        Ok(report)
    }

    async fn replay(&self, op: QueuedOperation) -> Result<Outcome> {
        let Some(op) = self
            .queue
            .update_operation_status(op.id, OperationStatus::Syncing, None)
            .await?
        else {
            // Resolved elsewhere since the scan
            return Ok(Outcome::Synced);
        };

        let result = match tokio::time::timeout(self.operation_timeout, self.executor.execute(&op))
            .await
        {
            Ok(result) => result,
            Err(_) => Err(RemoteError::Timeout(self.operation_timeout.as_millis() as u64)),
        };

        match result {
            Ok(()) => {
                self.queue.delete_operation(op.id).await?;
                tracing::debug!(op_id = op.id, op_type = %op.op_type, "Operation synced");
                Ok(Outcome::Synced)
            }
            Err(e) if e.is_duplicate() => {
                self.queue.delete_operation(op.id).await?;
                tracing::debug!(
                    op_id = op.id,
                    op_type = %op.op_type,
                    error = %e,
                    "Remote already holds this operation"
                );
                Ok(Outcome::Duplicate)
            }
            Err(RemoteError::NotAuthenticated) => {
                // Not the operation's fault; leave its budget alone
                self.queue
                    .update_operation_status(op.id, OperationStatus::Pending, None)
                    .await?;
                Err(Error::NotAuthenticated)
            }
            Err(e) if op.retry_count.saturating_add(1) >= self.max_retries => {
                tracing::warn!(
                    op_id = op.id,
                    op_type = %op.op_type,
                    retry_count = op.retry_count,
                    error = %e,
                    "Retry budget exhausted, parking operation"
                );
                self.queue
                    .update_operation_status(op.id, OperationStatus::Failed, Some(e.to_string()))
                    .await?;
                Ok(Outcome::Parked)
            }
            Err(e) => {
                tracing::warn!(
                    op_id = op.id,
                    op_type = %op.op_type,
                    retry_count = op.retry_count,
                    error = %e,
                    "Operation failed, will retry"
                );
                self.queue
                    .update_operation_status(op.id, OperationStatus::Pending, Some(e.to_string()))
                    .await?;
                Ok(Outcome::Retry)
            }
        }
    }

    fn announce(&self, report: &SyncReport) {
        if report.is_empty() {
            return;
        }
        let notice = if report.failed == 0 {
            Notice::new(
                NoticeLevel::Success,
                format!("Synced {} offline operation(s)", report.success),
            )
        } else {
            Notice::new(
                NoticeLevel::Warning,
                format!(
                    "Synced {} operation(s), {} failed",
                    report.success, report.failed
                ),
            )
        };
        self.notifier.notify(notice);
    }
}

fn fatal_message(e: &Error) -> String {
    match e {
        Error::NotAuthenticated | Error::Remote(RemoteError::NotAuthenticated) => {
            "Sync stopped: please sign in again".to_string()
        }
        other => format!("Sync stopped: {}", other),
    }
}
