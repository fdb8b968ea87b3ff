//! Batch import and export.
//!
//! Import is a destructive replace-all restore from a [`BackupSnapshot`]:
//!
//! 1. delete every remote record of every entity, all entities at once
//! 2. batch-insert each entity's records in chunks, reporting progress
//! 3. reload, so every other component re-derives its state from the remote
//!
//! Nothing runs until the caller turns an [`ImportPlan`] into a
//! [`ConfirmedImport`]. A failing chunk is logged and skipped; the remaining
//! chunks still go out.

use crate::{
    config::SyncConfig,
    error::{RemoteError, Result},
    local::LocalBackups,
    lock::{DatasetLock, LockHolder},
    notify::{Notice, NoticeLevel, Notifier},
    record::Entity,
    remote::RemoteStore,
    router::Reloader,
    snapshot::BackupSnapshot,
    Error, Schema,
};
use futures::future::join_all;
use serde::Serialize;
use std::sync::Arc;

/// Phase of a running import.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ImportPhase {
    Clearing,
    Inserting,
    Reloading,
    Done,
}

/// A progress update from a running import.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ImportProgress {
    pub phase: ImportPhase,
    /// 0 to 100, never decreasing within one import
    pub percent: u8,
    pub message: String,
}

/// Record counts and a description of what an import would do.
#[derive(Debug, Clone)]
pub struct ImportPlan {
    snapshot: BackupSnapshot,
    counts: Vec<(Entity, usize)>,
}

impl ImportPlan {
    /// Records per entity that the import would write.
    pub fn counts(&self) -> &[(Entity, usize)] {
        &self.counts
    }

    pub fn total(&self) -> usize {
        self.counts.iter().map(|(_, n)| n).sum()
    }

    /// Text to show the user before asking for confirmation.
    pub fn description(&self) -> String {
        let counts = self
            .counts
            .iter()
            .map(|(entity, n)| format!("{} {}", n, entity))
            .collect::<Vec<_>>()
            .join(", ");
        format!(
            "This deletes ALL data stored in the cloud and replaces it with the backup \
             ({}). It cannot be undone. Export a fresh backup first.",
            counts
        )
    }

    /// Record the user's answer. Anything but an explicit yes is refused.
    pub fn confirm(self, accepted: bool) -> Result<ConfirmedImport> {
        if !accepted {
            return Err(Error::ConfirmationRequired);
        }
        Ok(ConfirmedImport { plan: self })
    }
}

/// An import plan the user agreed to.
#[derive(Debug, Clone)]
pub struct ConfirmedImport {
    plan: ImportPlan,
}

impl ConfirmedImport {
    pub fn plan(&self) -> &ImportPlan {
        &self.plan
    }
}

/// Outcome of a finished import.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ImportReport {
    /// Remote records removed in phase 1
    pub deleted: u64,
    /// Entities whose delete-all failed
    pub failed_deletes: usize,
    pub inserted: usize,
    /// Records the schema refused
    pub skipped_records: usize,
    pub failed_chunks: usize,
    pub profile_restored: bool,
    pub reloaded: bool,
}

/// Restores and exports whole datasets through the per-record remote store.
pub struct ImportPipeline {
    remote: Arc<dyn RemoteStore>,
    schema: Schema,
    lock: DatasetLock,
    notifier: Arc<dyn Notifier>,
    reloader: Option<Arc<dyn Reloader>>,
    chunk_size: usize,
}

impl ImportPipeline {
    pub fn new(
        remote: Arc<dyn RemoteStore>,
        schema: Schema,
        lock: DatasetLock,
        notifier: Arc<dyn Notifier>,
        config: &SyncConfig,
    ) -> Self {
        Self {
            remote,
            schema,
            lock,
            notifier,
            reloader: None,
            chunk_size: config.chunk_size(),
        }
    }

    /// Reload through `reloader` once records are written.
    pub fn with_reloader(mut self, reloader: Arc<dyn Reloader>) -> Self {
        self.reloader = Some(reloader);
        self
    }

    pub fn chunk_size(&self) -> usize {
        self.chunk_size
    }

    /// Describe the import of `snapshot` without touching anything.
    pub fn plan(&self, snapshot: BackupSnapshot) -> ImportPlan {
        let counts = Entity::ALL
            .iter()
            .map(|entity| (*entity, snapshot.records(*entity).len()))
            .collect();
        ImportPlan { snapshot, counts }
    }

    /// Run a confirmed import.
    ///
    /// `progress` is called with monotonically increasing percentages.
    /// Only an authentication failure aborts the run.
    pub async fn run<F>(&self, confirmed: ConfirmedImport, mut progress: F) -> Result<ImportReport>
    where
        F: FnMut(ImportProgress) + Send,
    {
        let snapshot = confirmed.plan.snapshot;
        let mut report = ImportReport::default();
        let mut tracker = ProgressTracker::default();

        {
            let _guard = self.lock.acquire(LockHolder::Import).await;

            progress(tracker.update(ImportPhase::Clearing, 0, "Deleting cloud data"));
            self.clear_all(&mut report).await?;
            progress(tracker.update(ImportPhase::Clearing, 10, "Cloud data deleted"));

            let mut batches = Vec::new();
            for entity in Entity::ALL {
                let (records, rejected) = snapshot.valid_records(entity, &self.schema);
                report.skipped_records += rejected;
                batches.push((entity, records));
            }

            let total: usize = batches.iter().map(|(_, r)| r.len()).sum();
            let mut written = 0usize;

            for (entity, records) in batches {
                for chunk in records.chunks(self.chunk_size) {
                    match self.remote.insert_batch(entity, chunk.to_vec()).await {
                        Ok(n) => report.inserted += n,
                        Err(RemoteError::NotAuthenticated) => return Err(Error::NotAuthenticated),
                        Err(e) => {
                            tracing::warn!(
                                entity = %entity,
                                size = chunk.len(),
                                error = %e,
                                "Import chunk failed, skipping"
                            );
                            report.failed_chunks += 1;
                        }
                    }
                    written += chunk.len();
                    let percent = 10 + (80 * written / total.max(1)) as u8;
                    progress(tracker.update(
                        ImportPhase::Inserting,
                        percent,
                        format!("Restoring {} ({}/{})", entity, written, total),
                    ));
                }
            }

            if !snapshot.user.is_null() {
                match self.remote.save_profile(snapshot.user.clone()).await {
                    Ok(()) => report.profile_restored = true,
                    Err(RemoteError::NotAuthenticated) => return Err(Error::NotAuthenticated),
                    Err(e) => tracing::warn!(error = %e, "Restoring profile failed"),
                }
            }
        }

        progress(tracker.update(ImportPhase::Reloading, 90, "Reloading"));
        if let Some(reloader) = &self.reloader {
            match reloader.reload().await {
                Ok(()) => report.reloaded = true,
                Err(e) => tracing::warn!(error = %e, "Reload after import failed"),
            }
        }
        progress(tracker.update(ImportPhase::Done, 100, "Import complete"));

        tracing::info!(
            deleted = report.deleted,
            inserted = report.inserted,
            skipped = report.skipped_records,
            failed_chunks = report.failed_chunks,
            "Import finished"
        );
        let notice = if report.failed_chunks == 0 && report.failed_deletes == 0 {
            Notice::new(
                NoticeLevel::Success,
                format!("Restored {} records", report.inserted),
            )
        } else {
            Notice::new(
                NoticeLevel::Warning,
                format!(
                    "Restored {} records, {} batch(es) failed",
                    report.inserted, report.failed_chunks
                ),
            )
        };
        self.notifier.notify(notice);

        Ok(report)
    }

    async fn clear_all(&self, report: &mut ImportReport) -> Result<()> {
        let results = join_all(Entity::ALL.map(|entity| async move {
            (entity, self.remote.delete_all(entity).await)
        }))
        .await;

        for (entity, result) in results {
            match result {
                Ok(n) => report.deleted += n,
                Err(RemoteError::NotAuthenticated) => return Err(Error::NotAuthenticated),
                Err(e) => {
                    tracing::warn!(entity = %entity, error = %e, "Deleting remote records failed");
                    report.failed_deletes += 1;
                }
            }
        }
        Ok(())
    }

    /// Read every remote record and the profile into a snapshot.
    pub async fn export_snapshot(&self) -> Result<BackupSnapshot> {
        let mut snapshot = BackupSnapshot::new(chrono::Utc::now());
        for entity in Entity::ALL {
            *snapshot.records_mut(entity) = self.remote.list_all(entity, None).await?;
        }
        snapshot.user = self.remote.fetch_profile().await?;
        tracing::info!(records = snapshot.record_count(), "Exported snapshot");
        Ok(snapshot)
    }

    /// Export and keep the result as the latest local backup.
    pub async fn backup_locally(&self, backups: &LocalBackups) -> Result<BackupSnapshot> {
        let snapshot = self.export_snapshot().await?;
        backups.save(&snapshot).await?;
        Ok(snapshot)
    }
}

#[derive(Default)]
struct ProgressTracker {
    last: u8,
}

impl ProgressTracker {
    fn update(&mut self, phase: ImportPhase, percent: u8, message: impl Into<String>) -> ImportProgress {
        self.last = self.last.max(percent.min(100));
        ImportProgress {
            phase,
            percent: self.last,
            message: message.into(),
        }
    }
}
