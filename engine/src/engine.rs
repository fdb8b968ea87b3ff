//! Wiring of the sync components into one engine.

use crate::{
    clock::{Clock, SystemClock},
    config::SyncConfig,
    coordinator::{SyncCoordinator, SyncReport},
    db,
    error::Result,
    import::ImportPipeline,
    local::{LocalBackups, LocalMirror, LocalStore, SqliteLocalStore},
    lock::DatasetLock,
    network::{Connectivity, NetworkMonitor},
    notify::Notifier,
    queue::{OperationQueue, OperationTable, QueueStats, SqliteTable},
    remote::{HttpRemote, RecordDocuments, RemoteStore},
    router::{FallbackRouter, RouterMode},
    Error, NewOperation, QueueId, Schema,
};
use std::sync::Arc;

/// Storage and remote backends an engine runs on.
pub struct Backends {
    pub table: Arc<dyn OperationTable>,
    pub local: Arc<dyn LocalStore>,
    pub records: Arc<dyn RemoteStore>,
    pub clock: Arc<dyn Clock>,
}

/// The assembled sync core.
pub struct SyncEngine {
    config: SyncConfig,
    connectivity: Connectivity,
    coordinator: Arc<SyncCoordinator>,
    router: FallbackRouter,
    monitor: NetworkMonitor,
    import: ImportPipeline,
    backups: LocalBackups,
}

impl SyncEngine {
    /// Open the local database named by the config and connect to the HTTP
    /// remote store.
    pub async fn open(config: SyncConfig, notifier: Arc<dyn Notifier>) -> Result<Self> {
        let remote_url = config
            .remote_url
            .as_deref()
            .ok_or_else(|| Error::Config("TALLY_REMOTE_URL is not set".into()))?;
        let remote = Arc::new(HttpRemote::new(
            remote_url,
            config.auth_token.clone(),
            config.remote_timeout,
        )?);

        let pool = db::open_pool(&config.database_url).await?;
        let clock: Arc<dyn Clock> = Arc::new(SystemClock);
        let backends = Backends {
            table: Arc::new(SqliteTable::new(pool.clone())),
            local: Arc::new(SqliteLocalStore::new(pool, clock.clone())),
            records: remote,
            clock,
        };

        tracing::info!(database = %config.database_url, remote = remote_url, "Opening sync engine");
        Ok(Self::with_backends(config, backends, notifier, Connectivity::new(true)))
    }

    /// Assemble an engine from explicit backends.
    pub fn with_backends(
        config: SyncConfig,
        backends: Backends,
        notifier: Arc<dyn Notifier>,
        connectivity: Connectivity,
    ) -> Self {
        let schema = Schema::ledger();
        let lock = DatasetLock::new();

        let queue = Arc::new(OperationQueue::new(
            backends.table,
            schema.clone(),
            backends.clock,
        ));
        let coordinator = Arc::new(SyncCoordinator::new(
            queue,
            backends.records.clone(),
            connectivity.clone(),
            notifier.clone(),
            lock.clone(),
            &config,
        ));
        let router = FallbackRouter::new(
            Arc::new(RecordDocuments::new(backends.records.clone())),
            LocalMirror::new(backends.local.clone()),
            notifier.clone(),
            lock.clone(),
            &config,
        );
        let monitor = NetworkMonitor::new(
            coordinator.clone(),
            connectivity.clone(),
            notifier.clone(),
            config.online_settle_delay,
        )
        .with_router(router.clone());
        let import = ImportPipeline::new(backends.records, schema, lock, notifier, &config)
            .with_reloader(Arc::new(router.clone()));

        Self {
            config,
            connectivity,
            coordinator,
            router,
            monitor,
            import,
            backups: LocalBackups::new(backends.local),
        }
    }

    /// Recover interrupted work, start listening for connectivity changes,
    /// load the dataset and drain anything left from a previous session.
    pub async fn start(&self) -> Result<RouterMode> {
        let recovered = self.coordinator.start().await?;
        if recovered > 0 {
            tracing::info!(recovered, "Resuming interrupted operations");
        }
        self.monitor.start();

        let mode = self.router.load_data().await?;
        if self.connectivity.is_online() && self.coordinator.queue().has_pending().await? {
            self.coordinator.sync_to_cloud().await?;
        }
        Ok(mode)
    }

    pub fn stop(&self) {
        self.monitor.stop();
    }

    pub async fn enqueue(&self, op: NewOperation) -> Result<QueueId> {
        self.coordinator.enqueue(op).await
    }

    pub async fn sync_now(&self) -> Result<SyncReport> {
        self.coordinator.sync_to_cloud().await
    }

    pub async fn stats(&self) -> Result<QueueStats> {
        self.coordinator.stats().await
    }

    pub fn config(&self) -> &SyncConfig {
        &self.config
    }

    pub fn connectivity(&self) -> &Connectivity {
        &self.connectivity
    }

    pub fn coordinator(&self) -> &Arc<SyncCoordinator> {
        &self.coordinator
    }

    pub fn router(&self) -> &FallbackRouter {
        &self.router
    }

    pub fn import(&self) -> &ImportPipeline {
        &self.import
    }

    pub fn backups(&self) -> &LocalBackups {
        &self.backups
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::local::MemoryLocalStore;
    use crate::notify::TracingNotifier;
    use crate::queue::MemoryTable;
    use crate::remote::MemoryRemote;
    use crate::OperationType;
    use serde_json::json;

    fn engine(remote: Arc<MemoryRemote>, online: bool) -> SyncEngine {
        let backends = Backends {
            table: Arc::new(MemoryTable::new()),
            local: Arc::new(MemoryLocalStore::new()),
            records: remote,
            clock: Arc::new(ManualClock::new(1)),
        };
        SyncEngine::with_backends(
            SyncConfig::default(),
            backends,
            Arc::new(TracingNotifier),
            Connectivity::new(online),
        )
    }

    #[tokio::test]
    async fn open_requires_remote_url() {
        let result = SyncEngine::open(SyncConfig::default(), Arc::new(TracingNotifier)).await;
        assert!(matches!(result, Err(Error::Config(_))));
    }

    #[tokio::test]
    async fn start_loads_and_drains_leftovers() {
        let remote = Arc::new(MemoryRemote::new());
        let engine = engine(remote.clone(), true);
        engine
            .enqueue(NewOperation::new(
                OperationType::AddDebt,
                json!({"name": "张三", "amount": 500}),
            ))
            .await
            .unwrap();

        assert_eq!(engine.start().await.unwrap(), RouterMode::OnlineSynced);
        assert_eq!(engine.stats().await.unwrap().total, 0);
        assert!(remote.record(crate::Entity::Debt, "张三").await.is_some());
        engine.stop();
    }

    #[tokio::test]
    async fn offline_start_keeps_queue() {
        let remote = Arc::new(MemoryRemote::new());
        remote.set_reachable(false);
        let engine = engine(remote, false);
        engine
            .enqueue(NewOperation::new(
                OperationType::DeleteTobacco,
                json!({"client_id": "tb_1"}),
            ))
            .await
            .unwrap();

        assert_eq!(engine.start().await.unwrap(), RouterMode::OfflineLocal);
        assert_eq!(engine.stats().await.unwrap().pending, 1);
        engine.stop();
    }
}
