//! Remote fallback router for the whole-dataset path.
//!
//! Loads and saves the full [`LedgerDocument`] through a [`DocumentStore`],
//! normally the record collections seen as one document, and falls back to the local mirror whenever the remote cannot be
//! reached. On the next successful load the mirror wins: edits made offline
//! are pushed over whatever the remote holds, then the mirror is cleared.
//!
//! State machine: `Loading` -> `OnlineSynced` | `OfflineLocal`. A failed
//! save moves `OnlineSynced` to `OfflineLocal`; a successful load or forced
//! save moves back.

use crate::{
    config::SyncConfig,
    error::{RemoteError, Result},
    local::LocalMirror,
    lock::{DatasetLock, LockHolder},
    notify::{Notice, NoticeLevel, Notifier},
    remote::DocumentStore,
    Error, LedgerDocument,
};
use async_trait::async_trait;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{watch, Mutex};
use tokio::task::JoinHandle;

/// Where the router currently reads and writes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RouterMode {
    Loading,
    OnlineSynced,
    OfflineLocal,
}

/// Where a save ended up.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SaveOutcome {
    Remote,
    Local,
}

/// Something that can throw away derived state and load afresh from the
/// authoritative remote.
#[async_trait]
pub trait Reloader: Send + Sync {
    async fn reload(&self) -> Result<()>;
}

struct RouterInner {
    remote: Arc<dyn DocumentStore>,
    mirror: LocalMirror,
    notifier: Arc<dyn Notifier>,
    lock: DatasetLock,
    remote_timeout: Duration,
    save_debounce: Duration,
    mode: watch::Sender<RouterMode>,
    document: Mutex<LedgerDocument>,
    loading: AtomicBool,
    scheduled: Mutex<Option<JoinHandle<()>>>,
}

/// Routes whole-dataset loads and saves to the remote or the local mirror.
///
/// Cheap to clone; clones share state.
#[derive(Clone)]
pub struct FallbackRouter {
    inner: Arc<RouterInner>,
}

impl FallbackRouter {
    pub fn new(
        remote: Arc<dyn DocumentStore>,
        mirror: LocalMirror,
        notifier: Arc<dyn Notifier>,
        lock: DatasetLock,
        config: &SyncConfig,
    ) -> Self {
        let (mode, _) = watch::channel(RouterMode::Loading);
        Self {
            inner: Arc::new(RouterInner {
                remote,
                mirror,
                notifier,
                lock,
                remote_timeout: config.remote_timeout,
                save_debounce: config.save_debounce,
                mode,
                document: Mutex::new(LedgerDocument::default()),
                loading: AtomicBool::new(false),
                scheduled: Mutex::new(None),
            }),
        }
    }

    pub fn mode(&self) -> RouterMode {
        *self.inner.mode.borrow()
    }

    /// Follow mode changes.
    pub fn subscribe_mode(&self) -> watch::Receiver<RouterMode> {
        self.inner.mode.subscribe()
    }

    pub fn is_loading(&self) -> bool {
        self.inner.loading.load(Ordering::SeqCst)
    }

    /// A copy of the current document.
    pub async fn document(&self) -> LedgerDocument {
        self.inner.document.lock().await.clone()
    }

    /// Apply an edit to the current document and schedule a save.
    pub async fn update<F>(&self, edit: F)
    where
        F: FnOnce(&mut LedgerDocument),
    {
        {
            let mut document = self.inner.document.lock().await;
            edit(&mut document);
            document.ensure_item_ids();
        }
        self.schedule_save().await;
    }

    fn set_mode(&self, mode: RouterMode) {
        let previous = self.inner.mode.send_replace(mode);
        if previous != mode {
            tracing::info!(from = ?previous, to = ?mode, "Router mode changed");
        }
    }

    /// Load the document, preferring the remote.
    ///
    /// A local mirror left by an offline session takes precedence over the
    /// remote copy and is pushed immediately. Only an authentication failure
    /// is returned as an error; the router still falls back to local data
    /// first.
    pub async fn load_data(&self) -> Result<RouterMode> {
        self.inner.loading.store(true, Ordering::SeqCst);
        self.set_mode(RouterMode::Loading);
        let result = self.load_locked().await;
        self.inner.loading.store(false, Ordering::SeqCst);
        result
    }

    async fn load_locked(&self) -> Result<RouterMode> {
        let inner = &self.inner;
        let _guard = inner.lock.acquire(LockHolder::Document).await;

        let fetched = match tokio::time::timeout(inner.remote_timeout, inner.remote.load_document())
            .await
        {
            Ok(result) => result,
            Err(_) => Err(RemoteError::Timeout(inner.remote_timeout.as_millis() as u64)),
        };

        let remote_document = match fetched {
            Ok(document) => document.unwrap_or_default(),
            Err(e) => return self.fall_back(e).await,
        };

        let local = match inner.mirror.load().await {
            Ok(local) => local,
            Err(e) => {
                tracing::error!(error = %e, "Failed to read local mirror");
                inner.notifier.notify(Notice::new(
                    NoticeLevel::Error,
                    format!("Could not read offline data: {}", e),
                ));
                None
            }
        };

        let Some(mut local) = local else {
            let mut document = remote_document;
            document.ensure_item_ids();
            *inner.document.lock().await = document;
            self.set_mode(RouterMode::OnlineSynced);
            tracing::info!("Loaded ledger from remote");
            return Ok(RouterMode::OnlineSynced);
        };

        tracing::info!("Local mirror found, pushing offline changes");
        local.ensure_item_ids();
        *inner.document.lock().await = local.clone();

        match self.push(&local).await {
            Ok(()) => {
                if let Err(e) = inner.mirror.clear().await {
                    tracing::warn!(error = %e, "Failed to clear local mirror");
                }
                self.set_mode(RouterMode::OnlineSynced);
                inner.notifier.notify(Notice::new(
                    NoticeLevel::Success,
                    "Offline changes synced to the cloud",
                ));
                Ok(RouterMode::OnlineSynced)
            }
            Err(e) => {
                tracing::warn!(error = %e, "Pushing offline changes failed");
                self.set_mode(RouterMode::OfflineLocal);
                if e == RemoteError::NotAuthenticated {
                    return Err(Error::NotAuthenticated);
                }
                Ok(RouterMode::OfflineLocal)
            }
        }
    }

    async fn fall_back(&self, cause: RemoteError) -> Result<RouterMode> {
        let inner = &self.inner;
        tracing::warn!(error = %cause, "Remote load failed, using local data");

        let document = match inner.mirror.load().await {
            Ok(Some(document)) => document,
            Ok(None) => LedgerDocument::default(),
            Err(e) => {
                tracing::error!(error = %e, "Failed to read local mirror");
                inner.notifier.notify(Notice::new(
                    NoticeLevel::Error,
                    format!("Could not read offline data: {}", e),
                ));
                LedgerDocument::default()
            }
        };

        let mut document = document;
        document.ensure_item_ids();
        *inner.document.lock().await = document;
        self.set_mode(RouterMode::OfflineLocal);

        if cause == RemoteError::NotAuthenticated {
            inner
                .notifier
                .notify(Notice::new(NoticeLevel::Error, "Please sign in to sync"));
            return Err(Error::NotAuthenticated);
        }

        inner.notifier.notify(Notice::new(
            NoticeLevel::Warning,
            "Working offline, changes are kept on this device",
        ));
        Ok(RouterMode::OfflineLocal)
    }

    async fn push(&self, document: &LedgerDocument) -> std::result::Result<(), RemoteError> {
        let inner = &self.inner;
        match tokio::time::timeout(inner.remote_timeout, inner.remote.save_document(document)).await
        {
            Ok(result) => result,
            Err(_) => Err(RemoteError::Timeout(inner.remote_timeout.as_millis() as u64)),
        }
    }

    /// Save the current document.
    ///
    /// In offline mode the document only goes to the mirror unless `force`
    /// is set. A failed remote save switches to offline mode and writes the
    /// mirror instead, so the only error left is a failing mirror.
    pub async fn save_data(&self, force: bool) -> Result<SaveOutcome> {
        let inner = &self.inner;
        let document = self.document().await;

        if self.mode() == RouterMode::OfflineLocal && !force {
            self.save_local(&document).await?;
            return Ok(SaveOutcome::Local);
        }

        let pushed = {
            let _guard = inner.lock.acquire(LockHolder::Document).await;
            self.push(&document).await
        };

        match pushed {
            Ok(()) => {
                self.set_mode(RouterMode::OnlineSynced);
                tracing::debug!("Saved ledger to remote");
                Ok(SaveOutcome::Remote)
            }
            Err(e) => {
                tracing::warn!(error = %e, "Remote save failed, switching to offline mode");
                self.set_mode(RouterMode::OfflineLocal);
                self.save_local(&document).await?;
                let notice = if e == RemoteError::NotAuthenticated {
                    Notice::new(NoticeLevel::Error, "Please sign in to sync, saved on this device")
                } else {
                    Notice::new(NoticeLevel::Warning, "Cloud save failed, saved on this device")
                };
                inner.notifier.notify(notice);
                Ok(SaveOutcome::Local)
            }
        }
    }

    async fn save_local(&self, document: &LedgerDocument) -> Result<()> {
        if let Err(e) = self.inner.mirror.save(document).await {
            tracing::error!(error = %e, "Failed to write local mirror");
            self.inner.notifier.notify(Notice::new(
                NoticeLevel::Error,
                format!("Could not save on this device: {}", e),
            ));
            return Err(e);
        }
        Ok(())
    }

    /// Save after a quiet period, coalescing calls that arrive within it.
    ///
    /// Returns `false` without scheduling while a load is in progress.
    pub async fn schedule_save(&self) -> bool {
        if self.is_loading() {
            tracing::trace!("Load in progress, not scheduling save");
            return false;
        }

        let mut scheduled = self.inner.scheduled.lock().await;
        if let Some(previous) = scheduled.take() {
            previous.abort();
        }

        let router = self.clone();
        let delay = self.inner.save_debounce;
        *scheduled = Some(tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            if router.is_loading() {
                return;
            }
            if let Err(e) = router.save_data(false).await {
                tracing::error!(error = %e, "Scheduled save failed");
            }
        }));
        true
    }

    /// Re-run the load when offline, reconciling the mirror with the remote.
    pub async fn reconnect(&self) -> Result<RouterMode> {
        match self.mode() {
            RouterMode::OfflineLocal => {
                tracing::info!("Reconnecting whole-dataset path");
                self.load_data().await
            }
            mode => Ok(mode),
        }
    }
}

#[async_trait]
impl Reloader for FallbackRouter {
    async fn reload(&self) -> Result<()> {
        self.load_data().await.map(|_| ())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::local::MemoryLocalStore;
    use crate::notify::ChannelNotifier;
    use crate::record::{Debt, Entity, LineItem};
    use crate::remote::{MemoryRemote, RecordDocuments, RemoteCall, RemoteStore};
    use serde_json::json;

    struct Harness {
        router: FallbackRouter,
        remote: Arc<MemoryRemote>,
        mirror: LocalMirror,
    }

    fn harness() -> Harness {
        let remote = Arc::new(MemoryRemote::new());
        let mirror = LocalMirror::new(Arc::new(MemoryLocalStore::new()));
        let (notifier, _rx) = ChannelNotifier::new();
        let router = FallbackRouter::new(
            Arc::new(RecordDocuments::new(remote.clone())),
            mirror.clone(),
            Arc::new(notifier),
            DatasetLock::new(),
            &SyncConfig::default(),
        );
        Harness {
            router,
            remote,
            mirror,
        }
    }

    async fn seed_debt(remote: &MemoryRemote, name: &str, amount: f64) {
        remote
            .insert_or_update(Entity::Debt, json!({"name": name, "amount": amount}))
            .await
            .unwrap();
        remote.clear_calls().await;
    }

    async fn remote_debt(remote: &MemoryRemote, name: &str) -> Option<f64> {
        remote.record(Entity::Debt, name).await?["amount"].as_f64()
    }

    fn ledger_with_debt(name: &str, amount: f64) -> LedgerDocument {
        let mut doc = LedgerDocument::default();
        doc.debts.push(Debt::new(name, amount));
        doc
    }

    #[tokio::test]
    async fn load_prefers_remote_without_mirror() {
        let h = harness();
        seed_debt(&h.remote, "张三", 300.0).await;

        assert_eq!(h.router.load_data().await.unwrap(), RouterMode::OnlineSynced);
        assert_eq!(h.router.document().await.debt("张三").unwrap().amount, 300.0);
    }

    #[tokio::test]
    async fn mirror_wins_and_is_cleared() {
        let h = harness();
        seed_debt(&h.remote, "张三", 300.0).await;
        h.mirror.save(&ledger_with_debt("张三", 500.0)).await.unwrap();

        assert_eq!(h.router.load_data().await.unwrap(), RouterMode::OnlineSynced);

        assert_eq!(remote_debt(&h.remote, "张三").await, Some(500.0));
        assert!(h.mirror.load().await.unwrap().is_none());
        assert_eq!(
            h.remote.calls().await,
            vec![
                RemoteCall::ListAll { entity: Entity::Transaction },
                RemoteCall::ListAll { entity: Entity::Debt },
                RemoteCall::InsertBatch { entity: Entity::Debt, count: 1 },
            ]
        );
    }

    #[tokio::test]
    async fn unreachable_remote_falls_back_to_mirror() {
        let h = harness();
        h.remote.set_reachable(false);
        h.mirror.save(&ledger_with_debt("李四", 20.0)).await.unwrap();

        assert_eq!(h.router.load_data().await.unwrap(), RouterMode::OfflineLocal);
        assert_eq!(h.router.document().await.debt("李四").unwrap().amount, 20.0);
    }

    #[tokio::test]
    async fn unauthenticated_load_still_has_local_data() {
        let h = harness();
        h.remote.set_authenticated(false);
        h.mirror.save(&ledger_with_debt("李四", 20.0)).await.unwrap();

        assert_eq!(h.router.load_data().await.unwrap_err(), Error::NotAuthenticated);
        assert_eq!(h.router.mode(), RouterMode::OfflineLocal);
        assert!(h.router.document().await.debt("李四").is_some());
    }

    #[tokio::test]
    async fn failed_save_flips_to_offline_and_writes_mirror() {
        let h = harness();
        h.router.load_data().await.unwrap();
        h.remote.set_reachable(false);

        {
            let mut doc = h.router.inner.document.lock().await;
            doc.debts.push(Debt::new("王五", 12.0));
        }
        assert_eq!(h.router.save_data(false).await.unwrap(), SaveOutcome::Local);
        assert_eq!(h.router.mode(), RouterMode::OfflineLocal);
        assert!(h.mirror.load().await.unwrap().unwrap().debt("王五").is_some());

        // Offline saves stay local until forced
        h.remote.set_reachable(true);
        h.remote.clear_calls().await;
        assert_eq!(h.router.save_data(false).await.unwrap(), SaveOutcome::Local);
        assert!(h.remote.calls().await.is_empty());

        assert_eq!(h.router.save_data(true).await.unwrap(), SaveOutcome::Remote);
        assert_eq!(h.router.mode(), RouterMode::OnlineSynced);
    }

    #[tokio::test]
    async fn load_assigns_missing_item_ids() {
        let h = harness();
        let mut doc = LedgerDocument::default();
        doc.history.entry("2024-05-01".into()).or_default().incomes.push(LineItem {
            id: None,
            amount: 10.0,
            category: None,
            note: None,
            extra: Default::default(),
        });
        h.mirror.save(&doc).await.unwrap();

        h.router.load_data().await.unwrap();
        let loaded = h.router.document().await;
        let id = loaded.history["2024-05-01"].incomes[0].id.clone().unwrap();

        // The pushed row is keyed by the id the item was given
        let record = h.remote.record(Entity::Transaction, &id).await.unwrap();
        assert_eq!(record["type"], "income");
        assert_eq!(record["date"], "2024-05-01");
    }

    #[tokio::test(start_paused = true)]
    async fn scheduled_saves_are_debounced() {
        let h = harness();
        h.router.load_data().await.unwrap();
        h.remote.clear_calls().await;

        for amount in [1.0, 2.0, 3.0] {
            h.router
                .update(|doc| doc.debts = vec![Debt::new("张三", amount)])
                .await;
            tokio::time::sleep(Duration::from_millis(500)).await;
        }
        assert!(h.remote.calls().await.is_empty());

        tokio::time::sleep(Duration::from_millis(1100)).await;
        assert_eq!(
            h.remote.calls().await,
            vec![RemoteCall::InsertBatch { entity: Entity::Debt, count: 1 }]
        );
        assert_eq!(remote_debt(&h.remote, "张三").await, Some(3.0));
    }

    #[tokio::test]
    async fn saves_are_not_scheduled_while_loading() {
        let h = harness();
        h.router.inner.loading.store(true, Ordering::SeqCst);
        assert!(!h.router.schedule_save().await);
    }

    #[tokio::test]
    async fn reconnect_only_reloads_when_offline() {
        let h = harness();
        h.router.load_data().await.unwrap();
        h.remote.clear_calls().await;
        assert_eq!(h.router.reconnect().await.unwrap(), RouterMode::OnlineSynced);
        assert!(h.remote.calls().await.is_empty());

        h.remote.set_reachable(false);
        h.router.save_data(false).await.unwrap();
        h.remote.set_reachable(true);
        assert!(h.mirror.load().await.unwrap().is_some());

        assert_eq!(h.router.reconnect().await.unwrap(), RouterMode::OnlineSynced);
        assert!(h.mirror.load().await.unwrap().is_none());
    }
}
