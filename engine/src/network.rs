//! Network lifecycle monitoring.
//!
//! [`Connectivity`] is the signal source: an "is online" flag plus a stream
//! of lifecycle events. [`NetworkMonitor`] listens to it and decides when
//! the coordinator should drain; it owns no sync logic itself.

use crate::{
    coordinator::SyncCoordinator,
    notify::{Notice, NoticeLevel, Notifier},
    router::{FallbackRouter, RouterMode},
};
use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::sync::{broadcast, watch};
use tokio::task::JoinHandle;
use tokio::time::Sleep;

/// A connectivity or visibility transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifecycleEvent {
    Online,
    Offline,
    /// The app came back to the foreground
    VisibilityRegained,
}

struct Signals {
    online: watch::Sender<bool>,
    events: broadcast::Sender<LifecycleEvent>,
}

/// Shared connectivity state.
///
/// Clones observe and drive the same state. Events are only emitted for
/// real transitions: setting the current value again is silent.
#[derive(Clone)]
pub struct Connectivity {
    signals: Arc<Signals>,
}

impl Connectivity {
    pub fn new(online: bool) -> Self {
        let (online, _) = watch::channel(online);
        let (events, _) = broadcast::channel(32);
        Self {
            signals: Arc::new(Signals { online, events }),
        }
    }

    pub fn is_online(&self) -> bool {
        *self.signals.online.borrow()
    }

    /// Record the current network state.
    pub fn set_online(&self, online: bool) {
        let changed = self.signals.online.send_if_modified(|current| {
            if *current == online {
                false
            } else {
                *current = online;
                true
            }
        });
        if changed {
            let event = if online {
                LifecycleEvent::Online
            } else {
                LifecycleEvent::Offline
            };
            tracing::debug!(?event, "Connectivity changed");
            let _ = self.signals.events.send(event);
        }
    }

    /// Report that the app is visible again.
    pub fn visibility_regained(&self) {
        let _ = self.signals.events.send(LifecycleEvent::VisibilityRegained);
    }

    pub fn subscribe(&self) -> broadcast::Receiver<LifecycleEvent> {
        self.signals.events.subscribe()
    }

    /// Follow the online flag.
    pub fn watch(&self) -> watch::Receiver<bool> {
        self.signals.online.subscribe()
    }
}

impl Default for Connectivity {
    fn default() -> Self {
        Self::new(true)
    }
}

/// Triggers drains on favorable lifecycle transitions.
///
/// - online: wait for the settle delay (restarted by every further online
///   event), reconnect the router if it is offline, then drain
/// - visibility regained while online: drain only if work is pending
/// - offline: cancel any pending drain and tell the user work will queue
///
/// If the listener falls behind and events are dropped, it re-reads the
/// online flag and re-arms or cancels the settle timer to match.
pub struct NetworkMonitor {
    coordinator: Arc<SyncCoordinator>,
    router: Option<FallbackRouter>,
    connectivity: Connectivity,
    notifier: Arc<dyn Notifier>,
    settle_delay: Duration,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl NetworkMonitor {
    pub fn new(
        coordinator: Arc<SyncCoordinator>,
        connectivity: Connectivity,
        notifier: Arc<dyn Notifier>,
        settle_delay: Duration,
    ) -> Self {
        Self {
            coordinator,
            router: None,
            connectivity,
            notifier,
            settle_delay,
            task: Mutex::new(None),
        }
    }

    /// Also reconcile the whole-dataset path on reconnect.
    pub fn with_router(mut self, router: FallbackRouter) -> Self {
        self.router = Some(router);
        self
    }

    fn task(&self) -> MutexGuard<'_, Option<JoinHandle<()>>> {
        self.task.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn is_running(&self) -> bool {
        self.task().as_ref().is_some_and(|t| !t.is_finished())
    }

    /// Start listening. Calling it again while running does nothing and
    /// returns `false`. Must be called from within a tokio runtime.
    pub fn start(&self) -> bool {
        let mut task = self.task();
        if task.as_ref().is_some_and(|t| !t.is_finished()) {
            return false;
        }

        let events = self.connectivity.subscribe();
        let listener = Listener {
            coordinator: self.coordinator.clone(),
            router: self.router.clone(),
            connectivity: self.connectivity.clone(),
            notifier: self.notifier.clone(),
            settle_delay: self.settle_delay,
        };
        *task = Some(tokio::spawn(listener.run(events)));
        tracing::debug!("Network monitor started");
        true
    }

    /// Stop listening; returns `false` if it was not running.
    pub fn stop(&self) -> bool {
        match self.task().take() {
            Some(handle) => {
                handle.abort();
                tracing::debug!("Network monitor stopped");
                true
            }
            None => false,
        }
    }
}

impl Drop for NetworkMonitor {
    fn drop(&mut self) {
        if let Some(handle) = self.task().take() {
            handle.abort();
        }
    }
}

struct Listener {
    coordinator: Arc<SyncCoordinator>,
    router: Option<FallbackRouter>,
    connectivity: Connectivity,
    notifier: Arc<dyn Notifier>,
    settle_delay: Duration,
}

impl Listener {
    async fn run(self, mut events: broadcast::Receiver<LifecycleEvent>) {
        let mut settle: Option<Pin<Box<Sleep>>> = None;

        loop {
            tokio::select! {
                event = events.recv() => match event {
                    Ok(LifecycleEvent::Online) => {
                        settle = Some(Box::pin(tokio::time::sleep(self.settle_delay)));
                    }
                    Ok(LifecycleEvent::Offline) => {
                        settle = None;
                        self.notifier.notify(Notice::new(
                            NoticeLevel::Info,
                            "You are offline; changes will be queued and synced later",
                        ));
                    }
                    Ok(LifecycleEvent::VisibilityRegained) => self.on_visible().await,
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        // A dropped transition is recovered from the current flag
                        let online = self.connectivity.is_online();
                        tracing::warn!(skipped, online, "Lifecycle events dropped");
                        settle = online.then(|| Box::pin(tokio::time::sleep(self.settle_delay)));
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                },
                _ = wait(&mut settle) => {
                    settle = None;
                    self.on_settled().await;
                }
            }
        }
    }

    async fn on_settled(&self) {
        if !self.connectivity.is_online() {
            return;
        }

        if let Some(router) = &self.router {
            if router.mode() == RouterMode::OfflineLocal {
                if let Err(e) = router.reconnect().await {
                    tracing::warn!(error = %e, "Router reconnect failed");
                }
            }
        }

        self.drain().await;
    }

    async fn on_visible(&self) {
        if !self.connectivity.is_online() {
            return;
        }
        match self.coordinator.queue().has_pending().await {
            Ok(true) => self.drain().await,
            Ok(false) => tracing::trace!("Visible again, nothing pending"),
            Err(e) => tracing::error!(error = %e, "Could not inspect queue"),
        }
    }

    async fn drain(&self) {
        match self.coordinator.sync_to_cloud().await {
            Ok(report) => tracing::debug!(?report, "Triggered sync finished"),
            Err(e) => tracing::error!(error = %e, "Triggered sync failed"),
        }
    }
}

/// Resolve when the armed timer fires; never resolve when disarmed.
fn wait(timer: &mut Option<Pin<Box<Sleep>>>) -> impl Future<Output = ()> + '_ {
    async move {
        match timer {
            Some(sleep) => sleep.await,
            None => std::future::pending().await,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn transitions_emit_once() {
        let connectivity = Connectivity::new(false);
        let mut events = connectivity.subscribe();

        connectivity.set_online(true);
        connectivity.set_online(true);
        connectivity.visibility_regained();
        connectivity.set_online(false);

        assert_eq!(events.recv().await.unwrap(), LifecycleEvent::Online);
        assert_eq!(events.recv().await.unwrap(), LifecycleEvent::VisibilityRegained);
        assert_eq!(events.recv().await.unwrap(), LifecycleEvent::Offline);
        assert!(events.try_recv().is_err());
        assert!(!connectivity.is_online());
    }

    #[tokio::test]
    async fn watchers_see_latest_state() {
        let connectivity = Connectivity::default();
        let mut watcher = connectivity.watch();
        assert!(*watcher.borrow());

        connectivity.set_online(false);
        watcher.changed().await.unwrap();
        assert!(!*watcher.borrow_and_update());
    }
}
