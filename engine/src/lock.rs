//! Advisory lock over the owner's remote dataset.
//!
//! The queue drain, whole-dataset load/save and bulk import all write to
//! overlapping remote rows. Each holds the same [`DatasetLock`] for the
//! duration of its remote writes so they never interleave.

use std::sync::Arc;
use tokio::sync::{Mutex, OwnedMutexGuard};

/// Which path currently holds the lock.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LockHolder {
    Drain,
    Document,
    Import,
}

/// A cloneable handle to one shared lock.
#[derive(Debug, Clone, Default)]
pub struct DatasetLock {
    inner: Arc<Mutex<()>>,
}

/// Proof of holding the dataset lock; released on drop.
#[derive(Debug)]
pub struct DatasetGuard {
    _guard: OwnedMutexGuard<()>,
    holder: LockHolder,
}

impl DatasetGuard {
    pub fn holder(&self) -> LockHolder {
        self.holder
    }
}

impl DatasetLock {
    pub fn new() -> Self {
        Self::default()
    }

    /// Wait for the lock.
    pub async fn acquire(&self, holder: LockHolder) -> DatasetGuard {
        tracing::trace!(?holder, "Waiting for dataset lock");
        let guard = self.inner.clone().lock_owned().await;
        DatasetGuard {
            _guard: guard,
            holder,
        }
    }

    /// Take the lock only if it is free.
    pub fn try_acquire(&self, holder: LockHolder) -> Option<DatasetGuard> {
        let guard = self.inner.clone().try_lock_owned().ok()?;
        Some(DatasetGuard {
            _guard: guard,
            holder,
        })
    }

    pub fn is_held(&self) -> bool {
        self.inner.try_lock().is_err()
    }
}
