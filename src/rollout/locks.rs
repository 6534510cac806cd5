use crate::error::{Result, RolloutError};
use dashmap::DashMap;
use std::sync::Arc;
use tokio::sync::{Mutex, OwnedMutexGuard};
use tracing::debug;

/// Per-host mutual exclusion for apply and rollback
///
/// Entries are created on demand and removed again when the last guard for
/// an idle host is dropped.
///
/// ```
/// use confguard::rollout::HostLocks;
///
/// let locks = HostLocks::new();
/// let guard = locks.try_acquire("web-1").unwrap();
/// assert!(locks.try_acquire("web-1").is_err());
/// drop(guard);
/// assert!(locks.try_acquire("web-1").is_ok());
///
/// tokio_test::block_on(async {
///     let _queued = locks.acquire("web-1").await;
///     assert!(locks.is_locked("web-1"));
/// });
/// ```
#[derive(Debug, Default, Clone)]
pub struct HostLocks {
    locks: Arc<DashMap<String, Arc<Mutex<()>>>>,
}

/// Proof that the holder owns a host's lock
#[derive(Debug)]
pub struct HostGuard {
    host: String,
    guard: Option<OwnedMutexGuard<()>>,
    locks: Arc<DashMap<String, Arc<Mutex<()>>>>,
}

impl HostGuard {
    pub fn host(&self) -> &str {
        &self.host
    }
}

impl Drop for HostGuard {
    fn drop(&mut self) {
        // Release the mutex before deciding whether the entry is idle
        drop(self.guard.take());
        self.locks
            .remove_if(&self.host, |_, lock| Arc::strong_count(lock) == 1);
    }
}

impl HostLocks {
    pub fn new() -> Self {
        Self::default()
    }

    fn entry(&self, host: &str) -> Arc<Mutex<()>> {
        self.locks
            .entry(host.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }

    /// Take the host lock or fail immediately with [`RolloutError::HostBusy`]
    pub fn try_acquire(&self, host: &str) -> Result<HostGuard> {
        let guard = self.entry(host).try_lock_owned().map_err(|_| {
            debug!("Host {} is busy", host);
            RolloutError::HostBusy(host.to_string())
        })?;
        Ok(self.guard(host, guard))
    }

    /// Wait for the host lock
    pub async fn acquire(&self, host: &str) -> HostGuard {
        let guard = self.entry(host).lock_owned().await;
        self.guard(host, guard)
    }

    pub fn is_locked(&self, host: &str) -> bool {
        self.locks
            .get(host)
            .map(|lock| lock.try_lock().is_err())
            .unwrap_or(false)
    }

    /// Number of hosts with a live lock entry
    pub fn len(&self) -> usize {
        self.locks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.locks.is_empty()
    }

    fn guard(&self, host: &str, guard: OwnedMutexGuard<()>) -> HostGuard {
        HostGuard {
            host: host.to_string(),
            guard: Some(guard),
            locks: self.locks.clone(),
        }
    }
}
