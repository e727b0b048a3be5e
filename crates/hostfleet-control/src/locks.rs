//! Per-host exclusive scopes.
//!
//! Every operation that mutates a host runs while holding that host's guard.
//! The registry map is only locked for the lookup; waiting happens on the
//! per-host async mutex, so operations on different hosts never block each
//! other.

use std::collections::HashMap;
use std::sync::Arc;

use hostfleet_core::HostId;
use parking_lot::Mutex;
use tokio::sync::{Mutex as AsyncMutex, MutexGuard, OwnedMutexGuard};

/// Registry of per-host async mutexes.
#[derive(Default)]
pub struct HostLocks {
    hosts: Mutex<HashMap<HostId, Arc<AsyncMutex<()>>>>,
    registration: AsyncMutex<()>,
}

/// Exclusive scope over one host, released on drop.
#[must_use = "the host is only locked while the guard is alive"]
pub struct HostGuard {
    host_id: HostId,
    _guard: OwnedMutexGuard<()>,
}

impl HostGuard {
    /// The host this guard covers.
    #[must_use]
    pub const fn host_id(&self) -> &HostId {
        &self.host_id
    }
}

impl HostLocks {
    /// Create an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Wait for exclusive access to a host.
    pub async fn acquire(&self, host_id: &HostId) -> HostGuard {
        let lock = Arc::clone(self.hosts.lock().entry(*host_id).or_default());
        HostGuard {
            host_id: *host_id,
            _guard: lock.lock_owned().await,
        }
    }

    /// Serialize inventory inserts so address and hostname uniqueness checks
    /// cannot interleave.
    pub async fn registration(&self) -> MutexGuard<'_, ()> {
        self.registration.lock().await
    }

    /// Drop the registry entry for a deleted host.
    ///
    /// Tasks already waiting on the old mutex still acquire it and then find
    /// the host gone.
    pub fn forget(&self, guard: &HostGuard) {
        self.hosts.lock().remove(guard.host_id());
    }
}
