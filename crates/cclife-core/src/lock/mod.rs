//! Reference-counted per-resource locks.
//!
//! The table maps a resolved resource name to `{ref_count, mutex}`:
//! - an entry exists iff `ref_count > 0`;
//! - `ref_count` counts holders *and* waiters, so an entry is never deleted while held;
//! - the table's own guard protects bookkeeping only and is never held while waiting for, or holding, a resource mutex.
use std::{
    collections::HashMap,
    sync::{Arc, Mutex, MutexGuard},
};

use tokio::sync::{Mutex as ResourceMutex, OwnedMutexGuard};
use tracing::{debug, trace};

struct LockEntry {
    ref_count: usize,
    lock: Arc<ResourceMutex<()>>,
}

#[derive(Default)]
pub struct LockTable {
    entries: Mutex<HashMap<String, LockEntry>>,
}

impl LockTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Wait for exclusive access to `resource`.
    ///
    /// Waiters are served in acquisition order. The returned guard releases on drop,
    /// including when this future is dropped before the lock is obtained.
    pub async fn acquire(self: &Arc<Self>, resource: &str) -> ResourceGuard {
        let lock = {
            let mut entries = self.entries();
            let entry = entries
                .entry(resource.to_string())
                .or_insert_with(|| LockEntry {
                    ref_count: 0,
                    lock: Arc::new(ResourceMutex::new(())),
                });
            entry.ref_count += 1;
            trace!(resource, ref_count = entry.ref_count, "resource lock referenced");
            Arc::clone(&entry.lock)
        };

        let mut guard = ResourceGuard {
            table: Arc::clone(self),
            resource: resource.to_string(),
            held: None,
        };
        trace!(resource, "waiting for resource lock");
        guard.held = Some(lock.lock_owned().await);
        trace!(resource, "resource lock acquired");
        guard
    }

    /// Current reference count of `resource` (0 when absent).
    pub fn ref_count(&self, resource: &str) -> usize {
        self.entries().get(resource).map_or(0, |e| e.ref_count)
    }

    pub fn contains(&self, resource: &str) -> bool {
        self.entries().contains_key(resource)
    }

    /// Number of live entries.
    pub fn len(&self) -> usize {
        self.entries().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn release(&self, resource: &str) {
        let mut entries = self.entries();
        match entries.get_mut(resource) {
            Some(entry) => {
                entry.ref_count = entry.ref_count.saturating_sub(1);
                if entry.ref_count == 0 {
                    entries.remove(resource);
                    trace!(resource, "resource lock deleted");
                }
            }
            None => debug!(resource, "no resource lock to release"),
        }
    }

    fn entries(&self) -> MutexGuard<'_, HashMap<String, LockEntry>> {
        self.entries.lock().unwrap_or_else(|e| e.into_inner())
    }
}

/// Exclusive access to one resource. Dropping it unlocks and dereferences the entry.
pub struct ResourceGuard {
    table: Arc<LockTable>,
    resource: String,
    held: Option<OwnedMutexGuard<()>>,
}

impl ResourceGuard {
    pub fn resource(&self) -> &str {
        &self.resource
    }
}

impl Drop for ResourceGuard {
    fn drop(&mut self) {
        // Unlock before dropping the reference so the entry is never removed while locked.
        drop(self.held.take());
        self.table.release(&self.resource);
    }
}
