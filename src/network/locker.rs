use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::{Mutex, OwnedMutexGuard};

use crate::container::ContainerID;

/// Mutual exclusion per container id.
///
/// Locks are created on demand and dropped again once nobody holds or waits for them, so the
/// table only ever contains containers that are currently being worked on.
#[derive(Debug, Default)]
pub struct Locker {
    locks: DashMap<ContainerID, Arc<Mutex<()>>>,
}

impl Locker {
    /// Waits until the lock of `id` is free and takes it.
    pub async fn lock(&self, id: &ContainerID) -> LockGuard<'_> {
        let mutex = Arc::clone(self.locks.entry(id.clone()).or_default().value());
        let guard = mutex.lock_owned().await;
        LockGuard {
            locker: self,
            id: id.clone(),
            _guard: guard,
        }
    }

    #[cfg(test)]
    fn len(&self) -> usize {
        self.locks.len()
    }

    #[cfg(test)]
    fn is_empty(&self) -> bool {
        self.locks.is_empty()
    }
}

/// Holds the lock of one container until dropped.
#[derive(Debug)]
pub struct LockGuard<'a> {
    locker: &'a Locker,
    id: ContainerID,
    _guard: OwnedMutexGuard<()>,
}

impl Drop for LockGuard<'_> {
    fn drop(&mut self) {
        // One reference is held by the table, one by this guard. Anything above that is a
        // waiter that still needs the entry.
        self.locker
            .locks
            .remove_if(&self.id, |_, mutex| Arc::strong_count(mutex) <= 2);
    }
}
