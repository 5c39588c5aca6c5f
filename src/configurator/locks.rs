//! Per-resource locks

use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError, Weak};

use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};

/// Registry of locks keyed by resource name
///
/// Locks are created on first use and dropped once nobody holds or waits
/// for them. The registry map itself is only locked briefly and never
/// across an await.
#[derive(Debug, Default)]
pub struct ResourceLocks {
    locks: Mutex<HashMap<String, Weak<AsyncMutex<()>>>>,
}

impl ResourceLocks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Wait for exclusive access to a resource
    pub async fn lock(&self, name: &str) -> OwnedMutexGuard<()> {
        self.handle(name).lock_owned().await
    }

    fn handle(&self, name: &str) -> Arc<AsyncMutex<()>> {
        let mut locks = self.locks.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(handle) = locks.get(name).and_then(Weak::upgrade) {
            return handle;
        }

        locks.retain(|_, lock| lock.strong_count() > 0);
        let handle = Arc::new(AsyncMutex::new(()));
        locks.insert(name.to_string(), Arc::downgrade(&handle));
        handle
    }

    /// Number of locks currently held or waited on
    pub fn active(&self) -> usize {
        self.locks
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .values()
            .filter(|lock| lock.strong_count() > 0)
            .count()
    }
}
