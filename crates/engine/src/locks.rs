//! Per-resource exclusive locks.
//!
//! Writers of the same `(backend, resource_type, resource_id)` are
//! serialized; writers of different resources never contend. Lock entries
//! are created on demand and removed once nobody holds or waits on them.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};

use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};

use crate::types::Backend;

type LockKey = (Backend, String, String);
type LockTable = Mutex<HashMap<LockKey, Arc<AsyncMutex<()>>>>;

#[derive(Debug, Default, Clone)]
pub struct ResourceLocks {
    table: Arc<LockTable>,
}

/// Held for the duration of one serialized write. Releases on drop.
#[derive(Debug)]
pub struct ResourceGuard {
    key: LockKey,
    table: Arc<LockTable>,
    guard: Option<OwnedMutexGuard<()>>,
}

impl ResourceLocks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Wait for exclusive access to one resource.
    pub async fn acquire(
        &self,
        backend: Backend,
        resource_type: &str,
        resource_id: &str,
    ) -> ResourceGuard {
        let key = (backend, resource_type.to_string(), resource_id.to_string());
        let lock = {
            let mut table = self.table.lock().unwrap_or_else(PoisonError::into_inner);
            table
                .entry(key.clone())
                .or_insert_with(|| Arc::new(AsyncMutex::new(())))
                .clone()
        };
        let guard = lock.lock_owned().await;
        ResourceGuard {
            key,
            table: self.table.clone(),
            guard: Some(guard),
        }
    }

    /// Number of resources with a live lock entry.
    pub fn tracked(&self) -> usize {
        self.table
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }
}

impl Drop for ResourceGuard {
    fn drop(&mut self) {
        // Release first so the strong count only reflects waiters.
        self.guard.take();
        let mut table = self.table.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(lock) = table.get(&self.key) {
            if Arc::strong_count(lock) == 1 {
                table.remove(&self.key);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    #[tokio::test]
    async fn same_resource_is_serialized() {
        let locks = ResourceLocks::new();
        let inside = Arc::new(AtomicUsize::new(0));
        let max_seen = Arc::new(AtomicUsize::new(0));

        let mut handles = Vec::new();
        for _ in 0..8 {
            let locks = locks.clone();
            let inside = inside.clone();
            let max_seen = max_seen.clone();
            handles.push(tokio::spawn(async move {
                let _g = locks.acquire(Backend::Production, "document", "doc-1").await;
                let now = inside.fetch_add(1, Ordering::SeqCst) + 1;
                max_seen.fetch_max(now, Ordering::SeqCst);
                tokio::time::sleep(Duration::from_millis(2)).await;
                inside.fetch_sub(1, Ordering::SeqCst);
            }));
        }
        for h in handles {
            h.await.unwrap();
        }
        assert_eq!(max_seen.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn different_resources_do_not_contend() {
        let locks = ResourceLocks::new();
        let _a = locks.acquire(Backend::Production, "document", "doc-1").await;
        let b = tokio::time::timeout(
            Duration::from_millis(200),
            locks.acquire(Backend::Production, "document", "doc-2"),
        )
        .await;
        assert!(b.is_ok());
        let c = tokio::time::timeout(
            Duration::from_millis(200),
            locks.acquire(Backend::Sandbox, "document", "doc-1"),
        )
        .await;
        assert!(c.is_ok());
    }

    #[tokio::test]
    async fn entries_are_pruned_after_release() {
        let locks = ResourceLocks::new();
        {
            let _g = locks.acquire(Backend::Production, "document", "doc-1").await;
            assert_eq!(locks.tracked(), 1);
        }
        assert_eq!(locks.tracked(), 0);
    }
}
