//! In-process resource store.

use async_trait::async_trait;
use tokio::sync::RwLock;

use crate::error::StorageError;
use crate::record::{Resource, ResourceSet};
use crate::traits::{ResourceStore, SandboxStore};

/// A `ResourceStore` held entirely in memory.
///
/// Every write takes the write half of a single `RwLock`, so `seed` and
/// `reset` swap the whole set in one step and readers never see a partial
/// load. Records are cloned in and out; callers cannot alias stored state.
#[derive(Debug, Default)]
pub struct MemoryStore {
    inner: RwLock<ResourceSet>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a store that starts out holding `resources`.
    pub fn with_contents(resources: ResourceSet) -> Self {
        MemoryStore {
            inner: RwLock::new(resources),
        }
    }
}

#[async_trait]
impl ResourceStore for MemoryStore {
    async fn get(&self, resource_type: &str, resource_id: &str) -> Result<Resource, StorageError> {
        let set = self.inner.read().await;
        set.get(resource_type, resource_id)
            .cloned()
            .ok_or_else(|| StorageError::not_found(resource_type, resource_id))
    }

    async fn put(
        &self,
        resource_type: &str,
        resource_id: &str,
        resource: Resource,
    ) -> Result<Resource, StorageError> {
        if resource_type.is_empty() || resource_id.is_empty() {
            return Err(StorageError::Rejected {
                resource_type: resource_type.to_string(),
                resource_id: resource_id.to_string(),
                message: "resource type and id must be non-empty".to_string(),
            });
        }
        let mut set = self.inner.write().await;
        set.insert(resource_type, resource_id, resource.clone());
        Ok(resource)
    }

    async fn delete(&self, resource_type: &str, resource_id: &str) -> Result<(), StorageError> {
        let mut set = self.inner.write().await;
        set.remove(resource_type, resource_id)
            .map(|_| ())
            .ok_or_else(|| StorageError::not_found(resource_type, resource_id))
    }

    async fn list(&self, resource_type: &str) -> Result<Vec<(String, Resource)>, StorageError> {
        Ok(self.inner.read().await.collection(resource_type))
    }

    async fn export(&self) -> Result<ResourceSet, StorageError> {
        Ok(self.inner.read().await.clone())
    }
}

#[async_trait]
impl SandboxStore for MemoryStore {
    async fn seed(&self, resources: ResourceSet) -> Result<(), StorageError> {
        *self.inner.write().await = resources;
        Ok(())
    }

    async fn reset(&self) -> Result<(), StorageError> {
        *self.inner.write().await = ResourceSet::new();
        Ok(())
    }
}

// ──────────────────────────────────────────────
// Tests
// ──────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::conformance::run_conformance_suite;
    use serde_json::json;

    #[tokio::test]
    async fn memory_store_passes_conformance() {
        let report = run_conformance_suite(|| async { MemoryStore::new() }).await;
        assert_eq!(report.failed, 0, "{report}");
        assert!(report.total > 0);
    }

    #[tokio::test]
    async fn returned_records_do_not_alias_stored_state() {
        let store = MemoryStore::new();
        let original = Resource::from_value(json!({"title": "A"})).unwrap();
        store.put("document", "doc-1", original).await.unwrap();

        let mut copy = store.get("document", "doc-1").await.unwrap();
        copy.insert("title", json!("mutated"));

        let stored = store.get("document", "doc-1").await.unwrap();
        assert_eq!(stored.get("title"), Some(&json!("A")));
    }

    #[tokio::test]
    async fn put_with_empty_key_is_rejected() {
        let store = MemoryStore::new();
        let err = store
            .put("document", "", Resource::new())
            .await
            .unwrap_err();
        assert!(matches!(err, StorageError::Rejected { .. }));
        assert!(store.export().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn with_contents_is_visible_immediately() {
        let mut set = ResourceSet::new();
        set.insert(
            "form",
            "f-1",
            Resource::from_value(json!({"answers": {}})).unwrap(),
        );
        let store = MemoryStore::with_contents(set.clone());
        assert_eq!(store.export().await.unwrap(), set);
    }
}
