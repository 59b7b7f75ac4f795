use async_trait::async_trait;

use crate::error::StorageError;
use crate::record::{Resource, ResourceSet};

/// The storage trait for rewind resource backends.
///
/// A `ResourceStore` holds the live state of every resource, keyed by
/// `(resource_type, resource_id)`. It owns no logic beyond CRUD: change
/// tracking, snapshots and rollback all live above it.
///
/// ## Write semantics
///
/// `put` is a full replace. Whatever was stored under the key before is
/// discarded, and the stored record is exactly the one passed in. Merge or
/// patch behaviour is built by callers from `get` + `put`.
///
/// ## Thread Safety
///
/// Implementations must be `Send + Sync + 'static` to be shared behind an
/// `Arc` in axum application state and across async task boundaries.
#[async_trait]
pub trait ResourceStore: Send + Sync + 'static {
    /// Read a resource.
    ///
    /// Returns `Err(StorageError::NotFound)` if nothing is stored under the key.
    async fn get(&self, resource_type: &str, resource_id: &str)
        -> Result<Resource, StorageError>;

    /// Store `resource` under the key, replacing any previous record.
    ///
    /// Returns the record as stored.
    async fn put(
        &self,
        resource_type: &str,
        resource_id: &str,
        resource: Resource,
    ) -> Result<Resource, StorageError>;

    /// Remove a resource.
    ///
    /// Returns `Err(StorageError::NotFound)` if nothing is stored under the key.
    async fn delete(&self, resource_type: &str, resource_id: &str) -> Result<(), StorageError>;

    /// All resources of one type, ordered by id.
    async fn list(&self, resource_type: &str) -> Result<Vec<(String, Resource)>, StorageError>;

    /// Dump the whole store.
    async fn export(&self) -> Result<ResourceSet, StorageError>;
}

/// A resource store that can be wiped and bulk-loaded.
///
/// Only the sandbox twin is ever driven through this trait. Both operations
/// replace the entire contents atomically: a concurrent reader sees either
/// the old contents or the new ones, never a mix.
#[async_trait]
pub trait SandboxStore: ResourceStore {
    /// Replace the entire contents with `resources`.
    async fn seed(&self, resources: ResourceSet) -> Result<(), StorageError>;

    /// Empty the store (the baseline state).
    async fn reset(&self) -> Result<(), StorageError>;
}
