//! State snapshot codec.
//!
//! `capture` turns a live resource into an immutable [`Snapshot`] carrying a
//! monotonic sequence number, the backend it was read from, a timestamp and a
//! SHA-256 digest of its fields. `restore` is the exact inverse and refuses
//! any snapshot whose fields no longer match the recorded digest.

use std::sync::atomic::{AtomicU64, Ordering};

use rewind_storage::{Resource, ResourceSet};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::types::{now_rfc3339, Backend, SnapshotSetId};

/// Errors from capturing or restoring snapshots.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CodecError {
    #[error(
        "snapshot digest mismatch for {resource_type}/{resource_id}: recorded {expected}, computed {actual}"
    )]
    DigestMismatch {
        resource_type: String,
        resource_id: String,
        expected: String,
        actual: String,
    },

    #[error("snapshot serialization failed: {0}")]
    Serialization(String),
}

/// Immutable capture of one resource's full state.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Snapshot {
    pub sequence: u64,
    pub resource_type: String,
    pub resource_id: String,
    pub backend: Backend,
    /// RFC 3339 UTC.
    pub captured_at: String,
    /// Hex SHA-256 of the compact JSON encoding of `fields`.
    pub digest: String,
    pub fields: Resource,
}

/// The captures of a whole store at one point in time.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SnapshotSet {
    pub id: SnapshotSetId,
    pub captured_at: String,
    pub source_backend: Backend,
    pub snapshots: Vec<Snapshot>,
}

/// Canonical digest of a resource.
///
/// `serde_json::Map` keeps keys sorted, so the compact encoding is canonical.
pub fn digest(resource: &Resource) -> Result<String, CodecError> {
    let canonical =
        serde_json::to_string(resource).map_err(|e| CodecError::Serialization(e.to_string()))?;
    Ok(format!("{:x}", Sha256::digest(canonical.as_bytes())))
}

/// Digest of an entire store dump.
pub fn digest_set(resources: &ResourceSet) -> Result<String, CodecError> {
    let canonical =
        serde_json::to_string(resources).map_err(|e| CodecError::Serialization(e.to_string()))?;
    Ok(format!("{:x}", Sha256::digest(canonical.as_bytes())))
}

/// Captures and restores snapshots, handing out sequence numbers.
///
/// One codec is shared by everything that captures state in a process so
/// that sequence numbers are globally ordered.
#[derive(Debug)]
pub struct SnapshotCodec {
    next_sequence: AtomicU64,
}

impl Default for SnapshotCodec {
    fn default() -> Self {
        Self::new()
    }
}

impl SnapshotCodec {
    pub fn new() -> Self {
        Self::resume_after(0)
    }

    /// A codec whose first capture is numbered `last_sequence + 1`.
    ///
    /// Used when reopening a durable log so new snapshots sort after the
    /// replayed ones.
    pub fn resume_after(last_sequence: u64) -> Self {
        SnapshotCodec {
            next_sequence: AtomicU64::new(last_sequence + 1),
        }
    }

    pub fn capture(
        &self,
        backend: Backend,
        resource_type: &str,
        resource_id: &str,
        resource: &Resource,
    ) -> Result<Snapshot, CodecError> {
        let digest = digest(resource)?;
        Ok(Snapshot {
            sequence: self.next_sequence.fetch_add(1, Ordering::SeqCst),
            resource_type: resource_type.to_string(),
            resource_id: resource_id.to_string(),
            backend,
            captured_at: now_rfc3339(),
            digest,
            fields: resource.clone(),
        })
    }

    pub fn restore(&self, snapshot: &Snapshot) -> Result<Resource, CodecError> {
        let actual = digest(&snapshot.fields)?;
        if actual != snapshot.digest {
            return Err(CodecError::DigestMismatch {
                resource_type: snapshot.resource_type.clone(),
                resource_id: snapshot.resource_id.clone(),
                expected: snapshot.digest.clone(),
                actual,
            });
        }
        Ok(snapshot.fields.clone())
    }

    pub fn capture_set(
        &self,
        backend: Backend,
        resources: &ResourceSet,
    ) -> Result<SnapshotSet, CodecError> {
        let snapshots = resources
            .iter()
            .map(|(t, id, r)| self.capture(backend, t, id, r))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(SnapshotSet {
            id: SnapshotSetId::generate(),
            captured_at: now_rfc3339(),
            source_backend: backend,
            snapshots,
        })
    }

    /// Rebuild the store contents a snapshot set was captured from.
    pub fn restore_set(&self, set: &SnapshotSet) -> Result<ResourceSet, CodecError> {
        let mut resources = ResourceSet::new();
        for snapshot in &set.snapshots {
            let resource = self.restore(snapshot)?;
            resources.insert(&snapshot.resource_type, &snapshot.resource_id, resource);
        }
        Ok(resources)
    }
}

// ──────────────────────────────────────────────
// Tests
// ──────────────────────────────────────────────
