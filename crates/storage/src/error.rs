/// All errors that can be returned by a `ResourceStore` implementation.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum StorageError {
    /// No record with the given (resource_type, resource_id).
    #[error("resource not found: {resource_type}/{resource_id}")]
    NotFound {
        resource_type: String,
        resource_id: String,
    },

    /// The store refused the write (validation failure, conflict, 4xx from a
    /// remote API). Nothing was written.
    #[error("store rejected write to {resource_type}/{resource_id}: {message}")]
    Rejected {
        resource_type: String,
        resource_id: String,
        message: String,
    },

    /// The backend does not support the requested operation (e.g. `seed` on
    /// a remote production API that only exposes CRUD).
    #[error("operation not supported by this store: {0}")]
    Unsupported(String),

    /// A backend-specific storage error (connection, timeout, serialization, etc.).
    #[error("storage backend error: {0}")]
    Backend(String),
}

impl StorageError {
    pub fn not_found(resource_type: &str, resource_id: &str) -> Self {
        StorageError::NotFound {
            resource_type: resource_type.to_string(),
            resource_id: resource_id.to_string(),
        }
    }

    /// `true` for the recoverable "resource absent" case.
    pub fn is_not_found(&self) -> bool {
        matches!(self, StorageError::NotFound { .. })
    }
}
