use rewind_storage::StorageError;

use crate::codec::CodecError;
use crate::log::LogError;
use crate::types::{Backend, Operation, SessionId, SnapshotSetId, TransactionId};

/// Errors surfaced by the rollback manager, router and session controller.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RollbackError {
    /// The resource is absent. Recoverable; nothing was mutated.
    #[error("resource not found: {resource_type}/{resource_id}")]
    NotFound {
        resource_type: String,
        resource_id: String,
    },

    /// A create was requested for a resource that already exists.
    #[error("resource already exists: {resource_type}/{resource_id}")]
    AlreadyExists {
        resource_type: String,
        resource_id: String,
    },

    /// The store rejected the mutation. No transaction was recorded.
    #[error("mutation of {resource_type}/{resource_id} on {backend} failed: {source}")]
    MutationFailed {
        resource_type: String,
        resource_id: String,
        backend: Backend,
        #[source]
        source: StorageError,
    },

    /// The mutation ran but left the resource exactly as it was. No
    /// transaction was recorded.
    #[error("{operation} of {resource_type}/{resource_id} had no effect")]
    NoEffect {
        resource_type: String,
        resource_id: String,
        operation: Operation,
    },

    /// The store was changed but the change could not be recorded. The
    /// resource is now untracked and must be reconciled by an operator.
    #[error(
        "ORPHANED MUTATION: {resource_type}/{resource_id} on {backend} was changed but not recorded: {reason}"
    )]
    OrphanedMutation {
        resource_type: String,
        resource_id: String,
        backend: Backend,
        reason: String,
    },

    #[error("transaction not found: {0}")]
    TransactionNotFound(TransactionId),

    /// Applying the inverse failed; the transaction is now ROLLBACK_FAILED.
    #[error("rollback of transaction {transaction_id} failed: {reason}")]
    RollbackApplication {
        transaction_id: TransactionId,
        reason: String,
    },

    #[error("seed snapshot set {seed_snapshot_id} is unavailable: {reason}")]
    SeedUnavailable {
        seed_snapshot_id: SnapshotSetId,
        reason: String,
    },

    #[error("duplicate transaction id: {0}")]
    DuplicateTransaction(TransactionId),

    #[error("evaluation session not found: {0}")]
    SessionNotFound(SessionId),

    /// The request names a session that is not the active one.
    #[error("evaluation session {0} is not active")]
    SessionNotActive(SessionId),

    #[error("evaluation session {0} is already active")]
    SessionAlreadyActive(SessionId),

    /// A sandbox operation needs a session and none is running.
    #[error("no evaluation session is active")]
    NoActiveSession,

    /// The sandbox transaction belongs to a session whose sandbox has
    /// already been reset, so there is nothing left to roll back.
    #[error("transaction {transaction_id} belongs to closed session {session_id}")]
    SessionClosed {
        transaction_id: TransactionId,
        session_id: SessionId,
    },

    /// A store call failed before anything was mutated.
    #[error(transparent)]
    Storage(#[from] StorageError),

    #[error(transparent)]
    Codec(#[from] CodecError),

    #[error("transaction log error: {0}")]
    Log(LogError),
}

impl From<LogError> for RollbackError {
    fn from(e: LogError) -> Self {
        match e {
            LogError::TransactionNotFound(id) => RollbackError::TransactionNotFound(id),
            LogError::DuplicateTransaction(id) => RollbackError::DuplicateTransaction(id),
            LogError::SessionClosed(id) => RollbackError::SessionNotActive(id),
            other => RollbackError::Log(other),
        }
    }
}

impl RollbackError {
    /// Store state changed without an audit record. Must be escalated,
    /// never retried.
    pub fn is_fatal(&self) -> bool {
        matches!(self, RollbackError::OrphanedMutation { .. })
    }

    /// Nothing durable happened (or a rollback can be re-invoked), so the
    /// caller may try again.
    pub fn is_retryable(&self) -> bool {
        match self {
            RollbackError::MutationFailed { source, .. } => {
                matches!(source, StorageError::Backend(_))
            }
            RollbackError::RollbackApplication { .. } => true,
            RollbackError::Storage(StorageError::Backend(_)) => true,
            RollbackError::Log(LogError::Io(_)) => true,
            _ => false,
        }
    }

    /// Short machine-readable kind, used in HTTP error bodies and logs.
    pub fn kind(&self) -> &'static str {
        match self {
            RollbackError::NotFound { .. } => "not_found",
            RollbackError::AlreadyExists { .. } => "already_exists",
            RollbackError::MutationFailed { .. } => "mutation_failed",
            RollbackError::NoEffect { .. } => "no_effect",
            RollbackError::OrphanedMutation { .. } => "orphaned_mutation",
            RollbackError::TransactionNotFound(_) => "transaction_not_found",
            RollbackError::RollbackApplication { .. } => "rollback_application",
            RollbackError::SeedUnavailable { .. } => "seed_unavailable",
            RollbackError::DuplicateTransaction(_) => "duplicate_transaction",
            RollbackError::SessionNotFound(_) => "session_not_found",
            RollbackError::SessionNotActive(_) => "session_not_active",
            RollbackError::SessionAlreadyActive(_) => "session_already_active",
            RollbackError::NoActiveSession => "no_active_session",
            RollbackError::SessionClosed { .. } => "session_closed",
            RollbackError::Storage(_) => "storage",
            RollbackError::Codec(_) => "codec",
            RollbackError::Log(_) => "log",
        }
    }
}
