//! Transactional rollback and sandboxed evaluation for resource stores.
//!
//! Every destructive call goes through [`RollbackManager::execute_with_rollback`],
//! which captures the resource before and after the change and appends a
//! [`Transaction`] to a [`TransactionLog`]. Any recorded transaction can be
//! undone with [`RollbackManager::rollback`].
//!
//! The [`BackendRouter`] sends each call to production or to the sandbox twin
//! depending on an explicit [`ExecutionMode`], and the [`SessionController`]
//! brackets sandbox runs with seed and reset.

pub mod codec;
mod error;
mod locks;
pub mod log;
mod manager;
pub mod mutation;
mod router;
mod session;
mod transaction;
mod types;

pub use codec::{CodecError, Snapshot, SnapshotCodec, SnapshotSet};
pub use error::RollbackError;
pub use locks::{ResourceGuard, ResourceLocks};
pub use log::{FileTransactionLog, LogError, MemoryTransactionLog, TransactionLog};
pub use manager::{BatchFailure, BatchRollbackReport, Backends, Executed, RollbackManager};
pub use mutation::MutationScope;
pub use router::{BackendRouter, ExecutionMode, RouterConfig};
pub use session::{EvaluationSession, SessionConfig, SessionController, SessionSummary};
pub use transaction::{Inverse, Transaction, TransactionFilter};
pub use types::{
    now_rfc3339, Backend, Operation, SessionId, SnapshotSetId, TransactionId, TransactionStatus,
};
