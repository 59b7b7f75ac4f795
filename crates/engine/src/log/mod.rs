//! Append-only transaction log.
//!
//! The log exclusively owns transactions, snapshot sets and evaluation
//! session records. Nothing is ever deleted: a transaction is written once by
//! `record` and afterwards only its status changes, following
//! [`TransactionStatus::allowed_transitions`]. A session record is written
//! when the session opens and once more when it closes.

mod file;
mod memory;

pub use file::FileTransactionLog;
pub use memory::MemoryTransactionLog;

use std::collections::HashMap;

use async_trait::async_trait;

use crate::codec::SnapshotSet;
use crate::session::EvaluationSession;
use crate::transaction::{Transaction, TransactionFilter};
use crate::types::{now_rfc3339, SessionId, SnapshotSetId, TransactionId, TransactionStatus};

/// Errors returned by a `TransactionLog`.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum LogError {
    #[error("duplicate transaction id: {0}")]
    DuplicateTransaction(TransactionId),

    #[error("transaction not found: {0}")]
    TransactionNotFound(TransactionId),

    #[error("illegal status transition for {transaction_id}: {from} -> {to}")]
    IllegalTransition {
        transaction_id: TransactionId,
        from: TransactionStatus,
        to: TransactionStatus,
    },

    #[error("inconsistent transaction {transaction_id}: {reason}")]
    Inconsistent {
        transaction_id: TransactionId,
        reason: String,
    },

    #[error("duplicate snapshot set id: {0}")]
    DuplicateSnapshotSet(SnapshotSetId),

    #[error("snapshot set not found: {0}")]
    SnapshotSetNotFound(SnapshotSetId),

    #[error("evaluation session {0} is already closed")]
    SessionClosed(SessionId),

    #[error("corrupt log entry at line {line}: {reason}")]
    Corrupt { line: usize, reason: String },

    #[error("log I/O error: {0}")]
    Io(String),
}

impl From<std::io::Error> for LogError {
    fn from(e: std::io::Error) -> Self {
        LogError::Io(e.to_string())
    }
}

/// Durable, queryable record of every committed mutation.
///
/// Implementations must be `Send + Sync + 'static` so one log can be shared
/// by the rollback manager, the session controller and HTTP handlers.
#[async_trait]
pub trait TransactionLog: Send + Sync + 'static {
    /// Append a transaction, assigning its `sequence`. Returns the stored copy.
    ///
    /// Fails with `DuplicateTransaction` if the id is already present and with
    /// `Inconsistent` if its snapshots do not match its operation.
    async fn record(&self, transaction: Transaction) -> Result<Transaction, LogError>;

    async fn get(&self, transaction_id: TransactionId) -> Result<Transaction, LogError>;

    /// Move a transaction to `status`. `error` is kept as `last_error`.
    ///
    /// Setting `RolledBack` on an already rolled-back transaction is a no-op.
    async fn set_status(
        &self,
        transaction_id: TransactionId,
        status: TransactionStatus,
        error: Option<String>,
    ) -> Result<Transaction, LogError>;

    /// Matching transactions in ascending sequence order, unless the filter
    /// asks for newest first.
    async fn query(&self, filter: &TransactionFilter) -> Result<Vec<Transaction>, LogError>;

    async fn store_snapshot_set(&self, set: SnapshotSet) -> Result<(), LogError>;

    async fn snapshot_set(&self, id: SnapshotSetId) -> Result<SnapshotSet, LogError>;

    /// Insert a session record, or replace the open record with the same id.
    ///
    /// Fails with `SessionClosed` if the stored record has already ended.
    async fn store_session(&self, session: EvaluationSession) -> Result<(), LogError>;

    /// Every session record, in the order the sessions were opened.
    async fn sessions(&self) -> Result<Vec<EvaluationSession>, LogError>;

    async fn session(&self, session_id: SessionId) -> Result<Option<EvaluationSession>, LogError> {
        Ok(self
            .sessions()
            .await?
            .into_iter()
            .find(|s| s.session_id == session_id))
    }

    /// Idempotent.
    async fn mark_rolled_back(&self, transaction_id: TransactionId) -> Result<Transaction, LogError> {
        self.set_status(transaction_id, TransactionStatus::RolledBack, None)
            .await
    }

    async fn mark_rollback_failed(
        &self,
        transaction_id: TransactionId,
        reason: String,
    ) -> Result<Transaction, LogError> {
        self.set_status(
            transaction_id,
            TransactionStatus::RollbackFailed,
            Some(reason),
        )
        .await
    }

    /// Transactions attributed to a session, in chronological order.
    async fn list_for_session(&self, session_id: SessionId) -> Result<Vec<Transaction>, LogError> {
        self.query(&TransactionFilter::for_session(session_id)).await
    }
}

// ── Shared in-memory index ───────────────────────────────────────────────────

/// A status change as it is applied to the index (and journaled by the file log).
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub(crate) struct StatusChange {
    pub transaction_id: TransactionId,
    pub status: TransactionStatus,
    pub at: String,
    pub error: Option<String>,
}

/// The queryable state both log implementations keep in memory.
///
/// Mutations are split into `prepare_*` (validate, no side effects) and
/// `apply_*` (infallible) so the file log can persist between the two.
#[derive(Debug, Default)]
pub(crate) struct LogIndex {
    transactions: HashMap<TransactionId, Transaction>,
    /// Ids in ascending sequence order.
    order: Vec<TransactionId>,
    last_sequence: u64,
    snapshot_sets: HashMap<SnapshotSetId, SnapshotSet>,
    /// In open order.
    sessions: Vec<EvaluationSession>,
}

impl LogIndex {
    pub fn prepare_record(&self, mut transaction: Transaction) -> Result<Transaction, LogError> {
        if self.transactions.contains_key(&transaction.transaction_id) {
            return Err(LogError::DuplicateTransaction(transaction.transaction_id));
        }
        transaction
            .check_consistency()
            .map_err(|reason| LogError::Inconsistent {
                transaction_id: transaction.transaction_id,
                reason,
            })?;
        transaction.sequence = self.last_sequence + 1;
        Ok(transaction)
    }

    pub fn apply_record(&mut self, transaction: Transaction) {
        self.last_sequence = self.last_sequence.max(transaction.sequence);
        self.order.push(transaction.transaction_id);
        self.transactions
            .insert(transaction.transaction_id, transaction);
    }

    /// `Ok(None)` when the change is the idempotent rolled-back no-op.
    pub fn prepare_status(
        &self,
        transaction_id: TransactionId,
        status: TransactionStatus,
        error: Option<String>,
    ) -> Result<Option<StatusChange>, LogError> {
        let current = self.get(transaction_id)?;
        if current.status == TransactionStatus::RolledBack && status == TransactionStatus::RolledBack
        {
            return Ok(None);
        }
        if !current.status.can_transition_to(status) {
            return Err(LogError::IllegalTransition {
                transaction_id,
                from: current.status,
                to: status,
            });
        }
        Ok(Some(StatusChange {
            transaction_id,
            status,
            at: now_rfc3339(),
            error,
        }))
    }

    pub fn apply_status(&mut self, change: &StatusChange) {
        if let Some(txn) = self.transactions.get_mut(&change.transaction_id) {
            txn.status = change.status;
            txn.updated_at = Some(change.at.clone());
            txn.last_error = change.error.clone();
        }
    }

    pub fn prepare_snapshot_set(&self, set: &SnapshotSet) -> Result<(), LogError> {
        if self.snapshot_sets.contains_key(&set.id) {
            return Err(LogError::DuplicateSnapshotSet(set.id));
        }
        Ok(())
    }

    pub fn apply_snapshot_set(&mut self, set: SnapshotSet) {
        self.snapshot_sets.insert(set.id, set);
    }

    pub fn prepare_session(&self, session: &EvaluationSession) -> Result<(), LogError> {
        match self.sessions.iter().find(|s| s.session_id == session.session_id) {
            Some(stored) if !stored.is_active() => {
                Err(LogError::SessionClosed(session.session_id))
            }
            _ => Ok(()),
        }
    }

    pub fn apply_session(&mut self, session: EvaluationSession) {
        match self
            .sessions
            .iter_mut()
            .find(|s| s.session_id == session.session_id)
        {
            Some(stored) => *stored = session,
            None => self.sessions.push(session),
        }
    }

    pub fn sessions(&self) -> Vec<EvaluationSession> {
        self.sessions.clone()
    }

    pub fn get(&self, transaction_id: TransactionId) -> Result<&Transaction, LogError> {
        self.transactions
            .get(&transaction_id)
            .ok_or(LogError::TransactionNotFound(transaction_id))
    }

    pub fn query(&self, filter: &TransactionFilter) -> Vec<Transaction> {
        filter.apply(self.order.iter().filter_map(|id| self.transactions.get(id)))
    }

    pub fn snapshot_set(&self, id: SnapshotSetId) -> Result<SnapshotSet, LogError> {
        self.snapshot_sets
            .get(&id)
            .cloned()
            .ok_or(LogError::SnapshotSetNotFound(id))
    }

    /// Highest snapshot sequence held anywhere in the index.
    pub fn last_snapshot_sequence(&self) -> u64 {
        let from_transactions = self.transactions.values().flat_map(|t| {
            t.before_snapshot
                .iter()
                .chain(t.after_snapshot.iter())
                .map(|s| s.sequence)
        });
        let from_sets = self
            .snapshot_sets
            .values()
            .flat_map(|set| set.snapshots.iter().map(|s| s.sequence));
        from_transactions.chain(from_sets).max().unwrap_or(0)
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }
}
