//! Transactions: the recorded, invertible unit of one resource mutation.

use serde::{Deserialize, Serialize};

use crate::codec::Snapshot;
use crate::types::{Backend, Operation, SessionId, TransactionId, TransactionStatus};

/// One committed mutation of one resource, with the state on either side.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Transaction {
    pub transaction_id: TransactionId,
    /// Position in the log. Assigned by the log on `record`; 0 until then.
    pub sequence: u64,
    pub resource_type: String,
    pub resource_id: String,
    pub operation: Operation,
    /// Absent for `create`.
    pub before_snapshot: Option<Snapshot>,
    /// Absent for `delete`.
    pub after_snapshot: Option<Snapshot>,
    pub actor: String,
    pub backend: Backend,
    /// Evaluation session the mutation ran in (sandbox only).
    pub session_id: Option<SessionId>,
    pub created_at: String,
    pub status: TransactionStatus,
    /// Set on the last status change.
    pub updated_at: Option<String>,
    /// Why the most recent rollback attempt failed, if it did.
    pub last_error: Option<String>,
}

/// What `rollback` must apply to undo a transaction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Inverse<'a> {
    /// Undo a create.
    Delete,
    /// Undo an update or delete by writing the prior state back.
    Restore(&'a Snapshot),
}

impl Transaction {
    /// Check that the snapshots agree with the operation:
    /// create has only an after, delete has only a before, and update has
    /// both with different contents. Every snapshot must name this
    /// transaction's resource and backend.
    pub fn check_consistency(&self) -> Result<(), String> {
        match (
            self.operation,
            self.before_snapshot.as_ref(),
            self.after_snapshot.as_ref(),
        ) {
            (Operation::Create, None, Some(_)) => {}
            (Operation::Delete, Some(_), None) => {}
            (Operation::Update, Some(before), Some(after)) => {
                if before.digest == after.digest {
                    return Err("update snapshots are identical".to_string());
                }
            }
            (op, before, after) => {
                return Err(format!(
                    "{} transaction with before={} after={}",
                    op,
                    if before.is_some() { "present" } else { "absent" },
                    if after.is_some() { "present" } else { "absent" },
                ))
            }
        }
        for snap in self
            .before_snapshot
            .iter()
            .chain(self.after_snapshot.iter())
        {
            if snap.resource_type != self.resource_type
                || snap.resource_id != self.resource_id
                || snap.backend != self.backend
            {
                return Err(format!(
                    "snapshot of {}/{} on {} attached to transaction on {}/{} on {}",
                    snap.resource_type,
                    snap.resource_id,
                    snap.backend,
                    self.resource_type,
                    self.resource_id,
                    self.backend
                ));
            }
        }
        Ok(())
    }

    /// The inverse operation, derived purely from the recorded operation.
    pub fn inverse(&self) -> Result<Inverse<'_>, String> {
        match self.operation {
            Operation::Create => Ok(Inverse::Delete),
            Operation::Update | Operation::Delete => self
                .before_snapshot
                .as_ref()
                .map(Inverse::Restore)
                .ok_or_else(|| format!("{} transaction has no before snapshot", self.operation)),
        }
    }
}

/// Criteria for `TransactionLog::query`. Unset fields match everything.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TransactionFilter {
    pub resource_type: Option<String>,
    pub resource_id: Option<String>,
    pub backend: Option<Backend>,
    pub status: Option<TransactionStatus>,
    pub session_id: Option<SessionId>,
    pub actor: Option<String>,
    pub operation: Option<Operation>,
    /// Maximum number of results; 0 means no limit.
    pub limit: usize,
    /// Return the most recent transactions first.
    pub newest_first: bool,
}

impl TransactionFilter {
    pub fn for_session(session_id: SessionId) -> Self {
        TransactionFilter {
            session_id: Some(session_id),
            ..Default::default()
        }
    }

    pub fn matches(&self, txn: &Transaction) -> bool {
        self.resource_type
            .as_deref()
            .map_or(true, |t| t == txn.resource_type)
            && self
                .resource_id
                .as_deref()
                .map_or(true, |id| id == txn.resource_id)
            && self.backend.map_or(true, |b| b == txn.backend)
            && self.status.map_or(true, |s| s == txn.status)
            && self
                .session_id
                .map_or(true, |s| txn.session_id == Some(s))
            && self.actor.as_deref().map_or(true, |a| a == txn.actor)
            && self.operation.map_or(true, |op| op == txn.operation)
    }

    /// Filter, order and truncate transactions given in ascending sequence order.
    pub fn apply<'a, I>(&self, ascending: I) -> Vec<Transaction>
    where
        I: IntoIterator<Item = &'a Transaction>,
    {
        let mut selected: Vec<Transaction> = ascending
            .into_iter()
            .filter(|t| self.matches(t))
            .cloned()
            .collect();
        if self.newest_first {
            selected.reverse();
        }
        if self.limit > 0 {
            selected.truncate(self.limit);
        }
        selected
    }
}
