//! Rollback manager: execute a mutation with an exact, recorded inverse, and
//! undo it later by transaction id.

use std::collections::HashSet;
use std::future::Future;
use std::sync::Arc;

use rewind_storage::{Resource, ResourceSet, ResourceStore, SandboxStore, StorageError};
use serde::{Deserialize, Serialize};
use tokio::sync::{RwLock, RwLockReadGuard};

use crate::codec::SnapshotCodec;
use crate::error::RollbackError;
use crate::locks::ResourceLocks;
use crate::log::{LogError, TransactionLog};
use crate::mutation::MutationScope;
use crate::transaction::{Inverse, Transaction};
use crate::types::{
    now_rfc3339, Backend, Operation, SessionId, TransactionId, TransactionStatus,
};

/// The two resource stores a manager writes to.
#[derive(Clone)]
pub struct Backends {
    production: Arc<dyn ResourceStore>,
    sandbox: Arc<dyn ResourceStore>,
    sandbox_control: Arc<dyn SandboxStore>,
}

impl Backends {
    pub fn new<S: SandboxStore>(production: Arc<dyn ResourceStore>, sandbox: Arc<S>) -> Self {
        Backends {
            production,
            sandbox: sandbox.clone(),
            sandbox_control: sandbox,
        }
    }
}

/// A successful `execute_with_rollback`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Executed<T> {
    pub transaction_id: TransactionId,
    pub result: T,
}

/// Why a batch stopped.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchFailure {
    pub transaction_id: TransactionId,
    pub kind: String,
    pub error: String,
}

/// Outcome of `rollback_batch`, naming every transaction's fate.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchRollbackReport {
    /// In the order they were rolled back (newest first).
    pub rolled_back: Vec<TransactionId>,
    pub failed: Option<BatchFailure>,
    /// Older transactions left untouched after the failure.
    pub not_attempted: Vec<TransactionId>,
}

impl BatchRollbackReport {
    pub fn is_complete(&self) -> bool {
        self.failed.is_none()
    }
}

/// Sandbox-wide gate. Holds the active session, if any.
///
/// Sandbox writes hold a read guard for their whole duration; session start
/// and end take the write guard, which waits for in-flight writes to drain.
pub(crate) type SandboxGate = RwLock<Option<SessionId>>;

/// Per-backend commit barrier.
///
/// Writes and rollbacks hold it shared from their first read until their
/// transaction is recorded. Whole-collection reads take it exclusively, so
/// a listing never includes a change whose transaction is not yet in the
/// log.
#[derive(Debug, Default)]
struct CommitBarrier {
    production: RwLock<()>,
    sandbox: RwLock<()>,
}

impl CommitBarrier {
    fn for_backend(&self, backend: Backend) -> &RwLock<()> {
        match backend {
            Backend::Production => &self.production,
            Backend::Sandbox => &self.sandbox,
        }
    }
}

pub struct RollbackManager {
    backends: Backends,
    log: Arc<dyn TransactionLog>,
    codec: Arc<SnapshotCodec>,
    locks: ResourceLocks,
    gate: SandboxGate,
    commits: CommitBarrier,
}

impl RollbackManager {
    pub fn new(backends: Backends, log: Arc<dyn TransactionLog>) -> Self {
        RollbackManager {
            backends,
            log,
            codec: Arc::new(SnapshotCodec::new()),
            locks: ResourceLocks::new(),
            gate: RwLock::new(None),
            commits: CommitBarrier::default(),
        }
    }

    /// Replace the snapshot codec (e.g. one resumed after a replayed log).
    pub fn with_codec(mut self, codec: SnapshotCodec) -> Self {
        self.codec = Arc::new(codec);
        self
    }

    pub fn store(&self, backend: Backend) -> &Arc<dyn ResourceStore> {
        match backend {
            Backend::Production => &self.backends.production,
            Backend::Sandbox => &self.backends.sandbox,
        }
    }

    pub fn log(&self) -> &Arc<dyn TransactionLog> {
        &self.log
    }

    pub fn codec(&self) -> &SnapshotCodec {
        &self.codec
    }

    pub(crate) fn sandbox_control(&self) -> &Arc<dyn SandboxStore> {
        &self.backends.sandbox_control
    }

    pub(crate) fn gate(&self) -> &SandboxGate {
        &self.gate
    }

    /// The evaluation session currently bound to the sandbox.
    pub async fn active_session(&self) -> Option<SessionId> {
        *self.gate.read().await
    }

    /// Run `mutation_fn` against one resource and record how to undo it.
    ///
    /// Sandbox mutations are attributed to the active evaluation session and
    /// fail with `NoActiveSession` when there is none.
    pub async fn execute_with_rollback<T, F, Fut>(
        &self,
        backend: Backend,
        resource_type: &str,
        resource_id: &str,
        operation: Operation,
        mutation_fn: F,
        actor: &str,
    ) -> Result<Executed<T>, RollbackError>
    where
        T: Send,
        F: FnOnce(MutationScope) -> Fut + Send,
        Fut: Future<Output = Result<T, StorageError>> + Send,
    {
        self.execute(
            backend,
            None,
            resource_type,
            resource_id,
            operation,
            mutation_fn,
            actor,
        )
        .await
    }

    /// Like `execute_with_rollback` against the sandbox, but only if
    /// `session_id` is the active session.
    pub async fn execute_in_session<T, F, Fut>(
        &self,
        session_id: SessionId,
        resource_type: &str,
        resource_id: &str,
        operation: Operation,
        mutation_fn: F,
        actor: &str,
    ) -> Result<Executed<T>, RollbackError>
    where
        T: Send,
        F: FnOnce(MutationScope) -> Fut + Send,
        Fut: Future<Output = Result<T, StorageError>> + Send,
    {
        self.execute(
            Backend::Sandbox,
            Some(session_id),
            resource_type,
            resource_id,
            operation,
            mutation_fn,
            actor,
        )
        .await
    }

    /// Read a resource, waiting out any in-flight write to it so that a
    /// reader never sees state whose transaction is not yet recorded.
    pub async fn read(
        &self,
        backend: Backend,
        resource_type: &str,
        resource_id: &str,
    ) -> Result<Resource, RollbackError> {
        let _guard = self.locks.acquire(backend, resource_type, resource_id).await;
        self.store(backend)
            .get(resource_type, resource_id)
            .await
            .map_err(|e| match e {
                StorageError::NotFound {
                    resource_type,
                    resource_id,
                } => RollbackError::NotFound {
                    resource_type,
                    resource_id,
                },
                other => RollbackError::Storage(other),
            })
    }

    /// List a collection once every in-flight write to `backend` has been
    /// recorded.
    pub async fn list(
        &self,
        backend: Backend,
        resource_type: &str,
    ) -> Result<Vec<(String, Resource)>, RollbackError> {
        let _barrier = self.commits.for_backend(backend).write().await;
        Ok(self.store(backend).list(resource_type).await?)
    }

    /// Dump a whole store once every in-flight write to `backend` has been
    /// recorded.
    pub async fn export(&self, backend: Backend) -> Result<ResourceSet, RollbackError> {
        let _barrier = self.commits.for_backend(backend).write().await;
        Ok(self.store(backend).export().await?)
    }

    /// Resolve the session a sandbox call runs under.
    fn check_session(
        gate: &Option<RwLockReadGuard<'_, Option<SessionId>>>,
        expected: Option<SessionId>,
    ) -> Result<Option<SessionId>, RollbackError> {
        let Some(guard) = gate else {
            return Ok(None);
        };
        match (**guard, expected) {
            (None, Some(wanted)) => Err(RollbackError::SessionNotActive(wanted)),
            (None, None) => Err(RollbackError::NoActiveSession),
            (Some(active), Some(wanted)) if active != wanted => {
                Err(RollbackError::SessionNotActive(wanted))
            }
            (Some(active), _) => Ok(Some(active)),
        }
    }

    #[allow(clippy::too_many_arguments)]
    async fn execute<T, F, Fut>(
        &self,
        backend: Backend,
        expected_session: Option<SessionId>,
        resource_type: &str,
        resource_id: &str,
        operation: Operation,
        mutation_fn: F,
        actor: &str,
    ) -> Result<Executed<T>, RollbackError>
    where
        T: Send,
        F: FnOnce(MutationScope) -> Fut + Send,
        Fut: Future<Output = Result<T, StorageError>> + Send,
    {
        let gate = match backend {
            Backend::Sandbox => Some(self.gate.read().await),
            Backend::Production => None,
        };
        let session_id = Self::check_session(&gate, expected_session)?;
        let _barrier = self.commits.for_backend(backend).read().await;
        let _guard = self.locks.acquire(backend, resource_type, resource_id).await;
        let store = self.store(backend).clone();

        // 1. Capture prior state. Nothing has been mutated yet, so every
        //    failure here is recoverable.
        let before = read_optional(store.as_ref(), resource_type, resource_id).await?;
        match (operation, &before) {
            (Operation::Create, Some(_)) => {
                return Err(RollbackError::AlreadyExists {
                    resource_type: resource_type.to_string(),
                    resource_id: resource_id.to_string(),
                })
            }
            (Operation::Update | Operation::Delete, None) => {
                return Err(RollbackError::NotFound {
                    resource_type: resource_type.to_string(),
                    resource_id: resource_id.to_string(),
                })
            }
            _ => {}
        }
        let before_snapshot = before
            .as_ref()
            .map(|r| self.codec.capture(backend, resource_type, resource_id, r))
            .transpose()?;

        // 2. Mutate.
        let scope = MutationScope::new(store.clone(), resource_type, resource_id);
        let result = match mutation_fn(scope).await {
            Ok(result) => result,
            Err(source) => {
                tracing::warn!(
                    backend = %backend,
                    resource_type,
                    resource_id,
                    operation = %operation,
                    error = %source,
                    "mutation failed, nothing recorded"
                );
                return Err(RollbackError::MutationFailed {
                    resource_type: resource_type.to_string(),
                    resource_id: resource_id.to_string(),
                    backend,
                    source,
                });
            }
        };

        // 3. Capture durable post-mutation state. From here on the store may
        //    have changed, so failures are orphaned mutations.
        let after = read_optional(store.as_ref(), resource_type, resource_id)
            .await
            .map_err(|e| {
                self.orphaned(
                    backend,
                    resource_type,
                    resource_id,
                    format!("post-mutation read failed: {}", e),
                )
            })?;

        let observed = match (&before, &after) {
            (None, Some(_)) => Operation::Create,
            (Some(_), None) => Operation::Delete,
            (Some(b), Some(a)) if b != a => Operation::Update,
            _ => {
                return Err(RollbackError::NoEffect {
                    resource_type: resource_type.to_string(),
                    resource_id: resource_id.to_string(),
                    operation,
                })
            }
        };
        if observed != operation {
            tracing::warn!(
                backend = %backend,
                resource_type,
                resource_id,
                declared = %operation,
                observed = %observed,
                "mutation did not match declared operation, recording observed operation"
            );
        }

        let after_snapshot = after
            .as_ref()
            .map(|r| self.codec.capture(backend, resource_type, resource_id, r))
            .transpose()
            .map_err(|e| {
                self.orphaned(
                    backend,
                    resource_type,
                    resource_id,
                    format!("post-mutation capture failed: {}", e),
                )
            })?;

        // 4. Record.
        let transaction = Transaction {
            transaction_id: TransactionId::generate(),
            sequence: 0,
            resource_type: resource_type.to_string(),
            resource_id: resource_id.to_string(),
            operation: observed,
            before_snapshot,
            after_snapshot,
            actor: actor.to_string(),
            backend,
            session_id,
            created_at: now_rfc3339(),
            status: TransactionStatus::Active,
            updated_at: None,
            last_error: None,
        };
        let recorded = match self.log.record(transaction.clone()).await {
            Ok(recorded) => recorded,
            Err(LogError::DuplicateTransaction(id)) => {
                // Recording is the only step left, so retrying it with a
                // fresh id cannot repeat the mutation.
                tracing::warn!(transaction_id = %id, "transaction id collision, regenerating");
                let retry = Transaction {
                    transaction_id: TransactionId::generate(),
                    ..transaction
                };
                self.log.record(retry).await.map_err(|e| {
                    self.orphaned(backend, resource_type, resource_id, e.to_string())
                })?
            }
            Err(e) => {
                return Err(self.orphaned(backend, resource_type, resource_id, e.to_string()))
            }
        };

        tracing::info!(
            transaction_id = %recorded.transaction_id,
            sequence = recorded.sequence,
            backend = %backend,
            resource_type,
            resource_id,
            operation = %observed,
            actor,
            session_id = ?session_id,
            "mutation recorded"
        );

        Ok(Executed {
            transaction_id: recorded.transaction_id,
            result,
        })
    }

    fn orphaned(
        &self,
        backend: Backend,
        resource_type: &str,
        resource_id: &str,
        reason: String,
    ) -> RollbackError {
        tracing::error!(
            backend = %backend,
            resource_type,
            resource_id,
            reason = %reason,
            "ORPHANED MUTATION: store changed but no transaction was recorded; manual reconciliation required"
        );
        RollbackError::OrphanedMutation {
            resource_type: resource_type.to_string(),
            resource_id: resource_id.to_string(),
            backend,
            reason,
        }
    }

    /// Undo one transaction on the backend it ran against.
    ///
    /// Idempotent: a rolled-back transaction returns immediately. A
    /// `ROLLBACK_FAILED` transaction is retried. Returns the transaction in
    /// its new state.
    pub async fn rollback(&self, transaction_id: TransactionId) -> Result<Transaction, RollbackError> {
        let txn = self.log.get(transaction_id).await?;
        if txn.status == TransactionStatus::RolledBack {
            return Ok(txn);
        }

        let gate = match txn.backend {
            Backend::Sandbox => Some(self.gate.read().await),
            Backend::Production => None,
        };
        if let Some(guard) = &gate {
            match txn.session_id {
                Some(session_id) if **guard != Some(session_id) => {
                    return Err(RollbackError::SessionClosed {
                        transaction_id,
                        session_id,
                    })
                }
                Some(_) => {}
                None => return Err(RollbackError::NoActiveSession),
            }
        }

        let _barrier = self.commits.for_backend(txn.backend).read().await;
        let _guard = self
            .locks
            .acquire(txn.backend, &txn.resource_type, &txn.resource_id)
            .await;
        // Re-read under the lock; a concurrent rollback may have finished.
        let txn = self.log.get(transaction_id).await?;
        if txn.status == TransactionStatus::RolledBack {
            return Ok(txn);
        }

        match self.apply_inverse(&txn).await {
            Ok(()) => {
                let updated = self.log.mark_rolled_back(transaction_id).await?;
                tracing::info!(
                    transaction_id = %transaction_id,
                    backend = %txn.backend,
                    resource_type = %txn.resource_type,
                    resource_id = %txn.resource_id,
                    operation = %txn.operation,
                    "transaction rolled back"
                );
                Ok(updated)
            }
            Err(reason) => {
                tracing::warn!(
                    transaction_id = %transaction_id,
                    backend = %txn.backend,
                    resource_type = %txn.resource_type,
                    resource_id = %txn.resource_id,
                    reason = %reason,
                    "rollback failed"
                );
                self.log
                    .mark_rollback_failed(transaction_id, reason.clone())
                    .await?;
                Err(RollbackError::RollbackApplication {
                    transaction_id,
                    reason,
                })
            }
        }
    }

    async fn apply_inverse(&self, txn: &Transaction) -> Result<(), String> {
        let store = self.store(txn.backend);
        let (rt, rid) = (txn.resource_type.as_str(), txn.resource_id.as_str());

        match read_optional(store.as_ref(), rt, rid).await {
            Ok(live) => {
                let recorded_after = txn.after_snapshot.as_ref().map(|s| &s.fields);
                if live.as_ref() != recorded_after {
                    tracing::warn!(
                        transaction_id = %txn.transaction_id,
                        resource_type = rt,
                        resource_id = rid,
                        "resource changed after this transaction; rollback overwrites the later state"
                    );
                }
            }
            Err(e) => {
                tracing::debug!(error = %e, "could not read live state before rollback");
            }
        }

        match txn.inverse()? {
            Inverse::Delete => match store.delete(rt, rid).await {
                Ok(()) => Ok(()),
                Err(e) if e.is_not_found() => Ok(()),
                Err(e) => Err(e.to_string()),
            },
            Inverse::Restore(snapshot) => {
                let resource = self.codec.restore(snapshot).map_err(|e| e.to_string())?;
                store
                    .put(rt, rid, resource)
                    .await
                    .map(|_| ())
                    .map_err(|e| e.to_string())
            }
        }
    }

    /// Roll back a group of transactions newest first, stopping at the first
    /// failure.
    ///
    /// Every id is resolved before anything is touched, so an unknown id
    /// fails the whole request with `TransactionNotFound`.
    pub async fn rollback_batch(
        &self,
        transaction_ids: &[TransactionId],
    ) -> Result<BatchRollbackReport, RollbackError> {
        let mut seen = HashSet::new();
        let mut batch = Vec::new();
        for id in transaction_ids {
            if seen.insert(*id) {
                batch.push(self.log.get(*id).await?);
            }
        }
        batch.sort_by(|a, b| b.sequence.cmp(&a.sequence));

        let mut report = BatchRollbackReport::default();
        let mut remaining = batch.into_iter();
        while let Some(txn) = remaining.next() {
            match self.rollback(txn.transaction_id).await {
                Ok(_) => report.rolled_back.push(txn.transaction_id),
                Err(e) => {
                    report.failed = Some(BatchFailure {
                        transaction_id: txn.transaction_id,
                        kind: e.kind().to_string(),
                        error: e.to_string(),
                    });
                    report.not_attempted = remaining.map(|t| t.transaction_id).collect();
                    break;
                }
            }
        }

        tracing::info!(
            rolled_back = report.rolled_back.len(),
            failed = report.failed.is_some(),
            not_attempted = report.not_attempted.len(),
            "batch rollback finished"
        );
        Ok(report)
    }
}

/// `get` with NotFound mapped to `None`.
async fn read_optional(
    store: &dyn ResourceStore,
    resource_type: &str,
    resource_id: &str,
) -> Result<Option<Resource>, StorageError> {
    match store.get(resource_type, resource_id).await {
        Ok(r) => Ok(Some(r)),
        Err(e) if e.is_not_found() => Ok(None),
        Err(e) => Err(e),
    }
}
