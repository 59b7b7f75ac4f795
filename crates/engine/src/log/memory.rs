use async_trait::async_trait;
use tokio::sync::RwLock;

use super::{LogError, LogIndex, TransactionLog};
use crate::codec::SnapshotSet;
use crate::session::EvaluationSession;
use crate::transaction::{Transaction, TransactionFilter};
use crate::types::{SnapshotSetId, TransactionId, TransactionStatus};

/// A transaction log that lives only as long as the process.
#[derive(Debug, Default)]
pub struct MemoryTransactionLog {
    index: RwLock<LogIndex>,
}

impl MemoryTransactionLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn from_index(index: LogIndex) -> Self {
        MemoryTransactionLog {
            index: RwLock::new(index),
        }
    }

    pub async fn len(&self) -> usize {
        self.index.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}

#[async_trait]
impl TransactionLog for MemoryTransactionLog {
    async fn record(&self, transaction: Transaction) -> Result<Transaction, LogError> {
        let mut index = self.index.write().await;
        let stored = index.prepare_record(transaction)?;
        index.apply_record(stored.clone());
        Ok(stored)
    }

    async fn get(&self, transaction_id: TransactionId) -> Result<Transaction, LogError> {
        self.index.read().await.get(transaction_id).cloned()
    }

    async fn set_status(
        &self,
        transaction_id: TransactionId,
        status: TransactionStatus,
        error: Option<String>,
    ) -> Result<Transaction, LogError> {
        let mut index = self.index.write().await;
        if let Some(change) = index.prepare_status(transaction_id, status, error)? {
            index.apply_status(&change);
        }
        index.get(transaction_id).cloned()
    }

    async fn query(&self, filter: &TransactionFilter) -> Result<Vec<Transaction>, LogError> {
        Ok(self.index.read().await.query(filter))
    }

    async fn store_snapshot_set(&self, set: SnapshotSet) -> Result<(), LogError> {
        let mut index = self.index.write().await;
        index.prepare_snapshot_set(&set)?;
        index.apply_snapshot_set(set);
        Ok(())
    }

    async fn snapshot_set(&self, id: SnapshotSetId) -> Result<SnapshotSet, LogError> {
        self.index.read().await.snapshot_set(id)
    }

    async fn store_session(&self, session: EvaluationSession) -> Result<(), LogError> {
        let mut index = self.index.write().await;
        index.prepare_session(&session)?;
        index.apply_session(session);
        Ok(())
    }

    async fn sessions(&self) -> Result<Vec<EvaluationSession>, LogError> {
        Ok(self.index.read().await.sessions())
    }
}

// ──────────────────────────────────────────────
// Tests
// ──────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transaction::tests::make_transaction;
    use crate::types::{Operation, SessionId};
    use serde_json::json;

    fn create_txn() -> Transaction {
        make_transaction(Operation::Create, None, Some(json!({"title": "A"})))
    }

    #[tokio::test]
    async fn record_assigns_increasing_sequences() {
        let log = MemoryTransactionLog::new();
        let a = log.record(create_txn()).await.unwrap();
        let b = log.record(create_txn()).await.unwrap();
        assert_eq!(a.sequence, 1);
        assert_eq!(b.sequence, 2);
        assert_eq!(log.len().await, 2);
    }

    #[tokio::test]
    async fn duplicate_id_is_refused() {
        let log = MemoryTransactionLog::new();
        let txn = create_txn();
        log.record(txn.clone()).await.unwrap();
        let err = log.record(txn.clone()).await.unwrap_err();
        assert_eq!(err, LogError::DuplicateTransaction(txn.transaction_id));
        assert_eq!(log.len().await, 1);
    }

    #[tokio::test]
    async fn inconsistent_transaction_is_refused() {
        let log = MemoryTransactionLog::new();
        let bad = make_transaction(Operation::Delete, None, None);
        assert!(matches!(
            log.record(bad).await,
            Err(LogError::Inconsistent { .. })
        ));
        assert!(log.is_empty().await);
    }

    #[tokio::test]
    async fn get_unknown_is_not_found() {
        let log = MemoryTransactionLog::new();
        let id = TransactionId::generate();
        assert_eq!(
            log.get(id).await.unwrap_err(),
            LogError::TransactionNotFound(id)
        );
    }

    #[tokio::test]
    async fn mark_rolled_back_is_idempotent() {
        let log = MemoryTransactionLog::new();
        let txn = log.record(create_txn()).await.unwrap();
        let first = log.mark_rolled_back(txn.transaction_id).await.unwrap();
        assert_eq!(first.status, TransactionStatus::RolledBack);
        let second = log.mark_rolled_back(txn.transaction_id).await.unwrap();
        assert_eq!(second, first);
    }

    #[tokio::test]
    async fn rolled_back_is_terminal() {
        let log = MemoryTransactionLog::new();
        let txn = log.record(create_txn()).await.unwrap();
        log.mark_rolled_back(txn.transaction_id).await.unwrap();
        let err = log
            .mark_rollback_failed(txn.transaction_id, "late".to_string())
            .await
            .unwrap_err();
        assert!(matches!(err, LogError::IllegalTransition { .. }));
    }

    #[tokio::test]
    async fn failed_rollback_can_be_retried() {
        let log = MemoryTransactionLog::new();
        let txn = log.record(create_txn()).await.unwrap();
        let failed = log
            .mark_rollback_failed(txn.transaction_id, "store down".to_string())
            .await
            .unwrap();
        assert_eq!(failed.status, TransactionStatus::RollbackFailed);
        assert_eq!(failed.last_error.as_deref(), Some("store down"));
        let done = log.mark_rolled_back(txn.transaction_id).await.unwrap();
        assert_eq!(done.status, TransactionStatus::RolledBack);
        assert_eq!(done.last_error, None);
    }

    #[tokio::test]
    async fn session_records_close_once() {
        let log = MemoryTransactionLog::new();
        let open = EvaluationSession {
            session_id: SessionId::generate(),
            seed_snapshot_id: SnapshotSetId::generate(),
            started_at: "2026-01-01T00:00:00Z".to_string(),
            ended_at: None,
            transaction_ids: Vec::new(),
        };
        log.store_session(open.clone()).await.unwrap();
        assert_eq!(log.session(open.session_id).await.unwrap(), Some(open.clone()));

        let closed = EvaluationSession {
            ended_at: Some("2026-01-01T00:05:00Z".to_string()),
            ..open.clone()
        };
        log.store_session(closed.clone()).await.unwrap();
        assert_eq!(log.sessions().await.unwrap(), vec![closed]);

        let err = log.store_session(open.clone()).await.unwrap_err();
        assert_eq!(err, LogError::SessionClosed(open.session_id));
    }

    #[tokio::test]
    async fn query_by_status_and_session() {
        let log = MemoryTransactionLog::new();
        let session = SessionId::generate();
        let mut in_session = create_txn();
        in_session.session_id = Some(session);
        let in_session = log.record(in_session).await.unwrap();
        let other = log.record(create_txn()).await.unwrap();
        log.mark_rolled_back(other.transaction_id).await.unwrap();

        let listed = log.list_for_session(session).await.unwrap();
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].transaction_id, in_session.transaction_id);

        let rolled = log
            .query(&TransactionFilter {
                status: Some(TransactionStatus::RolledBack),
                ..Default::default()
            })
            .await
            .unwrap();
        assert_eq!(rolled.len(), 1);
        assert_eq!(rolled[0].transaction_id, other.transaction_id);
    }

    #[tokio::test]
    async fn unknown_snapshot_set_is_not_found() {
        let log = MemoryTransactionLog::new();
        let id = SnapshotSetId::generate();
        assert_eq!(
            log.snapshot_set(id).await.unwrap_err(),
            LogError::SnapshotSetNotFound(id)
        );
    }
}
