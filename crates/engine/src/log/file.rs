//! JSON-lines journal backing a durable transaction log.
//!
//! Every change is one line appended to the journal and flushed to disk with
//! `sync_data` before the in-memory index is updated. Opening a journal
//! replays it front to back. Lines are never rewritten; the only repair made
//! on open is cutting off a torn final line left by a crash mid-append. A
//! failed append truncates the file back to its last complete line.
//!
//! [`FileTransactionLog::load`] replays a journal without opening it for
//! writing, for inspecting a journal another process may be appending to.

use std::io::{Seek, SeekFrom};
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;

use super::{LogError, LogIndex, MemoryTransactionLog, StatusChange, TransactionLog};
use crate::codec::SnapshotSet;
use crate::session::EvaluationSession;
use crate::transaction::{Transaction, TransactionFilter};
use crate::types::{SnapshotSetId, TransactionId, TransactionStatus};

#[derive(Debug, Serialize, Deserialize)]
#[serde(tag = "entry", rename_all = "snake_case")]
enum JournalEntry {
    Record { transaction: Transaction },
    Status { change: StatusChange },
    SnapshotSet { snapshot_set: SnapshotSet },
    Session { session: EvaluationSession },
}

struct Journal {
    index: LogIndex,
    file: tokio::fs::File,
    /// Length of the complete lines written so far.
    len: u64,
    /// Set when a partial line could not be cut off; appending is refused
    /// until the journal is reopened and its torn tail discarded.
    poisoned: bool,
}

/// A `TransactionLog` persisted to an append-only file.
///
/// One process should own a journal at a time; concurrent writers from
/// separate processes are not coordinated.
pub struct FileTransactionLog {
    path: PathBuf,
    journal: Mutex<Journal>,
}

impl std::fmt::Debug for FileTransactionLog {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FileTransactionLog")
            .field("path", &self.path)
            .finish()
    }
}

impl FileTransactionLog {
    /// Open (creating if needed) and replay the journal at `path`.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, LogError> {
        let path = path.as_ref().to_path_buf();
        let mut file = std::fs::OpenOptions::new()
            .create(true)
            .read(true)
            .append(true)
            .open(&path)?;

        let content = std::fs::read_to_string(&path)?;
        let (index, valid_len) = replay(&content)?;
        if valid_len < content.len() {
            tracing::warn!(
                path = %path.display(),
                discarded_bytes = content.len() - valid_len,
                "discarding torn final journal line"
            );
            file.set_len(valid_len as u64)?;
            file.seek(SeekFrom::End(0))?;
        }
        tracing::debug!(
            path = %path.display(),
            transactions = index.len(),
            "replayed transaction journal"
        );

        Ok(FileTransactionLog {
            path,
            journal: Mutex::new(Journal {
                index,
                file: tokio::fs::File::from_std(file),
                len: valid_len as u64,
                poisoned: false,
            }),
        })
    }

    /// Replay the journal at `path` into a read-only, in-memory copy.
    ///
    /// The file is never written. A torn final line is skipped, not cut off,
    /// since a live writer may still be completing it.
    pub fn load(path: impl AsRef<Path>) -> Result<MemoryTransactionLog, LogError> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)?;
        let (index, valid_len) = replay(&content)?;
        if valid_len < content.len() {
            tracing::debug!(
                path = %path.display(),
                skipped_bytes = content.len() - valid_len,
                "ignoring incomplete final journal line"
            );
        }
        Ok(MemoryTransactionLog::from_index(index))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Highest snapshot sequence in the journal, for resuming a codec.
    pub async fn last_snapshot_sequence(&self) -> u64 {
        self.journal.lock().await.index.last_snapshot_sequence()
    }

    pub async fn len(&self) -> usize {
        self.journal.lock().await.index.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}

impl Journal {
    async fn append(&mut self, entry: &JournalEntry) -> Result<(), LogError> {
        if self.poisoned {
            return Err(LogError::Io(
                "journal holds a partial line; reopen it to repair".to_string(),
            ));
        }
        let mut line = serde_json::to_string(entry)
            .map_err(|e| LogError::Io(format!("journal entry serialization failed: {}", e)))?;
        line.push('\n');
        if let Err(e) = self.write_line(line.as_bytes()).await {
            self.discard_partial().await;
            return Err(e.into());
        }
        self.len += line.len() as u64;
        Ok(())
    }

    async fn write_line(&mut self, line: &[u8]) -> std::io::Result<()> {
        self.file.write_all(line).await?;
        self.file.flush().await?;
        self.file.sync_data().await
    }

    /// Cut the file back to its last complete line.
    async fn discard_partial(&mut self) {
        match self.file.set_len(self.len).await {
            Ok(()) => tracing::warn!(len = self.len, "discarded partial journal append"),
            Err(e) => {
                tracing::error!(
                    error = %e,
                    len = self.len,
                    "could not truncate partial journal append"
                );
                self.poisoned = true;
            }
        }
    }
}

/// Rebuild the index from journal text.
///
/// Returns the index and the byte length of the intact prefix. A line that
/// fails to parse is tolerated only if it is the unterminated final line.
fn replay(content: &str) -> Result<(LogIndex, usize), LogError> {
    let mut index = LogIndex::default();
    let mut offset = 0usize;

    for (i, raw) in content.split_inclusive('\n').enumerate() {
        let line_no = i + 1;
        let terminated = raw.ends_with('\n');
        let trimmed = raw.trim();
        if trimmed.is_empty() {
            offset += raw.len();
            continue;
        }

        let entry: JournalEntry = match serde_json::from_str(trimmed) {
            Ok(entry) => entry,
            Err(_) if !terminated => return Ok((index, offset)),
            Err(e) => {
                return Err(LogError::Corrupt {
                    line: line_no,
                    reason: e.to_string(),
                })
            }
        };

        match entry {
            JournalEntry::Record { transaction } => {
                if index.get(transaction.transaction_id).is_ok() {
                    return Err(LogError::Corrupt {
                        line: line_no,
                        reason: format!("transaction {} recorded twice", transaction.transaction_id),
                    });
                }
                index.apply_record(transaction);
            }
            JournalEntry::Status { change } => {
                if index.get(change.transaction_id).is_err() {
                    return Err(LogError::Corrupt {
                        line: line_no,
                        reason: format!(
                            "status change for unknown transaction {}",
                            change.transaction_id
                        ),
                    });
                }
                index.apply_status(&change);
            }
            JournalEntry::SnapshotSet { snapshot_set } => {
                index.apply_snapshot_set(snapshot_set);
            }
            JournalEntry::Session { session } => {
                index.apply_session(session);
            }
        }
        offset += raw.len();
    }

    Ok((index, offset))
}

#[async_trait]
impl TransactionLog for FileTransactionLog {
    async fn record(&self, transaction: Transaction) -> Result<Transaction, LogError> {
        let mut journal = self.journal.lock().await;
        let stored = journal.index.prepare_record(transaction)?;
        journal
            .append(&JournalEntry::Record {
                transaction: stored.clone(),
            })
            .await?;
        journal.index.apply_record(stored.clone());
        Ok(stored)
    }

    async fn get(&self, transaction_id: TransactionId) -> Result<Transaction, LogError> {
        self.journal
            .lock()
            .await
            .index
            .get(transaction_id)
            .cloned()
    }

    async fn set_status(
        &self,
        transaction_id: TransactionId,
        status: TransactionStatus,
        error: Option<String>,
    ) -> Result<Transaction, LogError> {
        let mut journal = self.journal.lock().await;
        if let Some(change) = journal.index.prepare_status(transaction_id, status, error)? {
            journal
                .append(&JournalEntry::Status {
                    change: change.clone(),
                })
                .await?;
            journal.index.apply_status(&change);
        }
        journal.index.get(transaction_id).cloned()
    }

    async fn query(&self, filter: &TransactionFilter) -> Result<Vec<Transaction>, LogError> {
        Ok(self.journal.lock().await.index.query(filter))
    }

    async fn store_snapshot_set(&self, set: SnapshotSet) -> Result<(), LogError> {
        let mut journal = self.journal.lock().await;
        journal.index.prepare_snapshot_set(&set)?;
        journal
            .append(&JournalEntry::SnapshotSet {
                snapshot_set: set.clone(),
            })
            .await?;
        journal.index.apply_snapshot_set(set);
        Ok(())
    }

    async fn snapshot_set(&self, id: SnapshotSetId) -> Result<SnapshotSet, LogError> {
        self.journal.lock().await.index.snapshot_set(id)
    }

    async fn store_session(&self, session: EvaluationSession) -> Result<(), LogError> {
        let mut journal = self.journal.lock().await;
        journal.index.prepare_session(&session)?;
        journal
            .append(&JournalEntry::Session {
                session: session.clone(),
            })
            .await?;
        journal.index.apply_session(session);
        Ok(())
    }

    async fn sessions(&self) -> Result<Vec<EvaluationSession>, LogError> {
        Ok(self.journal.lock().await.index.sessions())
    }
}

// ──────────────────────────────────────────────
// Tests
// ──────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::SnapshotCodec;
    use crate::transaction::tests::make_transaction;
    use crate::types::{Backend, Operation};
    use rewind_storage::{Resource, ResourceSet};
    use serde_json::json;
    use std::io::Write;

    fn create_txn() -> Transaction {
        make_transaction(Operation::Create, None, Some(json!({"title": "A"})))
    }

    #[tokio::test]
    async fn records_survive_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("log.jsonl");

        let (first, second) = {
            let log = FileTransactionLog::open(&path).unwrap();
            let first = log.record(create_txn()).await.unwrap();
            let second = log.record(create_txn()).await.unwrap();
            log.mark_rolled_back(first.transaction_id).await.unwrap();
            (first, second)
        };

        let reopened = FileTransactionLog::open(&path).unwrap();
        assert_eq!(reopened.len().await, 2);
        let first = reopened.get(first.transaction_id).await.unwrap();
        assert_eq!(first.status, TransactionStatus::RolledBack);
        assert!(first.updated_at.is_some());
        let all = reopened.query(&TransactionFilter::default()).await.unwrap();
        assert_eq!(all[1].transaction_id, second.transaction_id);

        // Sequences continue after replay.
        let third = reopened.record(create_txn()).await.unwrap();
        assert_eq!(third.sequence, 3);
    }

    #[tokio::test]
    async fn journal_is_append_only() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("log.jsonl");
        let log = FileTransactionLog::open(&path).unwrap();
        let txn = log.record(create_txn()).await.unwrap();
        let after_record = std::fs::read_to_string(&path).unwrap();

        log.mark_rollback_failed(txn.transaction_id, "boom".to_string())
            .await
            .unwrap();
        log.mark_rolled_back(txn.transaction_id).await.unwrap();
        // Idempotent re-mark writes nothing.
        log.mark_rolled_back(txn.transaction_id).await.unwrap();

        let after_status = std::fs::read_to_string(&path).unwrap();
        assert!(after_status.starts_with(&after_record));
        assert_eq!(after_status.lines().count(), 3);
    }

    #[tokio::test]
    async fn snapshot_sets_survive_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("log.jsonl");
        let codec = SnapshotCodec::new();
        let mut resources = ResourceSet::new();
        resources.insert(
            "document",
            "doc-1",
            Resource::from_value(json!({"title": "A"})).unwrap(),
        );
        let set = codec.capture_set(Backend::Production, &resources).unwrap();
        let id = set.id;
        {
            let log = FileTransactionLog::open(&path).unwrap();
            log.store_snapshot_set(set).await.unwrap();
        }
        let reopened = FileTransactionLog::open(&path).unwrap();
        let loaded = reopened.snapshot_set(id).await.unwrap();
        assert_eq!(codec.restore_set(&loaded).unwrap(), resources);
        assert_eq!(reopened.last_snapshot_sequence().await, 1);
    }

    #[tokio::test]
    async fn torn_final_line_is_discarded() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("log.jsonl");
        let kept = {
            let log = FileTransactionLog::open(&path).unwrap();
            log.record(create_txn()).await.unwrap()
        };
        {
            let mut f = std::fs::OpenOptions::new().append(true).open(&path).unwrap();
            f.write_all(b"{\"entry\":\"record\",\"transac").unwrap();
        }

        let reopened = FileTransactionLog::open(&path).unwrap();
        assert_eq!(reopened.len().await, 1);
        assert!(reopened.get(kept.transaction_id).await.is_ok());

        // Appends after the repair replay cleanly.
        reopened.record(create_txn()).await.unwrap();
        drop(reopened);
        let again = FileTransactionLog::open(&path).unwrap();
        assert_eq!(again.len().await, 2);
    }

    #[tokio::test]
    async fn corrupt_middle_line_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("log.jsonl");
        {
            let log = FileTransactionLog::open(&path).unwrap();
            log.record(create_txn()).await.unwrap();
        }
        let mut content = String::from("not json\n");
        content.push_str(&std::fs::read_to_string(&path).unwrap());
        std::fs::write(&path, content).unwrap();

        match FileTransactionLog::open(&path) {
            Err(LogError::Corrupt { line, .. }) => assert_eq!(line, 1),
            other => panic!("expected Corrupt, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn float_snapshots_roll_back_after_reopen() {
        use crate::manager::{Backends, RollbackManager};
        use rewind_storage::{MemoryStore, ResourceStore};
        use std::sync::Arc;

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("log.jsonl");
        let production = Arc::new(MemoryStore::new());
        let original = Resource::from_value(json!({"score": 1.0715660391465826e-75})).unwrap();
        production
            .put("document", "doc-1", original.clone())
            .await
            .unwrap();

        let update = {
            let log = Arc::new(FileTransactionLog::open(&path).unwrap());
            let manager = RollbackManager::new(
                Backends::new(production.clone(), Arc::new(MemoryStore::new())),
                log,
            );
            manager
                .execute_with_rollback(
                    Backend::Production,
                    "document",
                    "doc-1",
                    Operation::Update,
                    |scope| async move {
                        scope
                            .put(Resource::from_value(json!({"score": 1})).unwrap())
                            .await
                    },
                    "alice",
                )
                .await
                .unwrap()
        };

        let reopened = Arc::new(FileTransactionLog::open(&path).unwrap());
        let codec = SnapshotCodec::resume_after(reopened.last_snapshot_sequence().await);
        let manager = RollbackManager::new(
            Backends::new(production.clone(), Arc::new(MemoryStore::new())),
            reopened,
        )
        .with_codec(codec);
        let rolled = manager.rollback(update.transaction_id).await.unwrap();
        assert_eq!(rolled.status, TransactionStatus::RolledBack);
        assert_eq!(production.get("document", "doc-1").await.unwrap(), original);
    }

    #[tokio::test]
    async fn partial_append_is_cut_off() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("log.jsonl");
        let log = FileTransactionLog::open(&path).unwrap();
        log.record(create_txn()).await.unwrap();
        let intact = std::fs::read_to_string(&path).unwrap();

        {
            let mut journal = log.journal.lock().await;
            let mut f = std::fs::OpenOptions::new().append(true).open(&path).unwrap();
            f.write_all(b"{\"entry\":\"record\",\"trans").unwrap();
            journal.discard_partial().await;
            assert!(!journal.poisoned);
        }
        assert_eq!(std::fs::read_to_string(&path).unwrap(), intact);

        log.record(create_txn()).await.unwrap();
        drop(log);
        let reopened = FileTransactionLog::open(&path).unwrap();
        assert_eq!(reopened.len().await, 2);
    }

    #[tokio::test]
    async fn load_leaves_a_torn_journal_untouched() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("log.jsonl");
        let kept = {
            let log = FileTransactionLog::open(&path).unwrap();
            log.record(create_txn()).await.unwrap()
        };
        {
            let mut f = std::fs::OpenOptions::new().append(true).open(&path).unwrap();
            f.write_all(b"{\"entry\":\"status\",\"cha").unwrap();
        }
        let before = std::fs::read(&path).unwrap();

        let loaded = FileTransactionLog::load(&path).unwrap();
        assert_eq!(loaded.len().await, 1);
        assert!(loaded.get(kept.transaction_id).await.is_ok());
        assert_eq!(std::fs::read(&path).unwrap(), before);
    }

    #[test]
    fn load_of_missing_journal_fails() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("absent.jsonl");
        assert!(matches!(
            FileTransactionLog::load(&path),
            Err(LogError::Io(_))
        ));
        assert!(!path.exists());
    }

    #[tokio::test]
    async fn session_records_survive_reopen() {
        use crate::types::SessionId;

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("log.jsonl");
        let open = EvaluationSession {
            session_id: SessionId::generate(),
            seed_snapshot_id: SnapshotSetId::generate(),
            started_at: "2026-01-01T00:00:00Z".to_string(),
            ended_at: None,
            transaction_ids: Vec::new(),
        };
        let closed = EvaluationSession {
            ended_at: Some("2026-01-01T00:05:00Z".to_string()),
            ..open.clone()
        };
        {
            let log = FileTransactionLog::open(&path).unwrap();
            log.store_session(open.clone()).await.unwrap();
            log.store_session(closed.clone()).await.unwrap();
        }
        let reopened = FileTransactionLog::open(&path).unwrap();
        assert_eq!(reopened.sessions().await.unwrap(), vec![closed]);
        assert_eq!(
            reopened.store_session(open.clone()).await.unwrap_err(),
            LogError::SessionClosed(open.session_id)
        );
    }
}
