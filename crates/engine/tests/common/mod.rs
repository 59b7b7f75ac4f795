#![allow(dead_code)]

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use rewind_engine::{
    Backends, EvaluationSession, LogError, MemoryTransactionLog, RollbackManager, SnapshotSet,
    SnapshotSetId, Transaction, TransactionFilter, TransactionId, TransactionLog,
    TransactionStatus,
};
use rewind_storage::{
    MemoryStore, Resource, ResourceSet, ResourceStore, SandboxStore, StorageError,
};
use serde_json::{json, Value};

pub fn resource(value: Value) -> Resource {
    Resource::from_value(value).unwrap()
}

pub fn title(t: &str) -> Resource {
    resource(json!({ "title": t }))
}

/// A memory store whose writes can be switched to fail.
#[derive(Default)]
pub struct FlakyStore {
    inner: MemoryStore,
    pub fail_writes: AtomicBool,
    pub fail_reads: AtomicBool,
}

impl FlakyStore {
    pub fn set_fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }

    pub fn set_fail_reads(&self, fail: bool) {
        self.fail_reads.store(fail, Ordering::SeqCst);
    }

    fn check(&self, flag: &AtomicBool) -> Result<(), StorageError> {
        if flag.load(Ordering::SeqCst) {
            Err(StorageError::Backend("injected failure".to_string()))
        } else {
            Ok(())
        }
    }
}

#[async_trait]
impl ResourceStore for FlakyStore {
    async fn get(&self, resource_type: &str, resource_id: &str) -> Result<Resource, StorageError> {
        self.check(&self.fail_reads)?;
        self.inner.get(resource_type, resource_id).await
    }

    async fn put(
        &self,
        resource_type: &str,
        resource_id: &str,
        resource: Resource,
    ) -> Result<Resource, StorageError> {
        self.check(&self.fail_writes)?;
        self.inner.put(resource_type, resource_id, resource).await
    }

    async fn delete(&self, resource_type: &str, resource_id: &str) -> Result<(), StorageError> {
        self.check(&self.fail_writes)?;
        self.inner.delete(resource_type, resource_id).await
    }

    async fn list(&self, resource_type: &str) -> Result<Vec<(String, Resource)>, StorageError> {
        self.inner.list(resource_type).await
    }

    async fn export(&self) -> Result<ResourceSet, StorageError> {
        self.check(&self.fail_reads)?;
        self.inner.export().await
    }
}

#[async_trait]
impl SandboxStore for FlakyStore {
    async fn seed(&self, resources: ResourceSet) -> Result<(), StorageError> {
        self.check(&self.fail_writes)?;
        self.inner.seed(resources).await
    }

    async fn reset(&self) -> Result<(), StorageError> {
        self.check(&self.fail_writes)?;
        self.inner.reset().await
    }
}

/// A memory log whose `record` can be switched to fail.
#[derive(Default)]
pub struct FailingLog {
    inner: MemoryTransactionLog,
    pub fail_record: AtomicBool,
}

#[async_trait]
impl TransactionLog for FailingLog {
    async fn record(&self, transaction: Transaction) -> Result<Transaction, LogError> {
        if self.fail_record.load(Ordering::SeqCst) {
            return Err(LogError::Io("disk full".to_string()));
        }
        self.inner.record(transaction).await
    }

    async fn get(&self, transaction_id: TransactionId) -> Result<Transaction, LogError> {
        self.inner.get(transaction_id).await
    }

    async fn set_status(
        &self,
        transaction_id: TransactionId,
        status: TransactionStatus,
        error: Option<String>,
    ) -> Result<Transaction, LogError> {
        self.inner.set_status(transaction_id, status, error).await
    }

    async fn query(&self, filter: &TransactionFilter) -> Result<Vec<Transaction>, LogError> {
        self.inner.query(filter).await
    }

    async fn store_snapshot_set(&self, set: SnapshotSet) -> Result<(), LogError> {
        self.inner.store_snapshot_set(set).await
    }

    async fn snapshot_set(&self, id: SnapshotSetId) -> Result<SnapshotSet, LogError> {
        self.inner.snapshot_set(id).await
    }

    async fn store_session(&self, session: EvaluationSession) -> Result<(), LogError> {
        self.inner.store_session(session).await
    }

    async fn sessions(&self) -> Result<Vec<EvaluationSession>, LogError> {
        self.inner.sessions().await
    }
}

/// Manager over a flaky production store, a plain memory sandbox and a
/// memory log.
pub struct Harness {
    pub production: Arc<FlakyStore>,
    pub sandbox: Arc<MemoryStore>,
    pub log: Arc<FailingLog>,
    pub manager: Arc<RollbackManager>,
}

pub fn harness() -> Harness {
    let production = Arc::new(FlakyStore::default());
    let sandbox = Arc::new(MemoryStore::new());
    let log = Arc::new(FailingLog::default());
    let manager = Arc::new(RollbackManager::new(
        Backends::new(production.clone(), sandbox.clone()),
        log.clone(),
    ));
    Harness {
        production,
        sandbox,
        log,
        manager,
    }
}
