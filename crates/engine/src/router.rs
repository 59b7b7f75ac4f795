//! Backend router: picks the production or sandbox store per call from an
//! explicit execution mode.

use std::collections::BTreeSet;
use std::future::Future;
use std::sync::Arc;

use rewind_storage::{Resource, StorageError};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::RollbackError;
use crate::manager::{Executed, RollbackManager};
use crate::mutation::MutationScope;
use crate::types::{Backend, Operation, SessionId};

/// Where a call runs. Passed on every call; there is no ambient mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "mode", rename_all = "lowercase")]
pub enum ExecutionMode {
    Production,
    Evaluation { session_id: SessionId },
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RouterConfig {
    /// Resource types that evaluation-mode reads take from production.
    pub passthrough_read_types: BTreeSet<String>,
}

/// Routes reads and writes to the right backend.
///
/// Evaluation-mode writes always go to the sandbox. Failures are returned as
/// they are; a call is never retried against the other backend.
pub struct BackendRouter {
    manager: Arc<RollbackManager>,
    config: RouterConfig,
}

impl BackendRouter {
    pub fn new(manager: Arc<RollbackManager>, config: RouterConfig) -> Self {
        BackendRouter { manager, config }
    }

    pub fn manager(&self) -> &Arc<RollbackManager> {
        &self.manager
    }

    pub fn config(&self) -> &RouterConfig {
        &self.config
    }

    /// The backend a read of `resource_type` goes to under `mode`.
    pub fn read_backend(&self, mode: ExecutionMode, resource_type: &str) -> Backend {
        match mode {
            ExecutionMode::Production => Backend::Production,
            ExecutionMode::Evaluation { .. }
                if self.config.passthrough_read_types.contains(resource_type) =>
            {
                Backend::Production
            }
            ExecutionMode::Evaluation { .. } => Backend::Sandbox,
        }
    }

    /// The backend a write goes to under `mode`.
    pub fn write_backend(mode: ExecutionMode) -> Backend {
        match mode {
            ExecutionMode::Production => Backend::Production,
            ExecutionMode::Evaluation { .. } => Backend::Sandbox,
        }
    }

    async fn ensure_session(&self, mode: ExecutionMode) -> Result<(), RollbackError> {
        if let ExecutionMode::Evaluation { session_id } = mode {
            if self.manager.active_session().await != Some(session_id) {
                return Err(RollbackError::SessionNotActive(session_id));
            }
        }
        Ok(())
    }

    pub async fn get(
        &self,
        mode: ExecutionMode,
        resource_type: &str,
        resource_id: &str,
    ) -> Result<Resource, RollbackError> {
        self.ensure_session(mode).await?;
        let backend = self.read_backend(mode, resource_type);
        self.manager.read(backend, resource_type, resource_id).await
    }

    pub async fn list(
        &self,
        mode: ExecutionMode,
        resource_type: &str,
    ) -> Result<Vec<(String, Resource)>, RollbackError> {
        self.ensure_session(mode).await?;
        let backend = self.read_backend(mode, resource_type);
        self.manager.list(backend, resource_type).await
    }

    /// Run an arbitrary mutation through the rollback manager.
    pub async fn mutate<T, F, Fut>(
        &self,
        mode: ExecutionMode,
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
        match mode {
            ExecutionMode::Production => {
                self.manager
                    .execute_with_rollback(
                        Backend::Production,
                        resource_type,
                        resource_id,
                        operation,
                        mutation_fn,
                        actor,
                    )
                    .await
            }
            ExecutionMode::Evaluation { session_id } => {
                self.manager
                    .execute_in_session(
                        session_id,
                        resource_type,
                        resource_id,
                        operation,
                        mutation_fn,
                        actor,
                    )
                    .await
            }
        }
    }

    pub async fn create(
        &self,
        mode: ExecutionMode,
        resource_type: &str,
        resource_id: &str,
        resource: Resource,
        actor: &str,
    ) -> Result<Executed<Resource>, RollbackError> {
        self.mutate(
            mode,
            resource_type,
            resource_id,
            Operation::Create,
            |scope| async move { scope.put(resource).await },
            actor,
        )
        .await
    }

    pub async fn replace(
        &self,
        mode: ExecutionMode,
        resource_type: &str,
        resource_id: &str,
        resource: Resource,
        actor: &str,
    ) -> Result<Executed<Resource>, RollbackError> {
        self.mutate(
            mode,
            resource_type,
            resource_id,
            Operation::Update,
            |scope| async move { scope.put(resource).await },
            actor,
        )
        .await
    }

    pub async fn merge(
        &self,
        mode: ExecutionMode,
        resource_type: &str,
        resource_id: &str,
        patch: Map<String, Value>,
        actor: &str,
    ) -> Result<Executed<Resource>, RollbackError> {
        self.mutate(
            mode,
            resource_type,
            resource_id,
            Operation::Update,
            |scope| async move { scope.merge(patch).await },
            actor,
        )
        .await
    }

    /// Set one nested field, e.g. a form answer at `["answers", "q1"]`.
    pub async fn set_field(
        &self,
        mode: ExecutionMode,
        resource_type: &str,
        resource_id: &str,
        path: Vec<String>,
        value: Value,
        actor: &str,
    ) -> Result<Executed<Resource>, RollbackError> {
        self.mutate(
            mode,
            resource_type,
            resource_id,
            Operation::Update,
            |scope| async move {
                let segments: Vec<&str> = path.iter().map(String::as_str).collect();
                scope.set_path(&segments, value).await
            },
            actor,
        )
        .await
    }

    pub async fn delete(
        &self,
        mode: ExecutionMode,
        resource_type: &str,
        resource_id: &str,
        actor: &str,
    ) -> Result<Executed<()>, RollbackError> {
        self.mutate(
            mode,
            resource_type,
            resource_id,
            Operation::Delete,
            |scope| async move { scope.delete().await },
            actor,
        )
        .await
    }
}
