//! Evaluation session controller.
//!
//! A session brackets a run of sandboxed mutations: `start_session` resets
//! the sandbox and seeds it from a stored snapshot set, `end_session`
//! collects the session's transactions and resets the sandbox again. Both
//! hold the sandbox gate exclusively, so no sandbox write straddles either
//! boundary. Session records are kept in the transaction log, written once
//! on open and once on close.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;

use crate::codec::digest_set;
use crate::error::RollbackError;
use crate::log::LogError;
use crate::manager::RollbackManager;
use crate::types::{
    now_rfc3339, Backend, SessionId, SnapshotSetId, TransactionId, TransactionStatus,
};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    /// Compare production before and after each session.
    pub verify_production_isolation: bool,
}

/// One evaluation session. Immutable once `ended_at` is set.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EvaluationSession {
    pub session_id: SessionId,
    pub seed_snapshot_id: SnapshotSetId,
    pub started_at: String,
    pub ended_at: Option<String>,
    /// Chronological. Filled in from the log when the session ends.
    pub transaction_ids: Vec<TransactionId>,
}

impl EvaluationSession {
    pub fn is_active(&self) -> bool {
        self.ended_at.is_none()
    }
}

/// What `end_session` reports.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionSummary {
    pub session_id: SessionId,
    pub seed_snapshot_id: SnapshotSetId,
    pub started_at: String,
    pub ended_at: String,
    /// Chronological.
    pub transactions: Vec<TransactionId>,
    pub status_counts: BTreeMap<TransactionStatus, usize>,
    /// `None` unless production isolation checking is enabled.
    pub production_unchanged: Option<bool>,
}

pub struct SessionController {
    manager: Arc<RollbackManager>,
    config: SessionConfig,
    /// Production digest taken when each session opened, when isolation
    /// checking is on.
    production_digests: Mutex<HashMap<SessionId, String>>,
}

impl SessionController {
    pub fn new(manager: Arc<RollbackManager>, config: SessionConfig) -> Self {
        SessionController {
            manager,
            config,
            production_digests: Mutex::new(HashMap::new()),
        }
    }

    /// Close any session the log still shows as open.
    ///
    /// Run once at startup: the sandbox gate starts empty, so a session left
    /// open by an earlier process can never be ended normally. Returns the
    /// number of sessions closed.
    pub async fn recover(&self) -> Result<usize, RollbackError> {
        let active = self.manager.active_session().await;
        let mut closed = 0;
        for mut session in self.manager.log().sessions().await? {
            if !session.is_active() || Some(session.session_id) == active {
                continue;
            }
            session.transaction_ids = self.transaction_ids(session.session_id).await?;
            session.ended_at = Some(now_rfc3339());
            tracing::warn!(
                session_id = %session.session_id,
                transactions = session.transaction_ids.len(),
                "closing evaluation session left open by an earlier run"
            );
            self.manager.log().store_session(session).await?;
            closed += 1;
        }
        Ok(closed)
    }

    pub fn manager(&self) -> &Arc<RollbackManager> {
        &self.manager
    }

    /// Capture the production store into a stored snapshot set usable as a
    /// session seed.
    pub async fn capture_seed(&self) -> Result<SnapshotSetId, RollbackError> {
        let resources = self.manager.export(Backend::Production).await?;
        let set = self
            .manager
            .codec()
            .capture_set(Backend::Production, &resources)?;
        let id = set.id;
        let count = set.snapshots.len();
        self.manager.log().store_snapshot_set(set).await?;
        tracing::info!(seed_snapshot_id = %id, resources = count, "captured production seed");
        Ok(id)
    }

    /// Reset the sandbox, seed it, and open a session.
    pub async fn start_session(
        &self,
        seed_snapshot_id: SnapshotSetId,
    ) -> Result<SessionId, RollbackError> {
        let seed = match self.manager.log().snapshot_set(seed_snapshot_id).await {
            Ok(seed) => seed,
            Err(LogError::SnapshotSetNotFound(_)) => {
                return Err(RollbackError::SeedUnavailable {
                    seed_snapshot_id,
                    reason: "no snapshot set with this id".to_string(),
                })
            }
            Err(e) => {
                return Err(RollbackError::SeedUnavailable {
                    seed_snapshot_id,
                    reason: e.to_string(),
                })
            }
        };
        let resources =
            self.manager
                .codec()
                .restore_set(&seed)
                .map_err(|e| RollbackError::SeedUnavailable {
                    seed_snapshot_id,
                    reason: e.to_string(),
                })?;

        let mut gate = self.manager.gate().write().await;
        if let Some(active) = *gate {
            return Err(RollbackError::SessionAlreadyActive(active));
        }

        let production_digest = if self.config.verify_production_isolation {
            Some(self.production_digest().await?)
        } else {
            None
        };

        let sandbox = self.manager.sandbox_control();
        sandbox.reset().await?;
        if let Err(e) = sandbox.seed(resources).await {
            if let Err(reset_err) = sandbox.reset().await {
                tracing::error!(error = %reset_err, "sandbox reset after failed seed also failed");
            }
            return Err(e.into());
        }

        let session_id = SessionId::generate();
        let session = EvaluationSession {
            session_id,
            seed_snapshot_id,
            started_at: now_rfc3339(),
            ended_at: None,
            transaction_ids: Vec::new(),
        };
        if let Err(e) = self.manager.log().store_session(session).await {
            if let Err(reset_err) = sandbox.reset().await {
                tracing::error!(error = %reset_err, "sandbox reset after failed session open also failed");
            }
            return Err(e.into());
        }
        if let Some(digest) = production_digest {
            self.production_digests.lock().await.insert(session_id, digest);
        }
        *gate = Some(session_id);

        tracing::info!(
            session_id = %session_id,
            seed_snapshot_id = %seed_snapshot_id,
            resources = seed.snapshots.len(),
            "evaluation session started"
        );
        Ok(session_id)
    }

    /// Close a session and reset the sandbox.
    ///
    /// If the reset fails the session stays open and the error is returned,
    /// so the caller can retry without losing the boundary.
    pub async fn end_session(&self, session_id: SessionId) -> Result<SessionSummary, RollbackError> {
        let mut gate = self.manager.gate().write().await;
        let session = self.find(session_id).await?;
        if *gate != Some(session_id) || !session.is_active() {
            return Err(RollbackError::SessionNotActive(session_id));
        }

        let transactions = self.manager.log().list_for_session(session_id).await?;
        let at_start = self.production_digests.lock().await.get(&session_id).cloned();
        let production_unchanged = match at_start {
            Some(at_start) => Some(self.production_digest().await? == at_start),
            None => None,
        };
        self.manager.sandbox_control().reset().await?;

        if production_unchanged == Some(false) {
            tracing::error!(
                session_id = %session_id,
                "production store changed during evaluation session"
            );
        }

        let mut status_counts = BTreeMap::new();
        for txn in &transactions {
            *status_counts.entry(txn.status).or_insert(0) += 1;
        }
        let transaction_ids: Vec<TransactionId> =
            transactions.iter().map(|t| t.transaction_id).collect();
        let ended_at = now_rfc3339();

        self.manager
            .log()
            .store_session(EvaluationSession {
                ended_at: Some(ended_at.clone()),
                transaction_ids: transaction_ids.clone(),
                ..session.clone()
            })
            .await?;
        self.production_digests.lock().await.remove(&session_id);
        *gate = None;

        tracing::info!(
            session_id = %session_id,
            transactions = transaction_ids.len(),
            production_unchanged = ?production_unchanged,
            "evaluation session ended"
        );

        Ok(SessionSummary {
            session_id,
            seed_snapshot_id: session.seed_snapshot_id,
            started_at: session.started_at,
            ended_at,
            transactions: transaction_ids,
            status_counts,
            production_unchanged,
        })
    }

    /// A session record. An active session's transaction list is read live
    /// from the log.
    pub async fn session(&self, session_id: SessionId) -> Result<EvaluationSession, RollbackError> {
        let mut session = self.find(session_id).await?;
        if session.is_active() {
            session.transaction_ids = self.transaction_ids(session_id).await?;
        }
        Ok(session)
    }

    /// All sessions, oldest first.
    pub async fn sessions(&self) -> Result<Vec<EvaluationSession>, RollbackError> {
        Ok(self.manager.log().sessions().await?)
    }

    async fn find(&self, session_id: SessionId) -> Result<EvaluationSession, RollbackError> {
        self.manager
            .log()
            .session(session_id)
            .await?
            .ok_or(RollbackError::SessionNotFound(session_id))
    }

    async fn transaction_ids(&self, session_id: SessionId) -> Result<Vec<TransactionId>, RollbackError> {
        Ok(self
            .manager
            .log()
            .list_for_session(session_id)
            .await?
            .into_iter()
            .map(|t| t.transaction_id)
            .collect())
    }

    pub async fn active_session(&self) -> Option<SessionId> {
        self.manager.active_session().await
    }

    async fn production_digest(&self) -> Result<String, RollbackError> {
        let resources = self.manager.export(Backend::Production).await?;
        Ok(digest_set(&resources)?)
    }
}
