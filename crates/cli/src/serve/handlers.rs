//! Route handlers: rollback, transactions, evaluation sessions and the
//! agent-facing resource routes.

use std::sync::Arc;

use axum::extract::{Path, Query, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use rewind_engine::{
    ExecutionMode, RollbackError, SessionId, SnapshotSetId, TransactionId,
};
use rewind_storage::{Resource, StorageError};
use serde::Deserialize;
use serde_json::{json, Map, Value};

use super::json_error;
use super::state::AppState;
use crate::query::TransactionQuery;

/// Header selecting `production` (default) or `evaluation` mode.
pub const MODE_HEADER: &str = "x-execution-mode";
/// Session the evaluation-mode call belongs to.
pub const SESSION_HEADER: &str = "x-session-id";
/// Identity recorded on every transaction. Required for mutations.
pub const ACTOR_HEADER: &str = "x-actor";

/// HTTP status for an engine error.
pub(crate) fn status_for(error: &RollbackError) -> StatusCode {
    match error {
        RollbackError::NotFound { .. }
        | RollbackError::TransactionNotFound(_)
        | RollbackError::SessionNotFound(_) => StatusCode::NOT_FOUND,
        RollbackError::AlreadyExists { .. }
        | RollbackError::DuplicateTransaction(_)
        | RollbackError::SessionNotActive(_)
        | RollbackError::SessionAlreadyActive(_)
        | RollbackError::NoActiveSession
        | RollbackError::SessionClosed { .. } => StatusCode::CONFLICT,
        RollbackError::NoEffect { .. } | RollbackError::SeedUnavailable { .. } => {
            StatusCode::UNPROCESSABLE_ENTITY
        }
        RollbackError::MutationFailed { source, .. } | RollbackError::Storage(source) => {
            match source {
                StorageError::NotFound { .. } => StatusCode::NOT_FOUND,
                StorageError::Rejected { .. } => StatusCode::UNPROCESSABLE_ENTITY,
                StorageError::Unsupported(_) | StorageError::Backend(_) => StatusCode::BAD_GATEWAY,
            }
        }
        RollbackError::RollbackApplication { .. } => StatusCode::BAD_GATEWAY,
        RollbackError::OrphanedMutation { .. }
        | RollbackError::Codec(_)
        | RollbackError::Log(_) => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

pub(crate) fn engine_error(error: RollbackError) -> Response {
    let status = status_for(&error);
    let body = json!({
        "error": error.to_string(),
        "kind": error.kind(),
        "retryable": error.is_retryable(),
    });
    (status, Json(body)).into_response()
}

fn bad_request(message: &str) -> Response {
    json_error(StatusCode::BAD_REQUEST, message).into_response()
}

/// Fallback handler for unmatched routes.
pub(crate) async fn handle_not_found() -> impl IntoResponse {
    json_error(StatusCode::NOT_FOUND, "not found")
}

/// GET /health
pub(crate) async fn handle_health(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let response = json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION"),
        "active_session": state.sessions.active_session().await,
    });
    (StatusCode::OK, Json(response))
}

// ── Rollback ────────────────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
#[serde(untagged)]
pub(crate) enum RollbackRequest {
    Batch { transaction_ids: Vec<TransactionId> },
    Single { transaction_id: TransactionId },
}

/// POST /rollback
pub(crate) async fn handle_rollback(
    State(state): State<Arc<AppState>>,
    Json(request): Json<RollbackRequest>,
) -> Response {
    let manager = state.router.manager();
    match request {
        RollbackRequest::Single { transaction_id } => match manager.rollback(transaction_id).await {
            Ok(txn) => Json(json!({
                "transaction_id": txn.transaction_id,
                "status": txn.status,
            }))
            .into_response(),
            Err(e) => engine_error(e),
        },
        RollbackRequest::Batch { transaction_ids } => {
            if transaction_ids.is_empty() {
                return bad_request("transaction_ids must not be empty");
            }
            match manager.rollback_batch(&transaction_ids).await {
                Ok(report) if report.is_complete() => Json(report).into_response(),
                Ok(report) => {
                    let error = report
                        .failed
                        .as_ref()
                        .map(|f| f.error.clone())
                        .unwrap_or_default();
                    (
                        StatusCode::CONFLICT,
                        Json(json!({ "error": error, "report": report })),
                    )
                        .into_response()
                }
                Err(e) => engine_error(e),
            }
        }
    }
}

// ── Transactions ────────────────────────────────────────────────────────────

/// GET /transactions
pub(crate) async fn handle_list_transactions(
    State(state): State<Arc<AppState>>,
    Query(query): Query<TransactionQuery>,
) -> Response {
    let filter = match query.into_filter() {
        Ok(f) => f,
        Err(message) => return bad_request(&message),
    };
    match state.router.manager().log().query(&filter).await {
        Ok(transactions) => Json(json!({ "transactions": transactions })).into_response(),
        Err(e) => engine_error(e.into()),
    }
}

/// GET /transactions/{id}
pub(crate) async fn handle_get_transaction(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Response {
    let transaction_id: TransactionId = match id.parse() {
        Ok(id) => id,
        Err(_) => return bad_request(&format!("invalid transaction id '{}'", id)),
    };
    match state.router.manager().log().get(transaction_id).await {
        Ok(txn) => Json(txn).into_response(),
        Err(e) => engine_error(e.into()),
    }
}

// ── Evaluation sessions ─────────────────────────────────────────────────────

/// POST /evaluation/seeds
pub(crate) async fn handle_capture_seed(State(state): State<Arc<AppState>>) -> Response {
    match state.sessions.capture_seed().await {
        Ok(id) => (
            StatusCode::CREATED,
            Json(json!({ "seed_snapshot_id": id })),
        )
            .into_response(),
        Err(e) => engine_error(e),
    }
}

#[derive(Debug, Deserialize)]
pub(crate) struct StartRequest {
    seed_snapshot_id: SnapshotSetId,
}

/// POST /evaluation/start
pub(crate) async fn handle_start_session(
    State(state): State<Arc<AppState>>,
    Json(request): Json<StartRequest>,
) -> Response {
    match state.sessions.start_session(request.seed_snapshot_id).await {
        Ok(session_id) => (
            StatusCode::CREATED,
            Json(json!({ "session_id": session_id })),
        )
            .into_response(),
        Err(e) => engine_error(e),
    }
}

#[derive(Debug, Deserialize)]
pub(crate) struct EndRequest {
    session_id: SessionId,
}

/// POST /evaluation/end
pub(crate) async fn handle_end_session(
    State(state): State<Arc<AppState>>,
    Json(request): Json<EndRequest>,
) -> Response {
    match state.sessions.end_session(request.session_id).await {
        Ok(summary) => Json(json!({ "session_summary": summary })).into_response(),
        Err(e) => engine_error(e),
    }
}

/// GET /evaluation/sessions
pub(crate) async fn handle_list_sessions(State(state): State<Arc<AppState>>) -> Response {
    match state.sessions.sessions().await {
        Ok(sessions) => Json(json!({ "sessions": sessions })).into_response(),
        Err(e) => engine_error(e),
    }
}

/// GET /evaluation/sessions/{id}
pub(crate) async fn handle_get_session(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Response {
    let session_id: SessionId = match id.parse() {
        Ok(id) => id,
        Err(_) => return bad_request(&format!("invalid session id '{}'", id)),
    };
    match state.sessions.session(session_id).await {
        Ok(session) => Json(session).into_response(),
        Err(e) => engine_error(e),
    }
}

// ── Agent resource routes ───────────────────────────────────────────────────

fn header<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|v| !v.is_empty())
}

/// Resolve the execution mode of a call from its headers.
pub(crate) fn execution_mode(headers: &HeaderMap) -> Result<ExecutionMode, String> {
    match header(headers, MODE_HEADER).unwrap_or("production") {
        "production" => Ok(ExecutionMode::Production),
        "evaluation" => {
            let raw = header(headers, SESSION_HEADER)
                .ok_or_else(|| format!("evaluation mode requires the {} header", SESSION_HEADER))?;
            let session_id = raw
                .parse()
                .map_err(|_| format!("invalid session id '{}'", raw))?;
            Ok(ExecutionMode::Evaluation { session_id })
        }
        other => Err(format!(
            "invalid {} '{}': expected production or evaluation",
            MODE_HEADER, other
        )),
    }
}

fn actor(headers: &HeaderMap) -> Result<String, String> {
    header(headers, ACTOR_HEADER)
        .map(str::to_string)
        .ok_or_else(|| format!("mutations require the {} header", ACTOR_HEADER))
}

/// Mode and actor for a mutating call.
fn mutation_context(headers: &HeaderMap) -> Result<(ExecutionMode, String), Response> {
    let mode = execution_mode(headers).map_err(|m| bad_request(&m))?;
    let actor = actor(headers).map_err(|m| bad_request(&m))?;
    Ok((mode, actor))
}

fn object_body(body: Value) -> Result<Map<String, Value>, Response> {
    match body {
        Value::Object(map) => Ok(map),
        _ => Err(json_error(StatusCode::UNPROCESSABLE_ENTITY, "body must be a JSON object").into_response()),
    }
}

/// GET /resources/{type}
pub(crate) async fn handle_list_resources(
    State(state): State<Arc<AppState>>,
    Path(resource_type): Path<String>,
    headers: HeaderMap,
) -> Response {
    let mode = match execution_mode(&headers) {
        Ok(m) => m,
        Err(message) => return bad_request(&message),
    };
    match state.router.list(mode, &resource_type).await {
        Ok(entries) => {
            let list = rewind_storage::wire::ResourceList::from(entries);
            Json(list).into_response()
        }
        Err(e) => engine_error(e),
    }
}

/// GET /resources/{type}/{id}
pub(crate) async fn handle_get_resource(
    State(state): State<Arc<AppState>>,
    Path((resource_type, resource_id)): Path<(String, String)>,
    headers: HeaderMap,
) -> Response {
    let mode = match execution_mode(&headers) {
        Ok(m) => m,
        Err(message) => return bad_request(&message),
    };
    match state.router.get(mode, &resource_type, &resource_id).await {
        Ok(resource) => Json(resource).into_response(),
        Err(e) => engine_error(e),
    }
}

fn executed(status: StatusCode, transaction_id: TransactionId, resource: Option<Resource>) -> Response {
    let body = match resource {
        Some(resource) => json!({ "transaction_id": transaction_id, "resource": resource }),
        None => json!({ "transaction_id": transaction_id }),
    };
    (status, Json(body)).into_response()
}

/// POST /resources/{type}/{id} (create)
pub(crate) async fn handle_create_resource(
    State(state): State<Arc<AppState>>,
    Path((resource_type, resource_id)): Path<(String, String)>,
    headers: HeaderMap,
    Json(body): Json<Value>,
) -> Response {
    let (mode, actor) = match mutation_context(&headers) {
        Ok(ctx) => ctx,
        Err(response) => return response,
    };
    let fields = match object_body(body) {
        Ok(f) => f,
        Err(response) => return response,
    };
    match state
        .router
        .create(mode, &resource_type, &resource_id, Resource::from(fields), &actor)
        .await
    {
        Ok(done) => executed(StatusCode::CREATED, done.transaction_id, Some(done.result)),
        Err(e) => engine_error(e),
    }
}

/// PUT /resources/{type}/{id} (full replace of an existing resource)
pub(crate) async fn handle_replace_resource(
    State(state): State<Arc<AppState>>,
    Path((resource_type, resource_id)): Path<(String, String)>,
    headers: HeaderMap,
    Json(body): Json<Value>,
) -> Response {
    let (mode, actor) = match mutation_context(&headers) {
        Ok(ctx) => ctx,
        Err(response) => return response,
    };
    let fields = match object_body(body) {
        Ok(f) => f,
        Err(response) => return response,
    };
    match state
        .router
        .replace(mode, &resource_type, &resource_id, Resource::from(fields), &actor)
        .await
    {
        Ok(done) => executed(StatusCode::OK, done.transaction_id, Some(done.result)),
        Err(e) => engine_error(e),
    }
}

/// PATCH /resources/{type}/{id} (shallow merge; `null` removes a field)
pub(crate) async fn handle_merge_resource(
    State(state): State<Arc<AppState>>,
    Path((resource_type, resource_id)): Path<(String, String)>,
    headers: HeaderMap,
    Json(body): Json<Value>,
) -> Response {
    let (mode, actor) = match mutation_context(&headers) {
        Ok(ctx) => ctx,
        Err(response) => return response,
    };
    let patch = match object_body(body) {
        Ok(p) => p,
        Err(response) => return response,
    };
    match state
        .router
        .merge(mode, &resource_type, &resource_id, patch, &actor)
        .await
    {
        Ok(done) => executed(StatusCode::OK, done.transaction_id, Some(done.result)),
        Err(e) => engine_error(e),
    }
}

#[derive(Debug, Deserialize)]
pub(crate) struct SetFieldRequest {
    path: Vec<String>,
    value: Value,
}

/// PUT /resources/{type}/{id}/field (set one nested field)
pub(crate) async fn handle_set_field(
    State(state): State<Arc<AppState>>,
    Path((resource_type, resource_id)): Path<(String, String)>,
    headers: HeaderMap,
    Json(request): Json<SetFieldRequest>,
) -> Response {
    let (mode, actor) = match mutation_context(&headers) {
        Ok(ctx) => ctx,
        Err(response) => return response,
    };
    if request.path.is_empty() {
        return bad_request("path must not be empty");
    }
    match state
        .router
        .set_field(
            mode,
            &resource_type,
            &resource_id,
            request.path,
            request.value,
            &actor,
        )
        .await
    {
        Ok(done) => executed(StatusCode::OK, done.transaction_id, Some(done.result)),
        Err(e) => engine_error(e),
    }
}

/// DELETE /resources/{type}/{id}
pub(crate) async fn handle_delete_resource(
    State(state): State<Arc<AppState>>,
    Path((resource_type, resource_id)): Path<(String, String)>,
    headers: HeaderMap,
) -> Response {
    let (mode, actor) = match mutation_context(&headers) {
        Ok(ctx) => ctx,
        Err(response) => return response,
    };
    match state
        .router
        .delete(mode, &resource_type, &resource_id, &actor)
        .await
    {
        Ok(done) => executed(StatusCode::OK, done.transaction_id, None),
        Err(e) => engine_error(e),
    }
}
