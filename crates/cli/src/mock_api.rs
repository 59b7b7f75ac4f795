//! `rewind mock-api` -- an in-memory store served over the resource wire
//! protocol.
//!
//! This is what an `HttpStore` talks to when no real API is available: a
//! stand-in production API in development, or the sandbox twin itself.
//!
//! Endpoints:
//! - GET    /health
//! - GET    /resources                  - whole store as a resource set
//! - GET    /resources/{type}           - `{"resources": [{"id", "resource"}]}`
//! - GET    /resources/{type}/{id}
//! - PUT    /resources/{type}/{id}      - full replace, answers the stored record
//! - DELETE /resources/{type}/{id}      - 204
//! - POST   /seed                       - replace contents, 204
//! - POST   /reset                      - empty the store, 204

use std::net::SocketAddr;
use std::path::Path;
use std::sync::Arc;

use axum::extract::{Path as UrlPath, Request, State};
use axum::http::StatusCode;
use axum::middleware::{self as axum_middleware, Next};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use rewind_storage::wire::ResourceList;
use rewind_storage::{MemoryStore, Resource, ResourceSet, ResourceStore, SandboxStore, StorageError};
use tower_http::trace::TraceLayer;

use crate::serve::{json_error, shutdown_signal};

#[derive(Clone)]
struct MockState {
    store: Arc<MemoryStore>,
    token: Option<String>,
}

/// Build the mock API router over `store`. With `token` set, every request
/// except `/health` must carry `Authorization: Bearer <token>`.
pub fn router(store: Arc<MemoryStore>, token: Option<String>) -> Router {
    let state = MockState { store, token };
    Router::new()
        .route("/health", get(handle_health))
        .route("/resources", get(handle_export))
        .route("/resources/{resource_type}", get(handle_list))
        .route(
            "/resources/{resource_type}/{resource_id}",
            get(handle_get).put(handle_put).delete(handle_delete),
        )
        .route("/seed", post(handle_seed))
        .route("/reset", post(handle_reset))
        .fallback(|| async { json_error(StatusCode::NOT_FOUND, "not found") })
        .layer(axum_middleware::from_fn_with_state(
            state.clone(),
            bearer_middleware,
        ))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Load a seed file (a JSON resource set) into a fresh store.
pub fn load_seed(path: &Path) -> Result<ResourceSet, String> {
    let text = std::fs::read_to_string(path)
        .map_err(|e| format!("error reading seed file '{}': {}", path.display(), e))?;
    serde_json::from_str(&text)
        .map_err(|e| format!("error parsing seed file '{}': {}", path.display(), e))
}

/// Serve the mock API until Ctrl+C.
pub async fn start_mock_api(
    port: u16,
    seed: ResourceSet,
    token: Option<String>,
) -> Result<(), Box<dyn std::error::Error>> {
    let resources = seed.len();
    let app = router(Arc::new(MemoryStore::with_contents(seed)), token);
    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    let listener = tokio::net::TcpListener::bind(addr).await?;
    tracing::info!(%addr, resources, "mock resource API listening");
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;
    tracing::info!("mock resource API shut down");
    Ok(())
}

async fn bearer_middleware(State(state): State<MockState>, request: Request, next: Next) -> Response {
    let Some(expected) = &state.token else {
        return next.run(request).await;
    };
    if request.uri().path() == "/health" {
        return next.run(request).await;
    }
    let presented = request
        .headers()
        .get("authorization")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "));
    match presented {
        Some(token) if token == expected => next.run(request).await,
        Some(_) => json_error(StatusCode::FORBIDDEN, "invalid token").into_response(),
        None => json_error(StatusCode::UNAUTHORIZED, "authentication required").into_response(),
    }
}

fn storage_error(e: StorageError) -> Response {
    let status = match &e {
        StorageError::NotFound { .. } => StatusCode::NOT_FOUND,
        StorageError::Rejected { .. } => StatusCode::UNPROCESSABLE_ENTITY,
        StorageError::Unsupported(_) => StatusCode::NOT_IMPLEMENTED,
        StorageError::Backend(_) => StatusCode::INTERNAL_SERVER_ERROR,
    };
    json_error(status, &e.to_string()).into_response()
}

async fn handle_health() -> impl IntoResponse {
    Json(serde_json::json!({ "status": "ok" }))
}

async fn handle_export(State(state): State<MockState>) -> Response {
    match state.store.export().await {
        Ok(set) => Json(set).into_response(),
        Err(e) => storage_error(e),
    }
}

async fn handle_list(
    State(state): State<MockState>,
    UrlPath(resource_type): UrlPath<String>,
) -> Response {
    match state.store.list(&resource_type).await {
        Ok(entries) => Json(ResourceList::from(entries)).into_response(),
        Err(e) => storage_error(e),
    }
}

async fn handle_get(
    State(state): State<MockState>,
    UrlPath((resource_type, resource_id)): UrlPath<(String, String)>,
) -> Response {
    match state.store.get(&resource_type, &resource_id).await {
        Ok(resource) => Json(resource).into_response(),
        Err(e) => storage_error(e),
    }
}

async fn handle_put(
    State(state): State<MockState>,
    UrlPath((resource_type, resource_id)): UrlPath<(String, String)>,
    Json(resource): Json<Resource>,
) -> Response {
    match state.store.put(&resource_type, &resource_id, resource).await {
        Ok(stored) => Json(stored).into_response(),
        Err(e) => storage_error(e),
    }
}

async fn handle_delete(
    State(state): State<MockState>,
    UrlPath((resource_type, resource_id)): UrlPath<(String, String)>,
) -> Response {
    match state.store.delete(&resource_type, &resource_id).await {
        Ok(()) => StatusCode::NO_CONTENT.into_response(),
        Err(e) => storage_error(e),
    }
}

async fn handle_seed(State(state): State<MockState>, Json(resources): Json<ResourceSet>) -> Response {
    match state.store.seed(resources).await {
        Ok(()) => StatusCode::NO_CONTENT.into_response(),
        Err(e) => storage_error(e),
    }
}

async fn handle_reset(State(state): State<MockState>) -> Response {
    match state.store.reset().await {
        Ok(()) => StatusCode::NO_CONTENT.into_response(),
        Err(e) => storage_error(e),
    }
}
