//! `rewind serve` -- HTTP control surface for rollback and evaluation.
//!
//! Security features (all off or permissive unless configured):
//! - Optional API key, read from the env var named by `server.api_key_env`
//! - Per-IP rate limiting (`server.rate_limit` requests per minute)
//! - CORS headers on all responses (permissive)
//! - Request body size limit
//!
//! Endpoints:
//! - GET    /health                          - status and active session (exempt from auth)
//! - POST   /rollback                        - `{transaction_id}` or `{transaction_ids: [...]}`
//! - GET    /transactions                    - filtered audit log
//! - GET    /transactions/{id}
//! - POST   /evaluation/seeds                - capture production as a seed
//! - POST   /evaluation/start                - `{seed_snapshot_id}` -> `{session_id}`
//! - POST   /evaluation/end                  - `{session_id}` -> `{session_summary}`
//! - GET    /evaluation/sessions
//! - GET    /evaluation/sessions/{id}
//! - GET    /resources/{type}                - list, routed by execution mode
//! - GET    /resources/{type}/{id}           - read, routed by execution mode
//! - POST   /resources/{type}/{id}           - create
//! - PUT    /resources/{type}/{id}           - replace
//! - PATCH  /resources/{type}/{id}           - merge
//! - DELETE /resources/{type}/{id}           - delete
//! - PUT    /resources/{type}/{id}/field     - set one nested field
//!
//! Resource routes read `x-execution-mode`, `x-session-id` and `x-actor`.
//! All responses use Content-Type: application/json.

mod handlers;
mod middleware;
mod state;

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use axum::extract::DefaultBodyLimit;
use axum::http::{Method, StatusCode};
use axum::response::IntoResponse;
use axum::routing::{get, post, put};
use axum::{middleware as axum_middleware, Json, Router};
use rewind_engine::{
    BackendRouter, Backends, FileTransactionLog, MemoryTransactionLog, RollbackManager,
    SessionController, SnapshotCodec, TransactionLog,
};
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

pub use self::handlers::{ACTOR_HEADER, MODE_HEADER, SESSION_HEADER};
pub use self::state::AppState;

use self::handlers::{
    handle_capture_seed, handle_create_resource, handle_delete_resource, handle_end_session,
    handle_get_resource, handle_get_session, handle_get_transaction, handle_health,
    handle_list_resources, handle_list_sessions, handle_list_transactions, handle_merge_resource,
    handle_not_found, handle_replace_resource, handle_rollback, handle_set_field,
    handle_start_session,
};
use self::middleware::{auth_middleware, rate_limit_middleware};
use crate::config::Config;

/// Construct a JSON error response with the given status code and message.
pub(crate) fn json_error(status: StatusCode, message: &str) -> impl IntoResponse {
    (status, Json(serde_json::json!({"error": message})))
}

/// Build the stores, transaction log, manager, router and session
/// controller described by `config`.
pub async fn build_state(
    config: &Config,
    api_key: Option<String>,
) -> Result<Arc<AppState>, Box<dyn std::error::Error>> {
    let production = config.production.build();
    let sandbox = config.sandbox.build();

    let (log, codec): (Arc<dyn TransactionLog>, SnapshotCodec) = match &config.log.path {
        Some(path) => {
            let log = FileTransactionLog::open(path)?;
            let codec = SnapshotCodec::resume_after(log.last_snapshot_sequence().await);
            tracing::info!(
                path = %path.display(),
                transactions = log.len().await,
                "transaction journal opened"
            );
            (Arc::new(log) as Arc<dyn TransactionLog>, codec)
        }
        None => {
            tracing::warn!("no [log] path configured, transactions are kept in memory only");
            (
                Arc::new(MemoryTransactionLog::new()) as Arc<dyn TransactionLog>,
                SnapshotCodec::new(),
            )
        }
    };

    let manager = Arc::new(
        RollbackManager::new(Backends::new(production, sandbox), log).with_codec(codec),
    );
    let router = BackendRouter::new(Arc::clone(&manager), config.evaluation.router());
    let sessions = SessionController::new(manager, config.evaluation.sessions());
    let closed = sessions.recover().await?;
    if closed > 0 {
        tracing::warn!(sessions = closed, "closed evaluation sessions interrupted by a restart");
    }
    Ok(Arc::new(AppState::new(
        router,
        sessions,
        config.server.rate_limit,
        api_key,
    )))
}

/// The control-surface router over `state`.
pub fn app(state: Arc<AppState>, max_body_bytes: usize) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([
            Method::GET,
            Method::POST,
            Method::PUT,
            Method::PATCH,
            Method::DELETE,
        ])
        .allow_headers(Any);

    Router::new()
        .route("/health", get(handle_health))
        .route("/rollback", post(handle_rollback))
        .route("/transactions", get(handle_list_transactions))
        .route("/transactions/{id}", get(handle_get_transaction))
        .route("/evaluation/seeds", post(handle_capture_seed))
        .route("/evaluation/start", post(handle_start_session))
        .route("/evaluation/end", post(handle_end_session))
        .route("/evaluation/sessions", get(handle_list_sessions))
        .route("/evaluation/sessions/{id}", get(handle_get_session))
        .route("/resources/{resource_type}", get(handle_list_resources))
        .route(
            "/resources/{resource_type}/{resource_id}",
            get(handle_get_resource)
                .post(handle_create_resource)
                .put(handle_replace_resource)
                .patch(handle_merge_resource)
                .delete(handle_delete_resource),
        )
        .route(
            "/resources/{resource_type}/{resource_id}/field",
            put(handle_set_field),
        )
        .fallback(handle_not_found)
        .layer(axum_middleware::from_fn_with_state(
            state.clone(),
            auth_middleware,
        ))
        .layer(axum_middleware::from_fn_with_state(
            state.clone(),
            rate_limit_middleware,
        ))
        .layer(cors)
        .layer(DefaultBodyLimit::max(max_body_bytes))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Start the control surface on `config.server.port`.
///
/// When TLS cert/key paths are provided, the server listens over HTTPS
/// using `axum-server` with rustls. Otherwise it uses plain HTTP.
pub async fn start_server(
    config: Config,
    _tls_cert: Option<PathBuf>,
    _tls_key: Option<PathBuf>,
) -> Result<(), Box<dyn std::error::Error>> {
    let api_key = config.api_key();
    if api_key.is_some() {
        tracing::info!("API key authentication enabled");
    }
    tracing::info!(
        rate_limit = config.server.rate_limit,
        "rate limit: requests per minute per IP"
    );

    let state = build_state(&config, api_key).await?;
    let app = app(state, config.server.max_body_bytes);
    let addr = SocketAddr::from(([0, 0, 0, 0], config.server.port));

    // TLS support via axum-server + rustls (requires `tls` feature)
    #[cfg(feature = "tls")]
    if let (Some(cert_path), Some(key_path)) = (&_tls_cert, &_tls_key) {
        let tls = axum_server::tls_rustls::RustlsConfig::from_pem_file(cert_path, key_path).await?;
        tracing::info!(%addr, "rewind listening over https");
        axum_server::bind_rustls(addr, tls)
            .serve(app.into_make_service_with_connect_info::<SocketAddr>())
            .await?;
        return Ok(());
    }

    let listener = tokio::net::TcpListener::bind(addr).await?;
    tracing::info!(%addr, "rewind listening over http");
    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal())
    .await?;

    tracing::info!("server shut down");
    Ok(())
}

/// Wait for a shutdown signal (Ctrl+C).
pub(crate) async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "failed to listen for Ctrl+C, shutting down");
        return;
    }
    tracing::info!("received shutdown signal");
}
