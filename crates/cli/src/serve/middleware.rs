//! Request guards applied before routing.
//!
//! Guard rejections use the same body shape as engine errors
//! (`error`, `kind`, `retryable`) so agents can branch on `kind` alone.

use std::net::SocketAddr;
use std::sync::Arc;

use axum::extract::{ConnectInfo, Request, State};
use axum::http::header::RETRY_AFTER;
use axum::http::{HeaderMap, HeaderValue, StatusCode};
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;

use super::state::AppState;

const API_KEY_HEADER: &str = "x-api-key";

fn rejection(status: StatusCode, kind: &str, message: &str) -> Response {
    let body = json!({
        "error": message,
        "kind": kind,
        "retryable": status == StatusCode::TOO_MANY_REQUESTS,
    });
    (status, Json(body)).into_response()
}

fn header_str<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers.get(name).and_then(|v| v.to_str().ok())
}

/// The key a request presents. A bearer token wins over `X-API-Key`.
fn presented_key(headers: &HeaderMap) -> Option<&str> {
    header_str(headers, "authorization")
        .and_then(|v| v.strip_prefix("Bearer "))
        .or_else(|| header_str(headers, API_KEY_HEADER))
}

/// Requires the configured API key on everything except `/health`.
pub(crate) async fn auth_middleware(
    State(state): State<Arc<AppState>>,
    request: Request,
    next: Next,
) -> Response {
    let Some(expected) = state.api_key.as_deref() else {
        return next.run(request).await;
    };
    if request.uri().path() == "/health" {
        return next.run(request).await;
    }
    match presented_key(request.headers()) {
        Some(key) if key == expected => next.run(request).await,
        Some(_) => rejection(StatusCode::FORBIDDEN, "forbidden", "invalid API key"),
        None => rejection(
            StatusCode::UNAUTHORIZED,
            "unauthenticated",
            "authentication required",
        ),
    }
}

/// Per-client request budget. Connections served without a peer address
/// are not limited.
pub(crate) async fn rate_limit_middleware(
    State(state): State<Arc<AppState>>,
    request: Request,
    next: Next,
) -> Response {
    let peer = request
        .extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ConnectInfo(addr)| addr.ip());
    let Some(ip) = peer else {
        return next.run(request).await;
    };
    match state.rate_limiter.admit(ip).await {
        Ok(()) => next.run(request).await,
        Err(retry_after) => {
            let mut response = rejection(
                StatusCode::TOO_MANY_REQUESTS,
                "rate_limited",
                "rate limit exceeded",
            );
            response
                .headers_mut()
                .insert(RETRY_AFTER, HeaderValue::from(retry_after));
            response
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn headers(pairs: &[(&'static str, &'static str)]) -> HeaderMap {
        let mut map = HeaderMap::new();
        for (name, value) in pairs {
            map.insert(*name, HeaderValue::from_static(value));
        }
        map
    }

    #[test]
    fn bearer_token_takes_precedence() {
        let both = headers(&[("authorization", "Bearer one"), ("x-api-key", "two")]);
        assert_eq!(presented_key(&both), Some("one"));
        let key_only = headers(&[("x-api-key", "two")]);
        assert_eq!(presented_key(&key_only), Some("two"));
    }

    #[test]
    fn other_schemes_are_not_keys() {
        assert_eq!(
            presented_key(&headers(&[("authorization", "Basic Zm9vOmJhcg==")])),
            None
        );
        assert_eq!(presented_key(&HeaderMap::new()), None);
    }

    #[test]
    fn rejections_carry_a_kind() {
        let response = rejection(StatusCode::TOO_MANY_REQUESTS, "rate_limited", "slow down");
        assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);
    }
}
