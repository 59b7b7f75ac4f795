//! HTTP resource store: talks the resource wire protocol to a remote API.
//!
//! Uses `ureq` (sync) wrapped in `tokio::task::spawn_blocking` to avoid
//! blocking the async runtime. The same adapter fronts the real production
//! API and a mock API serving the sandbox, so both backends go through one
//! code path.

use std::time::Duration;

use async_trait::async_trait;

use crate::error::StorageError;
use crate::record::{Resource, ResourceSet};
use crate::traits::{ResourceStore, SandboxStore};
use crate::wire::ResourceList;

type HttpResponse = ureq::http::Response<ureq::Body>;

/// Default per-request timeout when none is configured.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(10);

/// A `ResourceStore` backed by a remote resource API.
///
/// - `GET/PUT/DELETE {base_url}/resources/{type}/{id}`
/// - `GET {base_url}/resources/{type}`, `GET {base_url}/resources`
/// - `POST {base_url}/seed`, `POST {base_url}/reset` (sandbox only)
///
/// A non-empty `auth_token` is sent as `Authorization: Bearer <token>`.
/// Transport failures and timeouts surface as `StorageError::Backend`.
#[derive(Clone)]
pub struct HttpStore {
    base_url: String,
    auth_token: Option<String>,
    agent: ureq::Agent,
}

impl std::fmt::Debug for HttpStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HttpStore")
            .field("base_url", &self.base_url)
            .field("auth_token", &self.auth_token.as_ref().map(|_| "<redacted>"))
            .finish()
    }
}

impl HttpStore {
    pub fn new(base_url: &str, auth_token: Option<String>, timeout: Duration) -> Self {
        let config = ureq::Agent::config_builder()
            .timeout_global(Some(timeout))
            .http_status_as_error(false)
            .build();
        HttpStore {
            base_url: base_url.trim_end_matches('/').to_string(),
            auth_token: auth_token.filter(|t| !t.is_empty()),
            agent: ureq::Agent::new_with_config(config),
        }
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn resource_url(&self, resource_type: &str, resource_id: &str) -> String {
        format!(
            "{}/resources/{}/{}",
            self.base_url,
            encode_segment(resource_type),
            encode_segment(resource_id)
        )
    }

    fn collection_url(&self, resource_type: &str) -> String {
        format!("{}/resources/{}", self.base_url, encode_segment(resource_type))
    }

    /// Run a blocking request closure on the blocking pool.
    async fn blocking<T, F>(&self, call: F) -> Result<T, StorageError>
    where
        T: Send + 'static,
        F: FnOnce(ureq::Agent, Option<String>) -> Result<T, StorageError> + Send + 'static,
    {
        let agent = self.agent.clone();
        let token = self.auth_token.clone();
        tokio::task::spawn_blocking(move || call(agent, token))
            .await
            .map_err(|e| StorageError::Backend(format!("task join error: {}", e)))?
    }
}

fn with_auth<B>(request: ureq::RequestBuilder<B>, token: Option<&str>) -> ureq::RequestBuilder<B> {
    match token {
        Some(token) => request.header("Authorization", &format!("Bearer {}", token)),
        None => request,
    }
}

fn transport(e: ureq::Error) -> StorageError {
    StorageError::Backend(e.to_string())
}

fn read_body(response: HttpResponse) -> String {
    response
        .into_body()
        .read_to_string()
        .unwrap_or_else(|_| String::new())
}

/// Map a response on a keyed endpoint to the store contract.
fn check_keyed(
    response: HttpResponse,
    resource_type: &str,
    resource_id: &str,
) -> Result<HttpResponse, StorageError> {
    let status = response.status().as_u16();
    match status {
        200..=299 => Ok(response),
        404 => Err(StorageError::not_found(resource_type, resource_id)),
        400..=499 => Err(StorageError::Rejected {
            resource_type: resource_type.to_string(),
            resource_id: resource_id.to_string(),
            message: format!("HTTP {}: {}", status, read_body(response)),
        }),
        _ => Err(StorageError::Backend(format!(
            "HTTP {} for {}/{}: {}",
            status,
            resource_type,
            resource_id,
            read_body(response)
        ))),
    }
}

/// Map a response on a store-wide endpoint. A 404/405/501 means the remote
/// side does not expose the operation at all.
fn check_store_wide(response: HttpResponse, operation: &str) -> Result<HttpResponse, StorageError> {
    let status = response.status().as_u16();
    match status {
        200..=299 => Ok(response),
        404 | 405 | 501 => Err(StorageError::Unsupported(format!(
            "{} (HTTP {})",
            operation, status
        ))),
        _ => Err(StorageError::Backend(format!(
            "{} failed with HTTP {}: {}",
            operation,
            status,
            read_body(response)
        ))),
    }
}

fn parse_json<T: serde::de::DeserializeOwned>(response: HttpResponse) -> Result<T, StorageError> {
    response
        .into_body()
        .read_json()
        .map_err(|e| StorageError::Backend(format!("failed to parse response as JSON: {}", e)))
}

/// Percent-encode a path segment. Unreserved characters pass through.
fn encode_segment(segment: &str) -> String {
    let mut out = String::with_capacity(segment.len());
    for byte in segment.bytes() {
        match byte {
            b'A'..=b'Z' | b'a'..=b'z' | b'0'..=b'9' | b'-' | b'_' | b'.' | b'~' => {
                out.push(byte as char)
            }
            _ => out.push_str(&format!("%{:02X}", byte)),
        }
    }
    out
}

#[async_trait]
impl ResourceStore for HttpStore {
    async fn get(&self, resource_type: &str, resource_id: &str) -> Result<Resource, StorageError> {
        let url = self.resource_url(resource_type, resource_id);
        let (rt, rid) = (resource_type.to_string(), resource_id.to_string());
        self.blocking(move |agent, token| {
            let response = with_auth(agent.get(&url), token.as_deref())
                .call()
                .map_err(transport)?;
            parse_json(check_keyed(response, &rt, &rid)?)
        })
        .await
    }

    async fn put(
        &self,
        resource_type: &str,
        resource_id: &str,
        resource: Resource,
    ) -> Result<Resource, StorageError> {
        let url = self.resource_url(resource_type, resource_id);
        let (rt, rid) = (resource_type.to_string(), resource_id.to_string());
        self.blocking(move |agent, token| {
            let response = with_auth(agent.put(&url), token.as_deref())
                .send_json(&resource)
                .map_err(transport)?;
            parse_json(check_keyed(response, &rt, &rid)?)
        })
        .await
    }

    async fn delete(&self, resource_type: &str, resource_id: &str) -> Result<(), StorageError> {
        let url = self.resource_url(resource_type, resource_id);
        let (rt, rid) = (resource_type.to_string(), resource_id.to_string());
        self.blocking(move |agent, token| {
            let response = with_auth(agent.delete(&url), token.as_deref())
                .call()
                .map_err(transport)?;
            check_keyed(response, &rt, &rid).map(|_| ())
        })
        .await
    }

    async fn list(&self, resource_type: &str) -> Result<Vec<(String, Resource)>, StorageError> {
        let url = self.collection_url(resource_type);
        self.blocking(move |agent, token| {
            let response = with_auth(agent.get(&url), token.as_deref())
                .call()
                .map_err(transport)?;
            let status = response.status().as_u16();
            if status == 404 {
                // An unknown type is an empty collection.
                return Ok(Vec::new());
            }
            let list: ResourceList = parse_json(check_store_wide(response, "list")?)?;
            let mut entries: Vec<(String, Resource)> = list.into();
            entries.sort_by(|a, b| a.0.cmp(&b.0));
            Ok(entries)
        })
        .await
    }

    async fn export(&self) -> Result<ResourceSet, StorageError> {
        let url = format!("{}/resources", self.base_url);
        self.blocking(move |agent, token| {
            let response = with_auth(agent.get(&url), token.as_deref())
                .call()
                .map_err(transport)?;
            parse_json(check_store_wide(response, "export")?)
        })
        .await
    }
}

#[async_trait]
impl SandboxStore for HttpStore {
    async fn seed(&self, resources: ResourceSet) -> Result<(), StorageError> {
        let url = format!("{}/seed", self.base_url);
        self.blocking(move |agent, token| {
            let response = with_auth(agent.post(&url), token.as_deref())
                .send_json(&resources)
                .map_err(transport)?;
            check_store_wide(response, "seed").map(|_| ())
        })
        .await
    }

    async fn reset(&self) -> Result<(), StorageError> {
        let url = format!("{}/reset", self.base_url);
        self.blocking(move |agent, token| {
            let response = with_auth(agent.post(&url), token.as_deref())
                .send_empty()
                .map_err(transport)?;
            check_store_wide(response, "reset").map(|_| ())
        })
        .await
    }
}

// ──────────────────────────────────────────────
// Tests
// ──────────────────────────────────────────────
