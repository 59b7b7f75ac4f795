//! `rewind.toml` loading.
//!
//! Every section has defaults, so running without a config file gives an
//! in-memory production store, an in-memory sandbox and an in-memory log.

use std::collections::BTreeSet;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use rewind_engine::{RouterConfig, SessionConfig};
use rewind_storage::{
    HttpStore, MemoryStore, Resource, ResourceSet, ResourceStore, SandboxStore, StorageError,
};
use serde::{Deserialize, Serialize};

/// Port override.
pub const PORT_ENV: &str = "REWIND_PORT";

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read {path}: {reason}")]
    Read { path: PathBuf, reason: String },
    #[error("failed to parse {path}: {reason}")]
    Parse { path: PathBuf, reason: String },
    #[error("invalid configuration: {0}")]
    Invalid(String),
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Config {
    pub server: ServerConfig,
    pub production: StoreConfig,
    pub sandbox: StoreConfig,
    pub log: LogConfig,
    pub evaluation: EvaluationConfig,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ServerConfig {
    pub port: u16,
    /// Requests per minute per client IP.
    pub rate_limit: u64,
    /// Name of the env var holding the API key. Auth is off when it is unset.
    pub api_key_env: String,
    pub max_body_bytes: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        ServerConfig {
            port: 8080,
            rate_limit: 60,
            api_key_env: "REWIND_API_KEY".to_string(),
            max_body_bytes: 10 * 1024 * 1024,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StoreKind {
    #[default]
    Memory,
    Http,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct StoreConfig {
    pub kind: StoreKind,
    pub base_url: Option<String>,
    pub auth_token_env: Option<String>,
    pub timeout_secs: u64,
}

impl Default for StoreConfig {
    fn default() -> Self {
        StoreConfig {
            kind: StoreKind::Memory,
            base_url: None,
            auth_token_env: None,
            timeout_secs: rewind_storage::DEFAULT_TIMEOUT.as_secs(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct LogConfig {
    /// JSON-lines journal. In-memory when absent.
    pub path: Option<PathBuf>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct EvaluationConfig {
    pub passthrough_read_types: BTreeSet<String>,
    pub verify_production_isolation: bool,
}

impl EvaluationConfig {
    pub fn router(&self) -> RouterConfig {
        RouterConfig {
            passthrough_read_types: self.passthrough_read_types.clone(),
        }
    }

    pub fn sessions(&self) -> SessionConfig {
        SessionConfig {
            verify_production_isolation: self.verify_production_isolation,
        }
    }
}

impl Config {
    /// Load from `path`, or defaults when `path` is `None`, then apply
    /// environment overrides and validate.
    pub fn load(path: Option<&Path>) -> Result<Config, ConfigError> {
        let mut config = match path {
            Some(path) => Config::from_file(path)?,
            None => Config::default(),
        };
        config.apply_env(|key| std::env::var(key).ok())?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_file(path: &Path) -> Result<Config, ConfigError> {
        let text = std::fs::read_to_string(path).map_err(|e| ConfigError::Read {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;
        toml::from_str(&text).map_err(|e| ConfigError::Parse {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })
    }

    pub fn apply_env<F>(&mut self, lookup: F) -> Result<(), ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(port) = lookup(PORT_ENV) {
            self.server.port = port
                .parse()
                .map_err(|_| ConfigError::Invalid(format!("{} is not a port: {}", PORT_ENV, port)))?;
        }
        Ok(())
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        for (name, store) in [("production", &self.production), ("sandbox", &self.sandbox)] {
            if store.kind == StoreKind::Http && store.base_url.is_none() {
                return Err(ConfigError::Invalid(format!(
                    "[{}] kind = \"http\" requires base_url",
                    name
                )));
            }
            if store.timeout_secs == 0 {
                return Err(ConfigError::Invalid(format!(
                    "[{}] timeout_secs must be positive",
                    name
                )));
            }
        }
        if self.server.rate_limit == 0 {
            return Err(ConfigError::Invalid(
                "[server] rate_limit must be positive".to_string(),
            ));
        }
        Ok(())
    }

    /// The API key, read from the configured env var.
    pub fn api_key(&self) -> Option<String> {
        std::env::var(&self.server.api_key_env)
            .ok()
            .filter(|k| !k.is_empty())
    }
}

impl StoreConfig {
    pub fn build(&self) -> Arc<ConfiguredStore> {
        match (self.kind, &self.base_url) {
            (StoreKind::Http, Some(base_url)) => {
                let token = self
                    .auth_token_env
                    .as_deref()
                    .and_then(|name| std::env::var(name).ok());
                Arc::new(ConfiguredStore::Http(HttpStore::new(
                    base_url,
                    token,
                    Duration::from_secs(self.timeout_secs),
                )))
            }
            _ => Arc::new(ConfiguredStore::Memory(MemoryStore::new())),
        }
    }
}

/// A store chosen at runtime by `kind`.
pub enum ConfiguredStore {
    Memory(MemoryStore),
    Http(HttpStore),
}

impl fmt::Debug for ConfiguredStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfiguredStore::Memory(_) => f.write_str("ConfiguredStore::Memory"),
            ConfiguredStore::Http(store) => f.debug_tuple("ConfiguredStore::Http").field(store).finish(),
        }
    }
}

#[async_trait]
impl ResourceStore for ConfiguredStore {
    async fn get(&self, resource_type: &str, resource_id: &str) -> Result<Resource, StorageError> {
        match self {
            ConfiguredStore::Memory(s) => s.get(resource_type, resource_id).await,
            ConfiguredStore::Http(s) => s.get(resource_type, resource_id).await,
        }
    }

    async fn put(
        &self,
        resource_type: &str,
        resource_id: &str,
        resource: Resource,
    ) -> Result<Resource, StorageError> {
        match self {
            ConfiguredStore::Memory(s) => s.put(resource_type, resource_id, resource).await,
            ConfiguredStore::Http(s) => s.put(resource_type, resource_id, resource).await,
        }
    }

    async fn delete(&self, resource_type: &str, resource_id: &str) -> Result<(), StorageError> {
        match self {
            ConfiguredStore::Memory(s) => s.delete(resource_type, resource_id).await,
            ConfiguredStore::Http(s) => s.delete(resource_type, resource_id).await,
        }
    }

    async fn list(&self, resource_type: &str) -> Result<Vec<(String, Resource)>, StorageError> {
        match self {
            ConfiguredStore::Memory(s) => s.list(resource_type).await,
            ConfiguredStore::Http(s) => s.list(resource_type).await,
        }
    }

    async fn export(&self) -> Result<ResourceSet, StorageError> {
        match self {
            ConfiguredStore::Memory(s) => s.export().await,
            ConfiguredStore::Http(s) => s.export().await,
        }
    }
}

#[async_trait]
impl SandboxStore for ConfiguredStore {
    async fn seed(&self, resources: ResourceSet) -> Result<(), StorageError> {
        match self {
            ConfiguredStore::Memory(s) => s.seed(resources).await,
            ConfiguredStore::Http(s) => s.seed(resources).await,
        }
    }

    async fn reset(&self) -> Result<(), StorageError> {
        match self {
            ConfiguredStore::Memory(s) => s.reset().await,
            ConfiguredStore::Http(s) => s.reset().await,
        }
    }
}
