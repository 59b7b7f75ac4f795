//! String-typed transaction filters, as they arrive in query strings and
//! command-line flags.

use rewind_engine::TransactionFilter;
use serde::Deserialize;

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct TransactionQuery {
    pub resource_type: Option<String>,
    pub resource_id: Option<String>,
    pub backend: Option<String>,
    pub status: Option<String>,
    pub session_id: Option<String>,
    pub actor: Option<String>,
    pub operation: Option<String>,
    pub limit: Option<usize>,
    /// `asc` (default) or `desc`.
    pub order: Option<String>,
}

impl TransactionQuery {
    pub fn into_filter(self) -> Result<TransactionFilter, String> {
        let newest_first = match self.order.as_deref() {
            None | Some("asc") => false,
            Some("desc") => true,
            Some(other) => return Err(format!("invalid order '{}': expected asc or desc", other)),
        };
        Ok(TransactionFilter {
            resource_type: self.resource_type,
            resource_id: self.resource_id,
            backend: self.backend.as_deref().map(str::parse).transpose()?,
            status: self.status.as_deref().map(str::parse).transpose()?,
            session_id: self
                .session_id
                .as_deref()
                .map(|s| s.parse().map_err(|e| format!("invalid session_id '{}': {}", s, e)))
                .transpose()?,
            actor: self.actor,
            operation: self.operation.as_deref().map(str::parse).transpose()?,
            limit: self.limit.unwrap_or(0),
            newest_first,
        })
    }
}
