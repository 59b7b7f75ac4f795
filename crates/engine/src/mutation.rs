//! The handle a mutation closure uses to touch its one resource, plus the
//! write helpers agent tools are built from.

use std::sync::Arc;

use rewind_storage::{Resource, ResourceStore, StorageError};
use serde_json::{Map, Value};

/// Access to exactly one resource on exactly one backend.
///
/// Handed to the closure passed to `execute_with_rollback`. It cannot name
/// any other key, so a mutation can never escape the resource that is being
/// locked, captured and recorded.
pub struct MutationScope {
    store: Arc<dyn ResourceStore>,
    resource_type: String,
    resource_id: String,
}

impl std::fmt::Debug for MutationScope {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MutationScope")
            .field("resource_type", &self.resource_type)
            .field("resource_id", &self.resource_id)
            .finish()
    }
}

impl MutationScope {
    pub(crate) fn new(store: Arc<dyn ResourceStore>, resource_type: &str, resource_id: &str) -> Self {
        MutationScope {
            store,
            resource_type: resource_type.to_string(),
            resource_id: resource_id.to_string(),
        }
    }

    pub fn resource_type(&self) -> &str {
        &self.resource_type
    }

    pub fn resource_id(&self) -> &str {
        &self.resource_id
    }

    pub async fn get(&self) -> Result<Resource, StorageError> {
        self.store.get(&self.resource_type, &self.resource_id).await
    }

    /// Full replace.
    pub async fn put(&self, resource: Resource) -> Result<Resource, StorageError> {
        self.store
            .put(&self.resource_type, &self.resource_id, resource)
            .await
    }

    pub async fn delete(&self) -> Result<(), StorageError> {
        self.store
            .delete(&self.resource_type, &self.resource_id)
            .await
    }

    /// Current record, or an empty one if absent.
    async fn current_or_empty(&self) -> Result<Resource, StorageError> {
        match self.get().await {
            Ok(r) => Ok(r),
            Err(e) if e.is_not_found() => Ok(Resource::new()),
            Err(e) => Err(e),
        }
    }

    /// Shallow JSON merge patch: top-level keys in `patch` overwrite,
    /// `null` removes. Creates the record if it does not exist.
    pub async fn merge(&self, patch: Map<String, Value>) -> Result<Resource, StorageError> {
        let mut current = self.current_or_empty().await?;
        merge_patch(&mut current, patch);
        self.put(current).await
    }

    /// Set one nested field, creating intermediate objects as needed.
    pub async fn set_path(&self, path: &[&str], value: Value) -> Result<Resource, StorageError> {
        let mut current = self.current_or_empty().await?;
        set_path(&mut current, path, value).map_err(|message| StorageError::Rejected {
            resource_type: self.resource_type.clone(),
            resource_id: self.resource_id.clone(),
            message,
        })?;
        self.put(current).await
    }
}

/// Apply a shallow merge patch in place.
pub fn merge_patch(target: &mut Resource, patch: Map<String, Value>) {
    let fields = target.fields_mut();
    for (key, value) in patch {
        if value.is_null() {
            fields.remove(&key);
        } else {
            fields.insert(key, value);
        }
    }
}

/// Set `path` (e.g. `["answers", "q1"]`) to `value` in place.
///
/// Fails if the path is empty or runs through a non-object value.
pub fn set_path(target: &mut Resource, path: &[&str], value: Value) -> Result<(), String> {
    let (last, parents) = path
        .split_last()
        .ok_or_else(|| "field path must not be empty".to_string())?;
    let mut cursor = target.fields_mut();
    for (depth, segment) in parents.iter().enumerate() {
        let slot = cursor
            .entry(segment.to_string())
            .or_insert_with(|| Value::Object(Map::new()));
        cursor = match slot {
            Value::Object(map) => map,
            other => {
                return Err(format!(
                    "cannot set '{}': '{}' is {} not an object",
                    path.join("."),
                    parents[..=depth].join("."),
                    type_name(other)
                ))
            }
        };
    }
    cursor.insert(last.to_string(), value);
    Ok(())
}

fn type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}
