use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// An opaque structured record held by a resource store.
///
/// Always a JSON object. `serde_json::Map` is backed by a `BTreeMap` (the
/// `preserve_order` feature is not enabled anywhere in the workspace), so
/// field order and the serialized form are deterministic.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Resource(Map<String, Value>);

impl Resource {
    pub fn new() -> Self {
        Resource(Map::new())
    }

    pub fn fields(&self) -> &Map<String, Value> {
        &self.0
    }

    pub fn fields_mut(&mut self) -> &mut Map<String, Value> {
        &mut self.0
    }

    pub fn get(&self, field: &str) -> Option<&Value> {
        self.0.get(field)
    }

    /// Set a top-level field, returning the previous value if any.
    pub fn insert(&mut self, field: impl Into<String>, value: Value) -> Option<Value> {
        self.0.insert(field.into(), value)
    }

    pub fn into_value(self) -> Value {
        Value::Object(self.0)
    }

    /// Build a resource from an arbitrary JSON value. Only objects are resources.
    pub fn from_value(value: Value) -> Option<Self> {
        match value {
            Value::Object(map) => Some(Resource(map)),
            _ => None,
        }
    }
}

impl From<Map<String, Value>> for Resource {
    fn from(map: Map<String, Value>) -> Self {
        Resource(map)
    }
}

/// The full contents of a store: `resource_type -> resource_id -> Resource`.
///
/// Used for `export`, and as the payload of a sandbox `seed`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ResourceSet(BTreeMap<String, BTreeMap<String, Resource>>);

impl ResourceSet {
    pub fn new() -> Self {
        ResourceSet(BTreeMap::new())
    }

    pub fn get(&self, resource_type: &str, resource_id: &str) -> Option<&Resource> {
        self.0.get(resource_type)?.get(resource_id)
    }

    pub fn insert(
        &mut self,
        resource_type: &str,
        resource_id: &str,
        resource: Resource,
    ) -> Option<Resource> {
        self.0
            .entry(resource_type.to_string())
            .or_default()
            .insert(resource_id.to_string(), resource)
    }

    /// Remove a resource. Empty collections are dropped so that an emptied
    /// store compares equal to a fresh one.
    pub fn remove(&mut self, resource_type: &str, resource_id: &str) -> Option<Resource> {
        let collection = self.0.get_mut(resource_type)?;
        let removed = collection.remove(resource_id);
        if collection.is_empty() {
            self.0.remove(resource_type);
        }
        removed
    }

    /// All resources of one type, ordered by id.
    pub fn collection(&self, resource_type: &str) -> Vec<(String, Resource)> {
        self.0
            .get(resource_type)
            .map(|c| c.iter().map(|(id, r)| (id.clone(), r.clone())).collect())
            .unwrap_or_default()
    }

    /// Iterate `(resource_type, resource_id, resource)` in key order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &str, &Resource)> {
        self.0.iter().flat_map(|(t, c)| {
            c.iter()
                .map(move |(id, r)| (t.as_str(), id.as_str(), r))
        })
    }

    pub fn len(&self) -> usize {
        self.0.values().map(|c| c.len()).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn doc(title: &str) -> Resource {
        Resource::from_value(json!({ "title": title })).unwrap()
    }

    #[test]
    fn resource_rejects_non_objects() {
        assert!(Resource::from_value(json!([1, 2])).is_none());
        assert!(Resource::from_value(json!("x")).is_none());
        assert!(Resource::from_value(json!({})).is_some());
    }

    #[test]
    fn resource_serializes_transparently() {
        let r = doc("A");
        assert_eq!(serde_json::to_value(&r).unwrap(), json!({"title": "A"}));
    }

    #[test]
    fn resource_set_remove_drops_empty_collections() {
        let mut set = ResourceSet::new();
        set.insert("document", "doc-1", doc("A"));
        assert_eq!(set.len(), 1);
        assert_eq!(set.remove("document", "doc-1"), Some(doc("A")));
        assert_eq!(set, ResourceSet::new());
        assert!(set.is_empty());
    }

    #[test]
    fn resource_set_iterates_in_key_order() {
        let mut set = ResourceSet::new();
        set.insert("form", "f-1", doc("F"));
        set.insert("document", "doc-2", doc("B"));
        set.insert("document", "doc-1", doc("A"));
        let keys: Vec<(String, String)> = set
            .iter()
            .map(|(t, id, _)| (t.to_string(), id.to_string()))
            .collect();
        assert_eq!(
            keys,
            vec![
                ("document".to_string(), "doc-1".to_string()),
                ("document".to_string(), "doc-2".to_string()),
                ("form".to_string(), "f-1".to_string()),
            ]
        );
    }
}
