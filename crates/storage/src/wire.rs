//! JSON bodies of the resource wire protocol.
//!
//! Single resources travel as the bare resource object and whole stores as a
//! [`ResourceSet`](crate::ResourceSet); only collection listings need an
//! envelope.

use serde::{Deserialize, Serialize};

use crate::record::Resource;

/// One entry of a `GET /resources/{type}` listing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ListedResource {
    pub id: String,
    pub resource: Resource,
}

/// Body of `GET /resources/{type}`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceList {
    pub resources: Vec<ListedResource>,
}

impl From<Vec<(String, Resource)>> for ResourceList {
    fn from(entries: Vec<(String, Resource)>) -> Self {
        ResourceList {
            resources: entries
                .into_iter()
                .map(|(id, resource)| ListedResource { id, resource })
                .collect(),
        }
    }
}

impl From<ResourceList> for Vec<(String, Resource)> {
    fn from(list: ResourceList) -> Self {
        list.resources
            .into_iter()
            .map(|entry| (entry.id, entry.resource))
            .collect()
    }
}
