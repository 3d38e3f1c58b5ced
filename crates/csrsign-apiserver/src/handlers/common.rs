use crate::{ApiError, AppState, Result};
use csrsign_core::{Resource, ResourceKey};
use serde::Serialize;
use tracing::debug;

/// Get a resource, mapping a missing key to 404
pub fn get_resource<T: Resource>(state: &AppState, key: &ResourceKey) -> Result<T> {
    debug!(resource = %key, "Getting resource");

    state
        .store
        .get(key)?
        .ok_or_else(|| ApiError::NotFound(format!("Resource not found: {}", key)))
}

/// List response wrapper
#[derive(Serialize)]
pub struct ListResponse<T: Serialize> {
    #[serde(rename = "apiVersion")]
    pub api_version: String,
    pub kind: String,
    pub items: Vec<T>,
    pub metadata: ListMetadata,
}

/// List metadata
#[derive(Serialize)]
pub struct ListMetadata {
    #[serde(rename = "resourceVersion")]
    pub resource_version: String,
}

impl<T: Resource> ListResponse<T> {
    /// Build a list; its resourceVersion is the newest among the items
    pub fn new(api_version: impl Into<String>, kind: impl Into<String>, items: Vec<T>) -> Self {
        let newest = items
            .iter()
            .filter_map(|item| item.resource_version())
            .filter_map(|v| v.as_str().parse::<u64>().ok())
            .max()
            .unwrap_or(0);

        Self {
            api_version: api_version.into(),
            kind: kind.into(),
            items,
            metadata: ListMetadata {
                resource_version: newest.to_string(),
            },
        }
    }
}
