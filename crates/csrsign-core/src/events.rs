use crate::types::{GroupVersionKind, ResourceKey};
use serde::{Deserialize, Serialize};

/// Watch event type
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum WatchEventType {
    Added,
    Modified,
    Deleted,
    Error,
}

/// A resource event emitted by the store on every committed write
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResourceEvent {
    /// Type of watch event (ADDED, MODIFIED, DELETED)
    pub event_type: WatchEventType,
    /// GroupVersionKind of the resource
    pub gvk: GroupVersionKind,
    /// Full resource key (gvk + namespace + name)
    pub resource_key: ResourceKey,
    /// The serialized resource object
    pub object: serde_json::Value,
    /// Resource version at the time of the event
    pub resource_version: String,
}

impl ResourceEvent {
    fn with_type(
        event_type: WatchEventType,
        resource_key: ResourceKey,
        object: serde_json::Value,
        resource_version: String,
    ) -> Self {
        Self {
            event_type,
            gvk: resource_key.gvk.clone(),
            resource_key,
            object,
            resource_version,
        }
    }

    /// Create an ADDED event
    pub fn added(
        resource_key: ResourceKey,
        object: serde_json::Value,
        resource_version: String,
    ) -> Self {
        Self::with_type(WatchEventType::Added, resource_key, object, resource_version)
    }

    /// Create a MODIFIED event
    pub fn modified(
        resource_key: ResourceKey,
        object: serde_json::Value,
        resource_version: String,
    ) -> Self {
        Self::with_type(
            WatchEventType::Modified,
            resource_key,
            object,
            resource_version,
        )
    }

    /// Create a DELETED event
    pub fn deleted(
        resource_key: ResourceKey,
        object: serde_json::Value,
        resource_version: String,
    ) -> Self {
        Self::with_type(
            WatchEventType::Deleted,
            resource_key,
            object,
            resource_version,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_type_wire_format() {
        let json = serde_json::to_string(&WatchEventType::Modified).unwrap();
        assert_eq!(json, "\"MODIFIED\"");
    }

    #[test]
    fn test_event_carries_gvk_of_key() {
        let gvk = GroupVersionKind::from_api_version_kind(
            "certificates.k8s.io/v1",
            "CertificateSigningRequest",
        );
        let key = ResourceKey::cluster_scoped(gvk.clone(), "web-tls");
        let event = ResourceEvent::deleted(key, serde_json::json!({}), "7".to_string());

        assert_eq!(event.event_type, WatchEventType::Deleted);
        assert_eq!(event.gvk, gvk);
        assert_eq!(event.resource_version, "7");
    }
}
