use crate::{KVStore, KeyEncoder, Result, StorageError, Transaction};
use chrono::Utc;
use csrsign_core::k8s_openapi::apimachinery::pkg::apis::meta::v1::Time;
use csrsign_core::{GroupVersionKind, Resource, ResourceEvent, ResourceKey, ResourceVersion};
use serde_json::Value;
use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::{debug, warn};
use uuid::Uuid;

/// Metadata key of the store-wide revision counter
const REVISION_KEY: &[u8] = b"revision";

/// Store configuration
#[derive(Debug, Clone)]
pub struct StoreConfig {
    /// Capacity of the broadcast channel carrying resource events
    pub event_capacity: usize,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            event_capacity: 4096,
        }
    }
}

/// Versioned resource store.
///
/// Every write bumps a store-wide revision counter inside the same redb write
/// transaction and stamps the new value into `metadata.resourceVersion`. Committed
/// writes are announced on a broadcast channel.
#[derive(Clone)]
pub struct ResourceStore {
    backend: Arc<dyn KVStore>,
    event_tx: broadcast::Sender<ResourceEvent>,
}

impl ResourceStore {
    /// Create a store over the given backend with default settings
    pub fn new(backend: Arc<dyn KVStore>) -> Self {
        Self::with_config(backend, StoreConfig::default())
    }

    pub fn with_config(backend: Arc<dyn KVStore>, config: StoreConfig) -> Self {
        let (event_tx, _) = broadcast::channel(config.event_capacity);
        Self { backend, event_tx }
    }

    /// Subscribe to resource events committed after this call
    pub fn subscribe(&self) -> broadcast::Receiver<ResourceEvent> {
        self.event_tx.subscribe()
    }

    /// Get a resource; a missing key is `Ok(None)`
    pub fn get<T: Resource>(&self, key: &ResourceKey) -> Result<Option<T>> {
        let storage_key = KeyEncoder::encode_resource_key(key);
        match self.backend.get(storage_key.as_bytes())? {
            Some(data) => Ok(Some(serde_json::from_slice(&data)?)),
            None => Ok(None),
        }
    }

    /// List all resources of a kind, optionally restricted to a namespace
    pub fn list<T: Resource>(
        &self,
        gvk: &GroupVersionKind,
        namespace: Option<&str>,
    ) -> Result<Vec<T>> {
        let prefix = KeyEncoder::encode_prefix(gvk, namespace);
        let entries = self.backend.scan(prefix.as_bytes())?;

        let mut resources = Vec::with_capacity(entries.len());
        for (_key, data) in entries {
            resources.push(serde_json::from_slice(&data)?);
        }

        Ok(resources)
    }

    /// Create a new resource, assigning uid, creationTimestamp and resourceVersion
    pub fn create<T: Resource>(&self, mut resource: T) -> Result<T> {
        let key = resource_key_of(&resource)?;
        let storage_key = KeyEncoder::encode_resource_key(&key);

        let mut txn = self.backend.transaction()?;
        if txn.get(storage_key.as_bytes())?.is_some() {
            return Err(StorageError::already_exists(key.to_string()));
        }

        resource.set_uid(Uuid::new_v4().to_string());
        resource.metadata_mut().creation_timestamp = Some(Time(Utc::now()));
        let version = next_revision(txn.as_mut())?;
        resource.set_resource_version(version.clone());

        let data = serde_json::to_vec(&resource)?;
        txn.put(storage_key.as_bytes(), &data)?;
        txn.commit()?;

        debug!(resource = %key, resource_version = %version, "Created resource");
        self.publish(ResourceEvent::added(
            key,
            serde_json::to_value(&resource)?,
            version.0,
        ));

        Ok(resource)
    }

    /// Replace a stored resource.
    ///
    /// If the incoming object carries a resourceVersion it must match the stored one.
    /// Identity fields (uid, creationTimestamp) are carried over from the stored object.
    pub fn update<T: Resource>(&self, mut resource: T) -> Result<T> {
        let key = resource_key_of(&resource)?;
        let storage_key = KeyEncoder::encode_resource_key(&key);

        let mut txn = self.backend.transaction()?;
        let current: T = match txn.get(storage_key.as_bytes())? {
            Some(data) => serde_json::from_slice(&data)?,
            None => return Err(StorageError::key_not_found(key.to_string())),
        };

        if let Some(expected) = resource.resource_version() {
            check_precondition(&key, &expected, &current)?;
        }

        keep_identity(&current, &mut resource);
        let version = next_revision(txn.as_mut())?;
        resource.set_resource_version(version.clone());

        let data = serde_json::to_vec(&resource)?;
        txn.put(storage_key.as_bytes(), &data)?;
        txn.commit()?;

        debug!(resource = %key, resource_version = %version, "Updated resource");
        self.publish(ResourceEvent::modified(
            key,
            serde_json::to_value(&resource)?,
            version.0,
        ));

        Ok(resource)
    }

    /// Apply a JSON merge patch (RFC 7386) to a stored resource.
    ///
    /// With a precondition, the patch is only applied if the stored resourceVersion
    /// equals it; otherwise `Conflict` is returned and nothing is written.
    pub fn patch<T: Resource>(
        &self,
        key: &ResourceKey,
        precondition: Option<&ResourceVersion>,
        merge_patch: &Value,
    ) -> Result<T> {
        let storage_key = KeyEncoder::encode_resource_key(key);

        let mut txn = self.backend.transaction()?;
        let stored = txn
            .get(storage_key.as_bytes())?
            .ok_or_else(|| StorageError::key_not_found(key.to_string()))?;
        let current: T = serde_json::from_slice(&stored)?;

        if let Some(expected) = precondition {
            check_precondition(key, expected, &current)?;
        }

        let mut object = serde_json::to_value(&current)?;
        json_patch::merge(&mut object, merge_patch);
        let mut resource: T = serde_json::from_value(object)?;

        keep_identity(&current, &mut resource);
        let version = next_revision(txn.as_mut())?;
        resource.set_resource_version(version.clone());

        let data = serde_json::to_vec(&resource)?;
        txn.put(storage_key.as_bytes(), &data)?;
        txn.commit()?;

        debug!(resource = %key, resource_version = %version, "Patched resource");
        self.publish(ResourceEvent::modified(
            key.clone(),
            serde_json::to_value(&resource)?,
            version.0,
        ));

        Ok(resource)
    }

    /// Delete a resource, returning the last stored state
    pub fn delete<T: Resource>(&self, key: &ResourceKey) -> Result<T> {
        let storage_key = KeyEncoder::encode_resource_key(key);

        let mut txn = self.backend.transaction()?;
        let mut resource: T = match txn.get(storage_key.as_bytes())? {
            Some(data) => serde_json::from_slice(&data)?,
            None => return Err(StorageError::key_not_found(key.to_string())),
        };

        txn.delete(storage_key.as_bytes())?;
        let version = next_revision(txn.as_mut())?;
        txn.commit()?;

        resource.set_resource_version(version.clone());
        debug!(resource = %key, resource_version = %version, "Deleted resource");
        self.publish(ResourceEvent::deleted(
            key.clone(),
            serde_json::to_value(&resource)?,
            version.0,
        ));

        Ok(resource)
    }

    fn publish(&self, event: ResourceEvent) {
        // No receivers is fine: nobody is watching yet
        if self.event_tx.send(event).is_err() {
            debug!("No subscribers for resource event");
        }
    }
}

fn resource_key_of<T: Resource>(resource: &T) -> Result<ResourceKey> {
    resource
        .resource_key()
        .map_err(|e| StorageError::invalid_resource(e.to_string()))
}

fn check_precondition<T: Resource>(
    key: &ResourceKey,
    expected: &ResourceVersion,
    current: &T,
) -> Result<()> {
    let actual = current.resource_version().unwrap_or_else(|| ResourceVersion::new(""));
    if &actual != expected {
        warn!(
            resource = %key,
            expected = %expected,
            actual = %actual,
            "resourceVersion precondition failed"
        );
        return Err(StorageError::conflict(
            key.to_string(),
            expected.as_str(),
            actual.as_str(),
        ));
    }
    Ok(())
}

fn keep_identity<T: Resource>(current: &T, resource: &mut T) {
    let stored = current.metadata();
    let metadata = resource.metadata_mut();
    metadata.name = stored.name.clone();
    metadata.namespace = stored.namespace.clone();
    metadata.uid = stored.uid.clone();
    metadata.creation_timestamp = stored.creation_timestamp.clone();
}

/// Bump the revision counter inside the given transaction
fn next_revision(txn: &mut dyn Transaction) -> Result<ResourceVersion> {
    let current = match txn.get_meta(REVISION_KEY)? {
        Some(data) => std::str::from_utf8(&data)
            .ok()
            .and_then(|s| s.parse::<u64>().ok())
            .ok_or_else(|| StorageError::database_error("Corrupt revision counter", None))?,
        None => 0,
    };

    let next = current + 1;
    txn.put_meta(REVISION_KEY, next.to_string().as_bytes())?;
    Ok(ResourceVersion::from_revision(next))
}
