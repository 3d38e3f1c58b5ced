use crate::{GroupVersionKind, ResourceKey, ResourceVersion};
use k8s_openapi::api::certificates::v1::CertificateSigningRequest;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use serde::{Deserialize, Serialize};

/// Base validation for all resources
pub fn validate_base(metadata: &ObjectMeta) -> Result<(), ResourceError> {
    let name = metadata
        .name
        .as_ref()
        .ok_or_else(|| ResourceError::MissingField("metadata.name".to_string()))?;

    if !is_valid_name(name) {
        return Err(ResourceError::InvalidName(name.clone()));
    }

    Ok(())
}

/// Trait for API resources held by the store
pub trait Resource: Serialize + for<'de> Deserialize<'de> + Send + Sync {
    /// Get the API version of this resource
    fn api_version(&self) -> String;

    /// Get the kind of this resource
    fn kind(&self) -> String;

    /// Get the metadata of this resource
    fn metadata(&self) -> &ObjectMeta;

    /// Get mutable metadata
    fn metadata_mut(&mut self) -> &mut ObjectMeta;

    /// Get the GroupVersionKind
    fn gvk(&self) -> GroupVersionKind {
        GroupVersionKind::from_api_version_kind(&self.api_version(), &self.kind())
    }

    /// Get the ResourceKey
    fn resource_key(&self) -> Result<ResourceKey, ResourceError> {
        let metadata = self.metadata();
        let name = metadata
            .name
            .as_ref()
            .ok_or_else(|| ResourceError::MissingField("metadata.name".to_string()))?;

        if self.is_namespaced() {
            let namespace = metadata.namespace.clone().unwrap_or_default();
            Ok(ResourceKey::new(self.gvk(), namespace, name))
        } else {
            Ok(ResourceKey::cluster_scoped(self.gvk(), name))
        }
    }

    /// Get the resource version
    fn resource_version(&self) -> Option<ResourceVersion> {
        self.metadata()
            .resource_version
            .as_ref()
            .map(ResourceVersion::new)
    }

    /// Set the resource version
    fn set_resource_version(&mut self, version: ResourceVersion) {
        self.metadata_mut().resource_version = Some(version.0);
    }

    /// Set the UID
    fn set_uid(&mut self, uid: String) {
        self.metadata_mut().uid = Some(uid);
    }

    /// Check if this is a namespaced resource
    fn is_namespaced(&self) -> bool {
        self.metadata().namespace.is_some()
    }

    /// Validate the resource
    fn validate(&self) -> Result<(), ResourceError> {
        validate_base(self.metadata())
    }
}

/// Resource-related errors
#[derive(Debug, thiserror::Error)]
pub enum ResourceError {
    #[error("Missing required field: {0}")]
    MissingField(String),

    #[error("Invalid resource name: {0}")]
    InvalidName(String),

    #[error("Validation failed: {0}")]
    ValidationFailed(String),
}

/// Validate a resource name (DNS-1123 subdomain)
pub fn is_valid_name(name: &str) -> bool {
    if name.is_empty() || name.len() > 253 {
        return false;
    }

    let bytes = name.as_bytes();
    let alnum = |b: u8| b.is_ascii_lowercase() || b.is_ascii_digit();

    if !alnum(bytes[0]) || !alnum(bytes[bytes.len() - 1]) {
        return false;
    }

    bytes.iter().all(|&b| alnum(b) || b == b'-' || b == b'.')
}

impl Resource for CertificateSigningRequest {
    fn api_version(&self) -> String {
        "certificates.k8s.io/v1".to_string()
    }

    fn kind(&self) -> String {
        "CertificateSigningRequest".to_string()
    }

    fn metadata(&self) -> &ObjectMeta {
        &self.metadata
    }

    fn metadata_mut(&mut self) -> &mut ObjectMeta {
        &mut self.metadata
    }

    // CSRs are cluster-scoped regardless of what metadata.namespace says
    fn is_namespaced(&self) -> bool {
        false
    }

    fn validate(&self) -> Result<(), ResourceError> {
        validate_base(&self.metadata)?;

        if self.spec.request.0.is_empty() {
            return Err(ResourceError::MissingField("spec.request".to_string()));
        }

        if let Some(seconds) = self.spec.expiration_seconds {
            // Same floor the Kubernetes API server enforces
            if seconds < 600 {
                return Err(ResourceError::ValidationFailed(format!(
                    "spec.expirationSeconds must be at least 600, got {}",
                    seconds
                )));
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use k8s_openapi::ByteString;

    fn make_csr(name: &str) -> CertificateSigningRequest {
        let mut csr = CertificateSigningRequest::default();
        csr.metadata.name = Some(name.to_string());
        csr.spec.signer_name = "example.com/foo".to_string();
        csr.spec.request = ByteString(b"-----BEGIN CERTIFICATE REQUEST-----".to_vec());
        csr
    }

    #[test]
    fn test_is_valid_name() {
        assert!(is_valid_name("web-tls"));
        assert!(is_valid_name("node-1.example.com"));

        assert!(!is_valid_name(""));
        assert!(!is_valid_name("WebTls")); // uppercase
        assert!(!is_valid_name("-web")); // starts with dash
        assert!(!is_valid_name("web-")); // ends with dash
        assert!(!is_valid_name("web_tls")); // underscore
    }

    #[test]
    fn test_csr_resource_key_is_cluster_scoped() {
        let mut csr = make_csr("web-tls");
        csr.metadata.namespace = Some("default".to_string());

        let key = csr.resource_key().unwrap();
        assert_eq!(key.name, "web-tls");
        assert!(!key.is_namespaced());
        assert_eq!(key.gvk.kind, "CertificateSigningRequest");
    }

    #[test]
    fn test_csr_validation() {
        assert!(make_csr("web-tls").validate().is_ok());

        let mut csr = make_csr("web-tls");
        csr.spec.request = ByteString(Vec::new());
        assert!(matches!(
            csr.validate().unwrap_err(),
            ResourceError::MissingField(_)
        ));

        let mut csr = make_csr("web-tls");
        csr.spec.expiration_seconds = Some(60);
        assert!(matches!(
            csr.validate().unwrap_err(),
            ResourceError::ValidationFailed(_)
        ));

        let csr = make_csr("Web_TLS");
        assert!(matches!(
            csr.validate().unwrap_err(),
            ResourceError::InvalidName(_)
        ));
    }
}
