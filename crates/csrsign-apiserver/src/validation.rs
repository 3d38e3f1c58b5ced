use crate::{ApiError, Result};
use csrsign_core::{is_valid_name, Resource};

/// Validate a resource before creation/update
pub fn validate_resource<T: Resource>(resource: &T) -> Result<()> {
    resource
        .validate()
        .map_err(|e| ApiError::ValidationFailed(e.to_string()))
}

/// Validate a resource name (DNS-1123 subdomain)
pub fn validate_name(name: &str) -> Result<()> {
    if !is_valid_name(name) {
        return Err(ApiError::BadRequest(format!(
            "Invalid resource name: {}. Must be a valid DNS-1123 subdomain (lowercase alphanumeric, '-', or '.')",
            name
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use csrsign_core::CertificateSigningRequest;

    #[test]
    fn test_validate_name() {
        assert!(validate_name("web-tls").is_ok());
        assert!(validate_name("node-1.example.com").is_ok());

        assert!(validate_name("WebTls").is_err());
        assert!(validate_name("").is_err());
        assert!(validate_name("-web").is_err());
    }

    #[test]
    fn test_validate_resource() {
        let mut csr = CertificateSigningRequest::default();
        csr.metadata.name = Some("web-tls".to_string());

        // No spec.request
        assert!(matches!(
            validate_resource(&csr),
            Err(ApiError::ValidationFailed(_))
        ));
    }
}
