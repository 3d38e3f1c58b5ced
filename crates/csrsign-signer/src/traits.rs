use crate::error::Result;
use async_trait::async_trait;
use csrsign_core::CertificateSigningRequest;

/// What the CA is asked to sign
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SigningRequest {
    /// Name of the originating CSR
    pub name: String,
    /// Raw certificate request bytes (spec.request)
    pub request: Vec<u8>,
    /// Requested key usages
    pub usages: Vec<String>,
    /// Requested validity, if the requester asked for one
    pub expiration_seconds: Option<i32>,
}

impl SigningRequest {
    pub fn from_csr(csr: &CertificateSigningRequest) -> Self {
        Self {
            name: csr.metadata.name.clone().unwrap_or_default(),
            request: csr.spec.request.0.clone(),
            usages: csr.spec.usages.clone().unwrap_or_default(),
            expiration_seconds: csr.spec.expiration_seconds,
        }
    }
}

/// Client for an asynchronous certificate authority
///
/// Implementations must be safe to call from several reconcile workers at once.
#[async_trait]
pub trait Signer: Send + Sync {
    /// Submit a request for signing, returning the CA's pickup id
    async fn submit(&self, request: &SigningRequest) -> Result<String>;

    /// Collect the certificate for a pickup id.
    ///
    /// Returns `SignerError::IssuancePending` while the CA is still working.
    async fn poll(&self, pickup_id: &str) -> Result<Vec<u8>>;
}
