use csrsign_core::csr;
use csrsign_core::CertificateSigningRequest;

/// The pickup id of a request that was submitted and not yet collected.
///
/// Derived from the snapshot alone on every pass; nothing is cached between passes.
pub fn pending_pickup(csr: &CertificateSigningRequest) -> Option<&str> {
    csr::pickup_id(csr)
}

/// True if the CSR carries a non-empty pickup-id annotation
pub fn has_pending_pickup(csr: &CertificateSigningRequest) -> bool {
    pending_pickup(csr).is_some()
}
