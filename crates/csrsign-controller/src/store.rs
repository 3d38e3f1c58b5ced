use crate::mutation::CsrPatch;
use async_trait::async_trait;
use csrsign_core::csr::csr_gvk;
use csrsign_core::{CertificateSigningRequest, ResourceKey, ResourceVersion};
use csrsign_storage::{ResourceStore, StorageError};

/// What the reconciler needs from the resource store
#[async_trait]
pub trait CsrStore: Send + Sync {
    /// Latest snapshot, or `None` if the CSR no longer exists
    async fn get(
        &self,
        key: &ResourceKey,
    ) -> Result<Option<CertificateSigningRequest>, StorageError>;

    /// Apply `patch` only if the stored resourceVersion is still `base`.
    ///
    /// A moved version fails with `StorageError::Conflict`.
    async fn patch_status(
        &self,
        key: &ResourceKey,
        base: &ResourceVersion,
        patch: &CsrPatch,
    ) -> Result<CertificateSigningRequest, StorageError>;

    /// Every stored CSR
    async fn list(&self) -> Result<Vec<CertificateSigningRequest>, StorageError>;
}

#[async_trait]
impl CsrStore for ResourceStore {
    async fn get(
        &self,
        key: &ResourceKey,
    ) -> Result<Option<CertificateSigningRequest>, StorageError> {
        ResourceStore::get::<CertificateSigningRequest>(self, key)
    }

    async fn patch_status(
        &self,
        key: &ResourceKey,
        base: &ResourceVersion,
        patch: &CsrPatch,
    ) -> Result<CertificateSigningRequest, StorageError> {
        let merge_patch = patch.to_merge_patch()?;
        ResourceStore::patch::<CertificateSigningRequest>(self, key, Some(base), &merge_patch)
    }

    async fn list(&self) -> Result<Vec<CertificateSigningRequest>, StorageError> {
        ResourceStore::list::<CertificateSigningRequest>(self, &csr_gvk(), None)
    }
}
