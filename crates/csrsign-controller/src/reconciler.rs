use crate::error::{ControllerError, Result};
use crate::filter::{CsrFilter, Rejection};
use crate::mutation::{CsrPatch, EngineFields};
use crate::pickup::pending_pickup;
use crate::store::CsrStore;
use csrsign_core::{CertificateSigningRequest, Resource, ResourceKey, ResourceVersion};
use csrsign_signer::{Signer, SignerError, SigningRequest};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Requeue delay used when the CA reports issuance as pending
pub const DEFAULT_RETRY_DELAY: Duration = Duration::from_secs(5);

/// State of a CSR as derived from one snapshot
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CsrState {
    /// The CSR does not exist (any more)
    NotFound,
    /// Not for us, or not in a state we act on
    Ineligible(Rejection),
    /// Eligible and not yet submitted
    AwaitingSubmit,
    /// Submitted; waiting on the CA under this pickup id
    AwaitingPickup(String),
    /// Certificate issued
    Complete,
}

/// What the caller should do next with this key
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Directive {
    Done,
    RequeueAfter(Duration),
}

/// What happened to the stored CSR during a pass
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MutationOutcome {
    /// The pass does not mutate in this state
    None,
    /// A mutation was computed but matched the observed state
    NoOp,
    /// The patch was stored under this resourceVersion
    Applied(ResourceVersion),
    /// The CSR moved on since it was observed; the patch was dropped
    Conflict,
    /// The CSR was deleted before the patch landed; the patch was dropped
    Gone,
}

/// Result of one reconciliation pass
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReconcileOutcome {
    pub state: CsrState,
    pub mutation: MutationOutcome,
    pub directive: Directive,
}

impl ReconcileOutcome {
    fn done(state: CsrState, mutation: MutationOutcome) -> Self {
        Self {
            state,
            mutation,
            directive: Directive::Done,
        }
    }
}

/// Reconciliation engine for a single signer.
///
/// Each pass works from a fresh snapshot, makes at most one CA call and writes at
/// most one precondition-guarded patch. Passes for the same CSR may overlap.
pub struct Reconciler {
    store: Arc<dyn CsrStore>,
    signer: Arc<dyn Signer>,
    filter: CsrFilter,
    retry_delay: Duration,
}

impl Reconciler {
    pub fn new(
        store: Arc<dyn CsrStore>,
        signer: Arc<dyn Signer>,
        signer_name: impl Into<String>,
        retry_delay: Duration,
    ) -> Self {
        Self {
            store,
            signer,
            filter: CsrFilter::new(signer_name),
            retry_delay,
        }
    }

    pub fn retry_delay(&self) -> Duration {
        self.retry_delay
    }

    /// Derive the state of a snapshot
    pub fn derive_state(&self, csr: &CertificateSigningRequest) -> CsrState {
        match self.filter.check(csr) {
            Err(Rejection::AlreadySigned) => CsrState::Complete,
            Err(rejection) => CsrState::Ineligible(rejection),
            Ok(()) => match pending_pickup(csr) {
                Some(pickup_id) => CsrState::AwaitingPickup(pickup_id.to_string()),
                None => CsrState::AwaitingSubmit,
            },
        }
    }

    /// Run one reconciliation pass for `key`
    pub async fn reconcile(&self, key: &ResourceKey) -> Result<ReconcileOutcome> {
        let csr = match self.store.get(key).await? {
            Some(csr) => csr,
            None => {
                debug!(csr = %key, "CSR not found, nothing to do");
                return Ok(ReconcileOutcome::done(
                    CsrState::NotFound,
                    MutationOutcome::None,
                ));
            }
        };

        let state = self.derive_state(&csr);
        match &state {
            CsrState::NotFound | CsrState::Complete => {
                Ok(ReconcileOutcome::done(state, MutationOutcome::None))
            }
            CsrState::Ineligible(reason) => {
                debug!(csr = %key, reason = %reason, "Ignoring CSR");
                Ok(ReconcileOutcome::done(state, MutationOutcome::None))
            }
            CsrState::AwaitingSubmit => {
                let mutation = self.submit(key, &csr).await?;
                Ok(ReconcileOutcome::done(state, mutation))
            }
            CsrState::AwaitingPickup(pickup_id) => {
                let pickup_id = pickup_id.clone();
                self.pickup(key, &csr, state, &pickup_id).await
            }
        }
    }

    async fn submit(
        &self,
        key: &ResourceKey,
        csr: &CertificateSigningRequest,
    ) -> Result<MutationOutcome> {
        let request = SigningRequest::from_csr(csr);
        let pickup_id = self
            .signer
            .submit(&request)
            .await
            .map_err(|source| ControllerError::submit_failed(key, source))?;

        if pickup_id.is_empty() {
            return Err(ControllerError::submit_failed(
                key,
                SignerError::invalid_response("CA returned an empty pickup id"),
            ));
        }

        info!(csr = %key, pickup_id = %pickup_id, "Submitted CSR to CA");

        let observed = EngineFields::observe(csr);
        let desired = observed.clone().submitted(pickup_id);
        self.apply(key, csr, &observed, &desired).await
    }

    async fn pickup(
        &self,
        key: &ResourceKey,
        csr: &CertificateSigningRequest,
        state: CsrState,
        pickup_id: &str,
    ) -> Result<ReconcileOutcome> {
        let certificate = match self.signer.poll(pickup_id).await {
            Ok(certificate) => certificate,
            Err(e) if e.is_temporary() => {
                info!(
                    csr = %key,
                    pickup_id = %pickup_id,
                    retry_in = ?self.retry_delay,
                    "Certificate not issued yet"
                );
                return Ok(ReconcileOutcome {
                    state,
                    mutation: MutationOutcome::None,
                    directive: Directive::RequeueAfter(self.retry_delay),
                });
            }
            Err(source) => {
                return Err(ControllerError::pickup_failed(key, pickup_id, source));
            }
        };

        // Clearing the annotation without a certificate would trigger a resubmit
        if certificate.is_empty() {
            return Err(ControllerError::pickup_failed(
                key,
                pickup_id,
                SignerError::invalid_response("CA returned an empty certificate"),
            ));
        }

        info!(
            csr = %key,
            pickup_id = %pickup_id,
            bytes = certificate.len(),
            "Collected certificate"
        );

        let observed = EngineFields::observe(csr);
        let desired = EngineFields::issued(certificate);
        let mutation = self.apply(key, csr, &observed, &desired).await?;
        Ok(ReconcileOutcome::done(state, mutation))
    }

    async fn apply(
        &self,
        key: &ResourceKey,
        csr: &CertificateSigningRequest,
        observed: &EngineFields,
        desired: &EngineFields,
    ) -> Result<MutationOutcome> {
        let Some(patch) = CsrPatch::between(observed, desired) else {
            debug!(csr = %key, "Mutation matches observed state, skipping write");
            return Ok(MutationOutcome::NoOp);
        };

        let base = csr.resource_version().ok_or_else(|| {
            ControllerError::internal_error(format!("CSR {} has no resourceVersion", key))
        })?;

        match self.store.patch_status(key, &base, &patch).await {
            Ok(updated) => {
                let version = updated.resource_version().ok_or_else(|| {
                    ControllerError::internal_error(format!(
                        "Patched CSR {} has no resourceVersion",
                        key
                    ))
                })?;
                debug!(csr = %key, resource_version = %version, "Patched CSR");
                Ok(MutationOutcome::Applied(version))
            }
            Err(e) if e.is_conflict() => {
                warn!(
                    csr = %key,
                    base = %base,
                    "CSR changed since it was observed, dropping mutation"
                );
                Ok(MutationOutcome::Conflict)
            }
            Err(e) if e.is_not_found() => {
                debug!(csr = %key, "CSR deleted since it was observed, dropping mutation");
                Ok(MutationOutcome::Gone)
            }
            Err(e) => Err(e.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use csrsign_core::csr::csr_key;
    use csrsign_core::k8s_openapi::ByteString;
    use csrsign_core::{
        CertificateSigningRequestCondition, CertificateSigningRequestStatus, CONDITION_APPROVED,
        PICKUP_ID_ANNOTATION,
    };
    use csrsign_signer::MockSigner;
    use csrsign_storage::{RedbBackend, ResourceStore, StorageError};
    use std::collections::BTreeMap;
    use tempfile::tempdir;

    const SIGNER: &str = "example.com/foo";
    const RETRY: Duration = Duration::from_secs(3);

    struct Fixture {
        _dir: tempfile::TempDir,
        store: ResourceStore,
        signer: MockSigner,
        reconciler: Reconciler,
    }

    fn fixture(signer: MockSigner) -> Fixture {
        let dir = tempdir().unwrap();
        let backend = RedbBackend::new(dir.path().join("test.redb")).unwrap();
        let store = ResourceStore::new(Arc::new(backend));
        let reconciler = Reconciler::new(
            Arc::new(store.clone()),
            Arc::new(signer.clone()),
            SIGNER,
            RETRY,
        );
        Fixture {
            _dir: dir,
            store,
            signer,
            reconciler,
        }
    }

    fn approved_csr(name: &str, signer_name: &str) -> CertificateSigningRequest {
        let mut csr = CertificateSigningRequest::default();
        csr.metadata.name = Some(name.to_string());
        csr.spec.signer_name = signer_name.to_string();
        csr.spec.request = ByteString(b"-----BEGIN CERTIFICATE REQUEST-----\n".to_vec());
        csr.status = Some(CertificateSigningRequestStatus {
            conditions: Some(vec![CertificateSigningRequestCondition {
                type_: CONDITION_APPROVED.to_string(),
                status: "True".to_string(),
                ..Default::default()
            }]),
            ..Default::default()
        });
        csr
    }

    fn with_pickup(mut csr: CertificateSigningRequest, pickup_id: &str) -> CertificateSigningRequest {
        csr.metadata.annotations = Some(BTreeMap::from([(
            PICKUP_ID_ANNOTATION.to_string(),
            pickup_id.to_string(),
        )]));
        csr
    }

    fn stored(f: &Fixture, name: &str) -> CertificateSigningRequest {
        f.store.get(&csr_key(name)).unwrap().unwrap()
    }

    #[tokio::test]
    async fn test_submit_sets_pickup_annotation() {
        let f = fixture(MockSigner::new().with_pickup_ids(["abc123"]));
        f.store.create(approved_csr("web-tls", SIGNER)).unwrap();

        let outcome = f.reconciler.reconcile(&csr_key("web-tls")).await.unwrap();

        assert_eq!(outcome.state, CsrState::AwaitingSubmit);
        assert!(matches!(outcome.mutation, MutationOutcome::Applied(_)));
        assert_eq!(outcome.directive, Directive::Done);

        let csr = stored(&f, "web-tls");
        assert_eq!(csrsign_core::csr::pickup_id(&csr), Some("abc123"));
        assert_eq!(csrsign_core::csr::issued_certificate(&csr), None);

        let submissions = f.signer.submissions().await;
        assert_eq!(submissions.len(), 1);
        assert_eq!(submissions[0].name, "web-tls");
        assert!(f.signer.polls().await.is_empty());
    }

    #[tokio::test]
    async fn test_pickup_sets_certificate_and_clears_annotation() {
        let f = fixture(MockSigner::new().with_certificate(b"CERT-DATA".to_vec()));
        f.store
            .create(with_pickup(approved_csr("web-tls", SIGNER), "abc123"))
            .unwrap();

        let outcome = f.reconciler.reconcile(&csr_key("web-tls")).await.unwrap();

        assert_eq!(outcome.state, CsrState::AwaitingPickup("abc123".to_string()));
        assert!(matches!(outcome.mutation, MutationOutcome::Applied(_)));
        assert_eq!(outcome.directive, Directive::Done);

        let csr = stored(&f, "web-tls");
        assert_eq!(csrsign_core::csr::pickup_id(&csr), None);
        assert_eq!(
            csrsign_core::csr::issued_certificate(&csr),
            Some(&b"CERT-DATA"[..])
        );
        // Approval conditions survive the patch
        assert!(csrsign_core::csr::is_approved(&csr));
    }

    #[tokio::test]
    async fn test_no_double_submit_while_pickup_pending() {
        let f = fixture(MockSigner::new().with_pending_polls(u32::MAX));
        f.store
            .create(with_pickup(approved_csr("web-tls", SIGNER), "abc123"))
            .unwrap();

        for _ in 0..3 {
            f.reconciler.reconcile(&csr_key("web-tls")).await.unwrap();
        }

        assert!(f.signer.submissions().await.is_empty());
        assert_eq!(f.signer.polls().await, vec!["abc123"; 3]);
    }

    #[tokio::test]
    async fn test_temporary_poll_failure_requeues_with_fixed_delay() {
        let f = fixture(MockSigner::new().with_pending_polls(2));
        let created = f
            .store
            .create(with_pickup(approved_csr("web-tls", SIGNER), "abc123"))
            .unwrap();

        for _ in 0..2 {
            let outcome = f.reconciler.reconcile(&csr_key("web-tls")).await.unwrap();
            assert_eq!(outcome.mutation, MutationOutcome::None);
            assert_eq!(outcome.directive, Directive::RequeueAfter(RETRY));
        }

        // Nothing was written
        let csr = stored(&f, "web-tls");
        assert_eq!(csr.metadata.resource_version, created.metadata.resource_version);
    }

    #[tokio::test]
    async fn test_permanent_poll_failure_is_surfaced() {
        let f = fixture(MockSigner::new());
        f.signer
            .fail_next_poll(SignerError::unknown_pickup("abc123"))
            .await;
        let created = f
            .store
            .create(with_pickup(approved_csr("web-tls", SIGNER), "abc123"))
            .unwrap();

        let err = f.reconciler.reconcile(&csr_key("web-tls")).await.unwrap_err();
        match err {
            ControllerError::PickupFailed { pickup_id, .. } => assert_eq!(pickup_id, "abc123"),
            other => panic!("expected PickupFailed, got {other:?}"),
        }

        // Left stuck with the annotation in place
        let csr = stored(&f, "web-tls");
        assert_eq!(csr.metadata.resource_version, created.metadata.resource_version);
        assert_eq!(csrsign_core::csr::pickup_id(&csr), Some("abc123"));
    }

    #[tokio::test]
    async fn test_empty_certificate_is_a_permanent_failure() {
        let f = fixture(MockSigner::new().with_certificate(Vec::new()));
        f.store
            .create(with_pickup(approved_csr("web-tls", SIGNER), "abc123"))
            .unwrap();

        let err = f.reconciler.reconcile(&csr_key("web-tls")).await.unwrap_err();
        assert!(matches!(err, ControllerError::PickupFailed { .. }));
        assert_eq!(
            csrsign_core::csr::pickup_id(&stored(&f, "web-tls")),
            Some("abc123")
        );
    }

    #[tokio::test]
    async fn test_submit_failure_is_surfaced() {
        let f = fixture(MockSigner::new());
        f.signer
            .fail_next_submit(SignerError::rejected(403, "policy"))
            .await;
        f.store.create(approved_csr("web-tls", SIGNER)).unwrap();

        let err = f.reconciler.reconcile(&csr_key("web-tls")).await.unwrap_err();
        assert!(matches!(err, ControllerError::SubmitFailed { .. }));
        assert_eq!(csrsign_core::csr::pickup_id(&stored(&f, "web-tls")), None);
    }

    #[tokio::test]
    async fn test_signer_mismatch_is_ignored() {
        let f = fixture(MockSigner::new());
        let created = f
            .store
            .create(approved_csr("web-tls", "example.com/bar"))
            .unwrap();

        let outcome = f.reconciler.reconcile(&csr_key("web-tls")).await.unwrap();

        assert!(matches!(
            outcome.state,
            CsrState::Ineligible(Rejection::SignerNameMismatch { .. })
        ));
        assert_eq!(outcome.mutation, MutationOutcome::None);
        assert_eq!(outcome.directive, Directive::Done);
        assert!(f.signer.submissions().await.is_empty());
        assert!(f.signer.polls().await.is_empty());
        assert_eq!(
            stored(&f, "web-tls").metadata.resource_version,
            created.metadata.resource_version
        );
    }

    #[tokio::test]
    async fn test_unapproved_csr_is_ignored() {
        let f = fixture(MockSigner::new());
        let mut csr = approved_csr("web-tls", SIGNER);
        csr.status = None;
        f.store.create(csr).unwrap();

        let outcome = f.reconciler.reconcile(&csr_key("web-tls")).await.unwrap();
        assert_eq!(outcome.state, CsrState::Ineligible(Rejection::NotApproved));
        assert!(f.signer.submissions().await.is_empty());
    }

    #[tokio::test]
    async fn test_complete_csr_is_idempotent() {
        let f = fixture(
            MockSigner::new()
                .with_pickup_ids(["abc123"])
                .with_certificate(b"CERT-DATA".to_vec()),
        );
        f.store.create(approved_csr("web-tls", SIGNER)).unwrap();

        // submit, then pickup
        f.reconciler.reconcile(&csr_key("web-tls")).await.unwrap();
        f.reconciler.reconcile(&csr_key("web-tls")).await.unwrap();
        let signed = stored(&f, "web-tls");
        assert!(csrsign_core::csr::issued_certificate(&signed).is_some());

        for _ in 0..2 {
            let outcome = f.reconciler.reconcile(&csr_key("web-tls")).await.unwrap();
            assert_eq!(outcome.state, CsrState::Complete);
            assert_eq!(outcome.mutation, MutationOutcome::None);
            assert_eq!(outcome.directive, Directive::Done);
        }

        assert_eq!(
            stored(&f, "web-tls").metadata.resource_version,
            signed.metadata.resource_version
        );
        assert_eq!(f.signer.submissions().await.len(), 1);
        assert_eq!(f.signer.polls().await.len(), 1);
    }

    #[tokio::test]
    async fn test_missing_csr_is_a_noop() {
        let f = fixture(MockSigner::new());
        let outcome = f.reconciler.reconcile(&csr_key("nope")).await.unwrap();
        assert_eq!(outcome.state, CsrState::NotFound);
        assert_eq!(outcome.directive, Directive::Done);
    }

    /// Serves a fixed (possibly stale) snapshot while writing through to a real store
    struct StaleSnapshot {
        inner: ResourceStore,
        snapshot: CertificateSigningRequest,
    }

    #[async_trait]
    impl CsrStore for StaleSnapshot {
        async fn get(
            &self,
            _key: &ResourceKey,
        ) -> std::result::Result<Option<CertificateSigningRequest>, StorageError> {
            Ok(Some(self.snapshot.clone()))
        }

        async fn patch_status(
            &self,
            key: &ResourceKey,
            base: &ResourceVersion,
            patch: &CsrPatch,
        ) -> std::result::Result<CertificateSigningRequest, StorageError> {
            self.inner.patch_status(key, base, patch).await
        }

        async fn list(
            &self,
        ) -> std::result::Result<Vec<CertificateSigningRequest>, StorageError> {
            Ok(vec![self.snapshot.clone()])
        }
    }

    #[tokio::test]
    async fn test_conflicting_pass_drops_its_mutation() {
        let f = fixture(MockSigner::new().with_pickup_ids(["abc123", "def456"]));
        let snapshot = f.store.create(approved_csr("web-tls", SIGNER)).unwrap();

        // Another pass advanced the CSR after our snapshot was taken
        f.reconciler.reconcile(&csr_key("web-tls")).await.unwrap();
        let advanced = stored(&f, "web-tls");

        let stale = Reconciler::new(
            Arc::new(StaleSnapshot {
                inner: f.store.clone(),
                snapshot,
            }),
            Arc::new(f.signer.clone()),
            SIGNER,
            RETRY,
        );
        let outcome = stale.reconcile(&csr_key("web-tls")).await.unwrap();

        assert_eq!(outcome.mutation, MutationOutcome::Conflict);
        assert_eq!(outcome.directive, Directive::Done);

        let csr = stored(&f, "web-tls");
        assert_eq!(csr.metadata.resource_version, advanced.metadata.resource_version);
        assert_eq!(csrsign_core::csr::pickup_id(&csr), Some("abc123"));
    }

    #[tokio::test]
    async fn test_csr_deleted_mid_pass_drops_its_mutation() {
        let f = fixture(MockSigner::new().with_pickup_ids(["abc123"]));
        let snapshot = f.store.create(approved_csr("web-tls", SIGNER)).unwrap();
        let _: CertificateSigningRequest = f.store.delete(&csr_key("web-tls")).unwrap();

        let stale = Reconciler::new(
            Arc::new(StaleSnapshot {
                inner: f.store.clone(),
                snapshot,
            }),
            Arc::new(f.signer.clone()),
            SIGNER,
            RETRY,
        );
        let outcome = stale.reconcile(&csr_key("web-tls")).await.unwrap();

        assert_eq!(outcome.state, CsrState::AwaitingSubmit);
        assert_eq!(outcome.mutation, MutationOutcome::Gone);
        assert_eq!(outcome.directive, Directive::Done);
        assert!(f.store.get::<CertificateSigningRequest>(&csr_key("web-tls")).unwrap().is_none());
    }

    #[test]
    fn test_derive_state() {
        let f = fixture(MockSigner::new());

        assert_eq!(
            f.reconciler.derive_state(&approved_csr("a", SIGNER)),
            CsrState::AwaitingSubmit
        );
        assert_eq!(
            f.reconciler
                .derive_state(&with_pickup(approved_csr("a", SIGNER), "abc123")),
            CsrState::AwaitingPickup("abc123".to_string())
        );

        let mut signed = with_pickup(approved_csr("a", SIGNER), "abc123");
        signed.status.as_mut().unwrap().certificate = Some(ByteString(b"CERT-DATA".to_vec()));
        assert_eq!(f.reconciler.derive_state(&signed), CsrState::Complete);
    }
}
