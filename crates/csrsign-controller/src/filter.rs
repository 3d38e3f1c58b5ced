use csrsign_core::csr;
use csrsign_core::CertificateSigningRequest;
use std::fmt;
use tracing::debug;

/// Why a CSR is not acted upon
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Rejection {
    /// Deletion has been requested
    Deleted,
    /// spec.signerName is empty
    MissingSignerName,
    /// The CSR is addressed to another signer
    SignerNameMismatch { expected: String, actual: String },
    /// No Approved condition yet
    NotApproved,
    /// A Denied condition is present
    Denied,
    /// status.certificate is already set
    AlreadySigned,
}

impl fmt::Display for Rejection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Rejection::Deleted => write!(f, "deletion requested"),
            Rejection::MissingSignerName => write!(f, "no signer name set"),
            Rejection::SignerNameMismatch { expected, actual } => {
                write!(f, "signer name {} does not match {}", actual, expected)
            }
            Rejection::NotApproved => write!(f, "not approved"),
            Rejection::Denied => write!(f, "denied"),
            Rejection::AlreadySigned => write!(f, "certificate already issued"),
        }
    }
}

/// A single eligibility check
pub trait FilterPredicate: Send + Sync {
    /// `None` if the CSR passes this check
    fn check(&self, csr: &CertificateSigningRequest) -> Option<Rejection>;

    /// Name of the predicate
    fn name(&self) -> &str;
}

/// Rejects CSRs that are being deleted
pub struct NotDeleted;

impl FilterPredicate for NotDeleted {
    fn check(&self, csr: &CertificateSigningRequest) -> Option<Rejection> {
        csr::is_deletion_requested(csr).then_some(Rejection::Deleted)
    }

    fn name(&self) -> &str {
        "NotDeleted"
    }
}

/// Accepts only CSRs addressed to the configured signer
pub struct SignerNameMatches {
    signer_name: String,
}

impl SignerNameMatches {
    pub fn new(signer_name: impl Into<String>) -> Self {
        Self {
            signer_name: signer_name.into(),
        }
    }
}

impl FilterPredicate for SignerNameMatches {
    fn check(&self, csr: &CertificateSigningRequest) -> Option<Rejection> {
        match csr::signer_name(csr) {
            None => Some(Rejection::MissingSignerName),
            Some(actual) if actual != self.signer_name => Some(Rejection::SignerNameMismatch {
                expected: self.signer_name.clone(),
                actual: actual.to_string(),
            }),
            Some(_) => None,
        }
    }

    fn name(&self) -> &str {
        "SignerNameMatches"
    }
}

/// Accepts only CSRs that are approved and not denied
pub struct ApprovedNotDenied;

impl FilterPredicate for ApprovedNotDenied {
    fn check(&self, csr: &CertificateSigningRequest) -> Option<Rejection> {
        let approval = csr::approval_state(csr);
        if approval.denied {
            Some(Rejection::Denied)
        } else if !approval.approved {
            Some(Rejection::NotApproved)
        } else {
            None
        }
    }

    fn name(&self) -> &str {
        "ApprovedNotDenied"
    }
}

/// Rejects CSRs that already carry a certificate
pub struct NotYetSigned;

impl FilterPredicate for NotYetSigned {
    fn check(&self, csr: &CertificateSigningRequest) -> Option<Rejection> {
        csr::issued_certificate(csr)
            .is_some()
            .then_some(Rejection::AlreadySigned)
    }

    fn name(&self) -> &str {
        "NotYetSigned"
    }
}

/// Eligibility filter: runs its predicates in order and reports the first rejection.
///
/// Pure: reads only the snapshot it is given.
pub struct CsrFilter {
    predicates: Vec<Box<dyn FilterPredicate>>,
}

impl CsrFilter {
    /// Default predicate chain for a signer
    pub fn new(signer_name: impl Into<String>) -> Self {
        Self {
            predicates: vec![
                Box::new(NotDeleted),
                Box::new(SignerNameMatches::new(signer_name)),
                Box::new(ApprovedNotDenied),
                Box::new(NotYetSigned),
            ],
        }
    }

    /// `Ok(())` if the reconciler should act on this CSR
    pub fn check(&self, csr: &CertificateSigningRequest) -> Result<(), Rejection> {
        for predicate in &self.predicates {
            if let Some(rejection) = predicate.check(csr) {
                debug!(
                    csr = csr.metadata.name.as_deref().unwrap_or_default(),
                    filter = predicate.name(),
                    reason = %rejection,
                    "CSR rejected"
                );
                return Err(rejection);
            }
        }
        Ok(())
    }

    pub fn is_eligible(&self, csr: &CertificateSigningRequest) -> bool {
        self.check(csr).is_ok()
    }
}
