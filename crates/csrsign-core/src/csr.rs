//! CertificateSigningRequest field accessors
//!
//! The controller, the API server and the store all look at the same handful
//! of CSR fields. Empty values are treated exactly like absent ones everywhere.

use crate::{CsrsignError, GroupVersionKind, ResourceKey, Result};
use chrono::Utc;
use k8s_openapi::api::certificates::v1::{
    CertificateSigningRequest, CertificateSigningRequestCondition,
};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::Time;
use std::fmt;

/// Annotation holding the external CA's tracking id while issuance is in flight.
///
/// Operators and dashboards read this key out-of-band; its value must not change.
pub const PICKUP_ID_ANNOTATION: &str = "pickup-id";

/// Condition type recorded when a request is approved
pub const CONDITION_APPROVED: &str = "Approved";

/// Condition type recorded when a request is denied
pub const CONDITION_DENIED: &str = "Denied";

/// GVK of certificates.k8s.io/v1 CertificateSigningRequest
pub fn csr_gvk() -> GroupVersionKind {
    GroupVersionKind::new("certificates.k8s.io", "v1", "CertificateSigningRequest")
}

/// Key of a (cluster-scoped) CSR
pub fn csr_key(name: impl Into<String>) -> ResourceKey {
    ResourceKey::cluster_scoped(csr_gvk(), name)
}

/// Approval state derived from a CSR's conditions
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ApprovalState {
    pub approved: bool,
    pub denied: bool,
}

impl ApprovalState {
    /// Approved and not denied
    pub fn is_approved(&self) -> bool {
        self.approved && !self.denied
    }
}

/// Scan the conditions for Approved / Denied entries
pub fn approval_state(csr: &CertificateSigningRequest) -> ApprovalState {
    let mut state = ApprovalState::default();
    let conditions = csr
        .status
        .as_ref()
        .and_then(|s| s.conditions.as_deref())
        .unwrap_or_default();

    for condition in conditions {
        // A condition explicitly set to "False" does not count
        if condition.status == "False" {
            continue;
        }
        match condition.type_.as_str() {
            CONDITION_APPROVED => state.approved = true,
            CONDITION_DENIED => state.denied = true,
            _ => {}
        }
    }

    state
}

/// True if the CSR has an Approved condition and no Denied condition
pub fn is_approved(csr: &CertificateSigningRequest) -> bool {
    approval_state(csr).is_approved()
}

/// True once deletion of the CSR has been requested
pub fn is_deletion_requested(csr: &CertificateSigningRequest) -> bool {
    csr.metadata.deletion_timestamp.is_some()
}

/// The signer name, if one is set
pub fn signer_name(csr: &CertificateSigningRequest) -> Option<&str> {
    Some(csr.spec.signer_name.as_str()).filter(|s| !s.is_empty())
}

/// The in-flight pickup id, if present and non-empty
pub fn pickup_id(csr: &CertificateSigningRequest) -> Option<&str> {
    csr.metadata
        .annotations
        .as_ref()
        .and_then(|a| a.get(PICKUP_ID_ANNOTATION))
        .map(String::as_str)
        .filter(|id| !id.is_empty())
}

/// The issued certificate, if present and non-empty
pub fn issued_certificate(csr: &CertificateSigningRequest) -> Option<&[u8]> {
    csr.status
        .as_ref()
        .and_then(|s| s.certificate.as_ref())
        .map(|c| c.0.as_slice())
        .filter(|c| !c.is_empty())
}

/// An approval decision made by an approver
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApprovalDecision {
    Approve,
    Deny,
}

impl ApprovalDecision {
    pub fn condition_type(&self) -> &'static str {
        match self {
            ApprovalDecision::Approve => CONDITION_APPROVED,
            ApprovalDecision::Deny => CONDITION_DENIED,
        }
    }
}

impl fmt::Display for ApprovalDecision {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.condition_type())
    }
}

/// Record an approval decision as a condition.
///
/// Returns `Ok(false)` when the same decision is already recorded. Reversing
/// an earlier decision is rejected.
pub fn record_decision(
    csr: &mut CertificateSigningRequest,
    decision: ApprovalDecision,
    reason: &str,
    message: &str,
) -> Result<bool> {
    let state = approval_state(csr);
    let name = csr.metadata.name.clone().unwrap_or_default();

    let (already, opposite) = match decision {
        ApprovalDecision::Approve => (state.approved, state.denied),
        ApprovalDecision::Deny => (state.denied, state.approved),
    };

    if opposite {
        let current = match decision {
            ApprovalDecision::Approve => ApprovalDecision::Deny,
            ApprovalDecision::Deny => ApprovalDecision::Approve,
        };
        return Err(CsrsignError::approval_conflict(
            name,
            current.to_string(),
            decision.to_string(),
        ));
    }

    if already {
        return Ok(false);
    }

    let now = Time(Utc::now());
    csr.status
        .get_or_insert_with(Default::default)
        .conditions
        .get_or_insert_with(Vec::new)
        .push(CertificateSigningRequestCondition {
            type_: decision.condition_type().to_string(),
            status: "True".to_string(),
            reason: Some(reason.to_string()),
            message: Some(message.to_string()),
            last_update_time: Some(now.clone()),
            last_transition_time: Some(now),
        });

    Ok(true)
}
