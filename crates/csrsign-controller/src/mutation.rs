//! The two CSR fields the controller owns, and minimal patches between them.

use csrsign_core::csr;
use csrsign_core::k8s_openapi::ByteString;
use csrsign_core::{CertificateSigningRequest, PICKUP_ID_ANNOTATION};
use serde_json::{Map, Value};

/// Engine-owned fields of a CSR, with empty values normalized to `None`
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EngineFields {
    pub pickup_id: Option<String>,
    pub certificate: Option<Vec<u8>>,
}

impl EngineFields {
    /// Read the engine-owned fields from a snapshot
    pub fn observe(csr: &CertificateSigningRequest) -> Self {
        Self {
            pickup_id: csr::pickup_id(csr).map(str::to_string),
            certificate: csr::issued_certificate(csr).map(<[u8]>::to_vec),
        }
    }

    /// State after a successful submit
    pub fn submitted(self, pickup_id: impl Into<String>) -> Self {
        Self {
            pickup_id: Some(pickup_id.into()).filter(|id| !id.is_empty()),
            ..self
        }
    }

    /// State after a successful pickup: annotation gone, certificate set
    pub fn issued(certificate: Vec<u8>) -> Self {
        Self {
            pickup_id: None,
            certificate: Some(certificate).filter(|c| !c.is_empty()),
        }
    }
}

/// Change to a single field
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FieldChange<T> {
    Keep,
    Set(T),
    Clear,
}

impl<T: Clone + PartialEq> FieldChange<T> {
    fn between(observed: &Option<T>, desired: &Option<T>) -> Self {
        match (observed, desired) {
            (a, b) if a == b => FieldChange::Keep,
            (_, Some(value)) => FieldChange::Set(value.clone()),
            (Some(_), None) => FieldChange::Clear,
            (None, None) => FieldChange::Keep,
        }
    }

    fn is_keep(&self) -> bool {
        matches!(self, FieldChange::Keep)
    }
}

/// Minimal diff of the engine-owned fields
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CsrPatch {
    pub pickup_id: FieldChange<String>,
    pub certificate: FieldChange<Vec<u8>>,
}

impl CsrPatch {
    /// Diff `observed` against `desired`; `None` if nothing would change
    pub fn between(observed: &EngineFields, desired: &EngineFields) -> Option<Self> {
        let patch = Self {
            pickup_id: FieldChange::between(&observed.pickup_id, &desired.pickup_id),
            certificate: FieldChange::between(&observed.certificate, &desired.certificate),
        };

        if patch.pickup_id.is_keep() && patch.certificate.is_keep() {
            None
        } else {
            Some(patch)
        }
    }

    /// Render as a JSON merge patch (RFC 7386) touching only the changed fields
    pub fn to_merge_patch(&self) -> Result<Value, serde_json::Error> {
        let mut root = Map::new();

        let annotation = match &self.pickup_id {
            FieldChange::Keep => None,
            FieldChange::Set(id) => Some(Value::String(id.clone())),
            FieldChange::Clear => Some(Value::Null),
        };
        if let Some(value) = annotation {
            let mut annotations = Map::new();
            annotations.insert(PICKUP_ID_ANNOTATION.to_string(), value);
            let mut metadata = Map::new();
            metadata.insert("annotations".to_string(), Value::Object(annotations));
            root.insert("metadata".to_string(), Value::Object(metadata));
        }

        let certificate = match &self.certificate {
            FieldChange::Keep => None,
            // ByteString serializes to the base64 wire form
            FieldChange::Set(bytes) => Some(serde_json::to_value(ByteString(bytes.clone()))?),
            FieldChange::Clear => Some(Value::Null),
        };
        if let Some(value) = certificate {
            let mut status = Map::new();
            status.insert("certificate".to_string(), value);
            root.insert("status".to_string(), Value::Object(status));
        }

        Ok(Value::Object(root))
    }
}
