// Allow unused assignments for diagnostic fields - they're used by the macros
#![allow(unused_assignments)]

use miette::Diagnostic;
use thiserror::Error;

/// Core error type for csrsign operations
#[derive(Error, Debug, Diagnostic)]
pub enum CsrsignError {
    /// Invalid resource
    #[error("Invalid resource: {reason}")]
    #[diagnostic(code(csrsign::invalid_resource), help("{suggestion}"))]
    InvalidResource {
        #[allow(unused)]
        reason: String,
        #[allow(unused)]
        suggestion: String,
    },

    /// Approval decision contradicts an earlier one
    #[error("CSR {name} is already {current}, cannot mark it {requested}")]
    #[diagnostic(
        code(csrsign::approval_conflict),
        help("Approval is monotonic. Create a new CertificateSigningRequest instead")
    )]
    ApprovalConflict {
        #[allow(unused)]
        name: String,
        #[allow(unused)]
        current: String,
        #[allow(unused)]
        requested: String,
    },

    /// Serialization error
    #[error("Serialization error: {message}")]
    #[diagnostic(
        code(csrsign::serialization_error),
        help("Ensure the resource format is valid JSON or YAML")
    )]
    SerializationError {
        #[allow(unused)]
        message: String,
        #[source]
        #[allow(unused)]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    /// Internal error
    #[error("Internal error: {message}")]
    #[diagnostic(
        code(csrsign::internal_error),
        help("This is likely a bug. Please report it with the full error details")
    )]
    InternalError {
        #[allow(unused)]
        message: String,
    },
}

/// Result type alias for csrsign operations
pub type Result<T> = std::result::Result<T, CsrsignError>;

impl CsrsignError {
    /// Create an InvalidResource error
    pub fn invalid_resource(reason: impl Into<String>, suggestion: impl Into<String>) -> Self {
        Self::InvalidResource {
            reason: reason.into(),
            suggestion: suggestion.into(),
        }
    }

    /// Create an ApprovalConflict error
    pub fn approval_conflict(
        name: impl Into<String>,
        current: impl Into<String>,
        requested: impl Into<String>,
    ) -> Self {
        Self::ApprovalConflict {
            name: name.into(),
            current: current.into(),
            requested: requested.into(),
        }
    }

    /// Create a SerializationError
    pub fn serialization_error(
        message: impl Into<String>,
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    ) -> Self {
        Self::SerializationError {
            message: message.into(),
            source,
        }
    }

    /// Create an InternalError
    pub fn internal_error(message: impl Into<String>) -> Self {
        Self::InternalError {
            message: message.into(),
        }
    }
}
