use csrsign_signer::SignerError;
use csrsign_storage::StorageError;
use miette::Diagnostic;
use thiserror::Error;

/// Errors surfaced by a reconciliation pass
#[derive(Error, Debug, Diagnostic)]
pub enum ControllerError {
    /// The CA refused or failed the submit call
    #[error("Submitting {resource_key} to the CA failed: {source}")]
    #[diagnostic(
        code(csrsign::controller::submit_failed),
        help("The request is retried when it is next triggered. Check the CA for the reason it was refused")
    )]
    SubmitFailed {
        #[allow(unused)]
        resource_key: String,
        #[source]
        source: SignerError,
    },

    /// Collecting the certificate failed permanently
    #[error("Pickup of {pickup_id} for {resource_key} failed: {source}")]
    #[diagnostic(
        code(csrsign::controller::pickup_failed),
        help("The pickup-id annotation is left in place. Remove it to force a new submission, or fix the CA side")
    )]
    PickupFailed {
        #[allow(unused)]
        resource_key: String,
        #[allow(unused)]
        pickup_id: String,
        #[source]
        source: SignerError,
    },

    /// Storage error
    #[error(transparent)]
    #[diagnostic(transparent)]
    Storage(#[from] StorageError),

    /// Internal error
    #[error("Internal error: {message}")]
    #[diagnostic(
        code(csrsign::controller::internal_error),
        help("This is likely a bug. Please report it with the full error details")
    )]
    InternalError {
        #[allow(unused)]
        message: String,
    },
}

/// Result type for controller operations
pub type Result<T> = std::result::Result<T, ControllerError>;

impl ControllerError {
    pub fn submit_failed(resource_key: impl ToString, source: SignerError) -> Self {
        Self::SubmitFailed {
            resource_key: resource_key.to_string(),
            source,
        }
    }

    pub fn pickup_failed(
        resource_key: impl ToString,
        pickup_id: impl Into<String>,
        source: SignerError,
    ) -> Self {
        Self::PickupFailed {
            resource_key: resource_key.to_string(),
            pickup_id: pickup_id.into(),
            source,
        }
    }

    pub fn internal_error(message: impl Into<String>) -> Self {
        Self::InternalError {
            message: message.into(),
        }
    }
}
