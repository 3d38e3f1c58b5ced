use miette::Diagnostic;
use thiserror::Error;

/// Errors returned by a signing client.
///
/// `IssuancePending` is the only temporary condition: the CA accepted the
/// request but has not produced the certificate yet. Everything else is permanent.
#[derive(Error, Debug, Diagnostic)]
pub enum SignerError {
    /// The certificate is not issued yet
    #[error("Issuance is pending for pickup id {pickup_id}")]
    #[diagnostic(
        code(csrsign::signer::issuance_pending),
        help("The CA is still processing the request. Poll again later")
    )]
    IssuancePending {
        #[allow(unused)]
        pickup_id: String,
    },

    /// The CA refused the request
    #[error("CA rejected the request (status {status}): {message}")]
    #[diagnostic(
        code(csrsign::signer::rejected),
        help("Check the CA's policy for this signer and the contents of the CSR")
    )]
    Rejected {
        #[allow(unused)]
        status: u16,
        #[allow(unused)]
        message: String,
    },

    /// The CA does not know the pickup id
    #[error("Unknown pickup id: {pickup_id}")]
    #[diagnostic(
        code(csrsign::signer::unknown_pickup),
        help("The request may have expired on the CA side. Remove the pickup-id annotation to resubmit")
    )]
    UnknownPickup {
        #[allow(unused)]
        pickup_id: String,
    },

    /// The request could not be expressed to the CA
    #[error("Invalid signing request: {message}")]
    #[diagnostic(
        code(csrsign::signer::invalid_request),
        help("spec.request must be a PEM-encoded certificate request")
    )]
    InvalidRequest {
        #[allow(unused)]
        message: String,
    },

    /// Transport failure talking to the CA
    #[error("CA transport error: {message}")]
    #[diagnostic(
        code(csrsign::signer::transport),
        help("Verify --ca-url is reachable and the token is valid")
    )]
    Transport {
        #[allow(unused)]
        message: String,
    },

    /// The CA answered with something we could not understand
    #[error("Invalid CA response: {message}")]
    #[diagnostic(
        code(csrsign::signer::invalid_response),
        help("The CA endpoint may not implement the expected REST API")
    )]
    InvalidResponse {
        #[allow(unused)]
        message: String,
    },
}

/// Result type for signer operations
pub type Result<T> = std::result::Result<T, SignerError>;

impl SignerError {
    /// True if retrying the same call later may succeed
    pub fn is_temporary(&self) -> bool {
        matches!(self, SignerError::IssuancePending { .. })
    }

    pub fn issuance_pending(pickup_id: impl Into<String>) -> Self {
        Self::IssuancePending {
            pickup_id: pickup_id.into(),
        }
    }

    pub fn rejected(status: u16, message: impl Into<String>) -> Self {
        Self::Rejected {
            status,
            message: message.into(),
        }
    }

    pub fn unknown_pickup(pickup_id: impl Into<String>) -> Self {
        Self::UnknownPickup {
            pickup_id: pickup_id.into(),
        }
    }

    pub fn invalid_request(message: impl Into<String>) -> Self {
        Self::InvalidRequest {
            message: message.into(),
        }
    }

    pub fn transport(message: impl Into<String>) -> Self {
        Self::Transport {
            message: message.into(),
        }
    }

    pub fn invalid_response(message: impl Into<String>) -> Self {
        Self::InvalidResponse {
            message: message.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_only_pending_is_temporary() {
        assert!(SignerError::issuance_pending("abc123").is_temporary());

        for err in [
            SignerError::rejected(400, "bad csr"),
            SignerError::unknown_pickup("abc123"),
            SignerError::invalid_request("not utf-8"),
            SignerError::transport("connection refused"),
            SignerError::invalid_response("missing pickup_id"),
        ] {
            assert!(!err.is_temporary(), "{err} must be permanent");
        }
    }
}
