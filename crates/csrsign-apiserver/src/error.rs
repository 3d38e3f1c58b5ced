use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;

/// API error type
#[derive(Debug)]
pub enum ApiError {
    /// Resource not found (404)
    NotFound(String),

    /// Resource already exists (409)
    AlreadyExists(String),

    /// Conflict - concurrent modification or contradicting approval (409)
    Conflict(String),

    /// Invalid input (400)
    BadRequest(String),

    /// Internal server error (500)
    Internal(String),

    /// Validation failed (422)
    ValidationFailed(String),
}

/// Result type for API operations
pub type Result<T> = std::result::Result<T, ApiError>;

impl ApiError {
    fn status_and_reason(&self) -> (StatusCode, &'static str) {
        match self {
            ApiError::NotFound(_) => (StatusCode::NOT_FOUND, "NotFound"),
            ApiError::AlreadyExists(_) => (StatusCode::CONFLICT, "AlreadyExists"),
            ApiError::Conflict(_) => (StatusCode::CONFLICT, "Conflict"),
            ApiError::BadRequest(_) => (StatusCode::BAD_REQUEST, "BadRequest"),
            ApiError::Internal(_) => (StatusCode::INTERNAL_SERVER_ERROR, "InternalError"),
            ApiError::ValidationFailed(_) => (StatusCode::UNPROCESSABLE_ENTITY, "Invalid"),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, reason) = self.status_and_reason();
        let message = match self {
            ApiError::NotFound(msg)
            | ApiError::AlreadyExists(msg)
            | ApiError::Conflict(msg)
            | ApiError::BadRequest(msg)
            | ApiError::Internal(msg)
            | ApiError::ValidationFailed(msg) => msg,
        };

        let body = Json(json!({
            "apiVersion": "v1",
            "kind": "Status",
            "status": "Failure",
            "message": message,
            "reason": reason,
            "code": status.as_u16()
        }));

        (status, body).into_response()
    }
}

impl From<csrsign_core::CsrsignError> for ApiError {
    fn from(err: csrsign_core::CsrsignError) -> Self {
        use csrsign_core::CsrsignError;

        match err {
            CsrsignError::ApprovalConflict { .. } => ApiError::Conflict(err.to_string()),
            CsrsignError::InvalidResource { .. } | CsrsignError::SerializationError { .. } => {
                ApiError::BadRequest(err.to_string())
            }
            _ => ApiError::Internal(err.to_string()),
        }
    }
}

impl From<csrsign_storage::StorageError> for ApiError {
    fn from(err: csrsign_storage::StorageError) -> Self {
        use csrsign_storage::StorageError;

        match err {
            StorageError::KeyNotFound { .. } => ApiError::NotFound(err.to_string()),
            StorageError::AlreadyExists { .. } => ApiError::AlreadyExists(err.to_string()),
            StorageError::Conflict { .. } => ApiError::Conflict(err.to_string()),
            StorageError::InvalidResource { .. } => ApiError::BadRequest(err.to_string()),
            _ => ApiError::Internal(err.to_string()),
        }
    }
}

impl From<serde_json::Error> for ApiError {
    fn from(err: serde_json::Error) -> Self {
        ApiError::BadRequest(format!("JSON error: {}", err))
    }
}
