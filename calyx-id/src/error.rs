//! Error types for calyx-id HTTP handlers

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use thiserror::Error;

use crate::services::ServiceError;

/// API error type
#[derive(Debug, Error)]
pub enum ApiError {
    /// Resource not found (404)
    #[error("Resource not found: {0}")]
    NotFound(String),

    /// Invalid request (400)
    #[error("Invalid request: {0}")]
    BadRequest(String),

    /// Identification finished without a candidate (404)
    #[error("No matching flowers found")]
    NoMatch,

    /// Vision backend failed (502)
    #[error("Extraction failed: {0}")]
    ExtractionFailed(String),

    /// Store unavailable for a load-bearing read (503)
    #[error("Service unavailable: {0}")]
    Unavailable(String),

    /// Internal server error (500)
    #[error("Internal server error: {0}")]
    Internal(String),

    /// calyx-common error
    #[error("Common error: {0}")]
    Common(#[from] calyx_common::Error),
}

impl From<ServiceError> for ApiError {
    fn from(err: ServiceError) -> Self {
        match err {
            ServiceError::InvalidInput(msg) => ApiError::BadRequest(msg),
            ServiceError::Extraction(e) => ApiError::ExtractionFailed(e.to_string()),
            ServiceError::NoMatch => ApiError::NoMatch,
            ServiceError::NotFound(msg) => ApiError::NotFound(msg),
            ServiceError::StoreUnavailable(e) => ApiError::Unavailable(e.to_string()),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, error_code, message) = match self {
            ApiError::NotFound(msg) => (StatusCode::NOT_FOUND, "NOT_FOUND", msg),
            ApiError::BadRequest(msg) => (StatusCode::BAD_REQUEST, "BAD_REQUEST", msg),
            ApiError::NoMatch => (
                StatusCode::NOT_FOUND,
                "NO_MATCH",
                "No matching flowers found".to_string(),
            ),
            ApiError::ExtractionFailed(msg) => (StatusCode::BAD_GATEWAY, "EXTRACTION_FAILED", msg),
            ApiError::Unavailable(msg) => (StatusCode::SERVICE_UNAVAILABLE, "STORE_UNAVAILABLE", msg),
            ApiError::Internal(msg) => (StatusCode::INTERNAL_SERVER_ERROR, "INTERNAL_ERROR", msg),
            ApiError::Common(ref err) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                "COMMON_ERROR",
                err.to_string(),
            ),
        };

        let body = Json(json!({
            "error": {
                "code": error_code,
                "message": message,
            }
        }));

        (status, body).into_response()
    }
}

/// Result type for API handlers
pub type ApiResult<T> = Result<T, ApiError>;

#[cfg(test)]
mod tests {
    use super::*;
    use crate::extractors::ExtractionError;

    #[test]
    fn test_service_error_status_codes() {
        let cases = [
            (ServiceError::InvalidInput("bad".into()), StatusCode::BAD_REQUEST),
            (ServiceError::NoMatch, StatusCode::NOT_FOUND),
            (ServiceError::NotFound("gone".into()), StatusCode::NOT_FOUND),
            (
                ServiceError::Extraction(ExtractionError::Network("timeout".into())),
                StatusCode::BAD_GATEWAY,
            ),
            (
                ServiceError::StoreUnavailable(calyx_common::Error::Internal("down".into())),
                StatusCode::SERVICE_UNAVAILABLE,
            ),
        ];

        for (err, expected) in cases {
            let response = ApiError::from(err).into_response();
            assert_eq!(response.status(), expected);
        }
    }
}
