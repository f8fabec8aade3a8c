//! HTTP error responses for the relay.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;

/// API error response body.
#[derive(Debug, Clone, Serialize)]
pub struct ApiError {
    #[serde(skip)]
    status: StatusCode,
    /// Error code (e.g., "E002" for relay errors)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub code: Option<String>,
    /// Human-readable error message
    pub message: String,
}

impl ApiError {
    /// Create an error with an explicit status.
    #[must_use]
    pub fn new(status: StatusCode, message: impl Into<String>) -> Self {
        Self {
            status,
            code: None,
            message: message.into(),
        }
    }

    /// Create a not found error.
    #[must_use]
    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new(StatusCode::NOT_FOUND, message)
    }

    /// Create an unauthorized error.
    #[must_use]
    pub fn unauthorized(message: impl Into<String>) -> Self {
        Self::new(StatusCode::UNAUTHORIZED, message)
    }

    /// Get the HTTP status code for this error.
    #[must_use]
    pub const fn status_code(&self) -> StatusCode {
        self.status
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (self.status, Json(self)).into_response()
    }
}

impl From<crate::error::Error> for ApiError {
    fn from(err: crate::error::Error) -> Self {
        Self {
            status: StatusCode::INTERNAL_SERVER_ERROR,
            code: err.code().map(String::from),
            message: err.to_string(),
        }
    }
}

/// Result type for relay handlers.
pub type ApiResult<T> = Result<T, ApiError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_and_body() {
        let err = ApiError::unauthorized("Peer discovery is disabled");
        assert_eq!(err.status_code(), StatusCode::UNAUTHORIZED);

        let json = serde_json::to_string(&err).unwrap();
        assert_eq!(json, r#"{"message":"Peer discovery is disabled"}"#);
    }

    #[test]
    fn test_from_core_error() {
        let api_err: ApiError = crate::error::Error::Relay("boom".into()).into();
        assert_eq!(api_err.code.as_deref(), Some("E002"));
        assert_eq!(api_err.status_code(), StatusCode::INTERNAL_SERVER_ERROR);
        assert!(api_err.message.contains("boom"));
    }
}
