//! Error types for the analyst server.

use analyst_core::{AnalystError, ErrorCategory};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;
use thiserror::Error;

/// Result type alias for server operations.
pub type Result<T> = std::result::Result<T, ServerError>;

/// Errors that can occur in the analyst server.
#[derive(Error, Debug)]
pub enum ServerError {
    /// A session ended without an answer
    #[error("{0}")]
    Session(#[from] AnalystError),

    /// Request body is not multipart/form-data
    #[error("Unsupported media type: {0}")]
    UnsupportedMediaType(String),

    /// Invalid request format
    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    /// The request outlived the configured timeout
    #[error("Request timed out after {0} seconds")]
    Timeout(u64),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Server configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Internal server error
    #[error("Internal server error: {0}")]
    Internal(String),
}

impl ServerError {
    /// Create a new invalid request error.
    pub fn invalid_request(msg: impl Into<String>) -> Self {
        Self::InvalidRequest(msg.into())
    }

    /// Create a new configuration error.
    pub fn config_error(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    /// Create a new internal error.
    pub fn internal(msg: impl Into<String>) -> Self {
        Self::Internal(msg.into())
    }
}

impl ServerError {
    pub fn status_code(&self) -> StatusCode {
        match self {
            ServerError::Session(e) => match e.category() {
                ErrorCategory::Upload | ErrorCategory::BudgetExceeded => StatusCode::BAD_REQUEST,
                ErrorCategory::Oracle => StatusCode::SERVICE_UNAVAILABLE,
                ErrorCategory::Install
                | ErrorCategory::ResultDecode
                | ErrorCategory::Internal => StatusCode::INTERNAL_SERVER_ERROR,
            },
            ServerError::UnsupportedMediaType(_) => StatusCode::UNSUPPORTED_MEDIA_TYPE,
            ServerError::InvalidRequest(_) => StatusCode::BAD_REQUEST,
            ServerError::Timeout(_) => StatusCode::GATEWAY_TIMEOUT,
            ServerError::Io(_) | ServerError::Config(_) | ServerError::Internal(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }

    pub fn error_type(&self) -> &'static str {
        match self {
            ServerError::Session(e) => e.category().as_str(),
            ServerError::UnsupportedMediaType(_) => "unsupported_media_type",
            ServerError::InvalidRequest(_) => "invalid_request",
            ServerError::Timeout(_) => "timeout",
            ServerError::Io(_) | ServerError::Config(_) | ServerError::Internal(_) => {
                "internal_error"
            }
        }
    }

    /// Text for the response body. Internal details stay in the logs.
    pub fn detail(&self) -> String {
        match self {
            ServerError::Session(e) => e.public_message(),
            ServerError::UnsupportedMediaType(msg) | ServerError::InvalidRequest(msg) => {
                msg.clone()
            }
            ServerError::Timeout(_) => self.to_string(),
            ServerError::Io(_) | ServerError::Config(_) | ServerError::Internal(_) => {
                "An internal server error occurred.".to_string()
            }
        }
    }
}

impl IntoResponse for ServerError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        if status.is_server_error() {
            log::error!("Request failed ({}): {}", self.error_type(), self);
        } else {
            log::warn!("Request rejected ({}): {}", self.error_type(), self);
        }

        (
            status,
            Json(json!({
                "detail": self.detail(),
                "category": self.error_type(),
            })),
        )
            .into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_session_errors_map_to_status() {
        let cases = [
            (AnalystError::UploadError("x".into()), StatusCode::BAD_REQUEST),
            (AnalystError::OracleError("x".into()), StatusCode::SERVICE_UNAVAILABLE),
            (AnalystError::InstallError("x".into()), StatusCode::INTERNAL_SERVER_ERROR),
            (AnalystError::ResultDecodeError("x".into()), StatusCode::INTERNAL_SERVER_ERROR),
            (
                AnalystError::BudgetExceeded {
                    attempts: 10,
                    last_feedback: "boom".into(),
                },
                StatusCode::BAD_REQUEST,
            ),
            (AnalystError::IoError("x".into()), StatusCode::INTERNAL_SERVER_ERROR),
        ];
        for (error, status) in cases {
            assert_eq!(ServerError::from(error).status_code(), status);
        }
    }

    #[test]
    fn test_timeout_detail() {
        let err = ServerError::Timeout(900);
        assert_eq!(err.status_code(), StatusCode::GATEWAY_TIMEOUT);
        assert_eq!(err.detail(), "Request timed out after 900 seconds");
    }
}
