//! Common error types for the image gateway

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use thiserror::Error;

use crate::classify::ErrorKind;

/// Application-wide error type
#[derive(Error, Debug)]
pub enum AppError {
    #[error("Configuration error: {0}")]
    Config(#[from] config::ConfigError),

    #[error("JSON serialization error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("HTTP client error: {0}")]
    HttpClient(#[from] reqwest::Error),

    #[error("Provider not found: {0}")]
    ProviderNotFound(String),

    #[error("No available credential for provider: {0}")]
    NoAvailableCredential(String),

    #[error("Authentication failed: {0}")]
    AuthenticationFailed(String),

    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    #[error("{message}")]
    Upstream {
        kind: ErrorKind,
        provider: Option<String>,
        message: String,
        /// Raw upstream HTTP status, kept for credential health reporting
        status: Option<u16>,
    },

    #[error("Timeout: {0}")]
    Timeout(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl AppError {
    /// The canonical classification of this error, used by the retry loop.
    pub fn kind(&self) -> ErrorKind {
        match self {
            AppError::Upstream { kind, .. } => *kind,
            AppError::Timeout(_) => ErrorKind::Timeout,
            AppError::NoAvailableCredential(_) => ErrorKind::NoAvailableKey,
            AppError::InvalidRequest(_) | AppError::Json(_) => ErrorKind::BadRequest,
            AppError::Config(_) | AppError::Internal(_) => ErrorKind::InternalError,
            AppError::HttpClient(_) => ErrorKind::Unknown,
            AppError::ProviderNotFound(_) | AppError::AuthenticationFailed(_) => {
                ErrorKind::BadRequest
            }
        }
    }
}

/// Error response format (OpenAI compatible)
#[derive(Serialize)]
pub struct ErrorResponse {
    pub error: ErrorDetail,
}

#[derive(Serialize)]
pub struct ErrorDetail {
    pub message: String,
    pub r#type: String,
    pub code: Option<String>,
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, error_type, code) = match &self {
            AppError::Config(_) => (StatusCode::INTERNAL_SERVER_ERROR, "server_error", None),
            AppError::Json(_) => (StatusCode::BAD_REQUEST, "invalid_request_error", Some("invalid_json")),
            AppError::HttpClient(_) => (StatusCode::BAD_GATEWAY, "upstream_error", None),
            AppError::ProviderNotFound(_) => (StatusCode::NOT_FOUND, "not_found_error", Some("provider_not_found")),
            AppError::NoAvailableCredential(_) => (StatusCode::SERVICE_UNAVAILABLE, "server_error", Some("no_available_key")),
            AppError::AuthenticationFailed(_) => (StatusCode::UNAUTHORIZED, "authentication_error", Some("invalid_api_key")),
            AppError::InvalidRequest(_) => (StatusCode::BAD_REQUEST, "invalid_request_error", None),
            AppError::Upstream { kind, .. } => match kind {
                ErrorKind::ModerationBlocked => (StatusCode::BAD_REQUEST, "invalid_request_error", Some("moderation_blocked")),
                ErrorKind::BadRequest => (StatusCode::BAD_REQUEST, "invalid_request_error", None),
                ErrorKind::RateLimit => (StatusCode::TOO_MANY_REQUESTS, "rate_limit_error", Some("rate_limit_exceeded")),
                ErrorKind::NoAvailableKey => (StatusCode::SERVICE_UNAVAILABLE, "server_error", Some("no_available_key")),
                ErrorKind::Timeout => (StatusCode::GATEWAY_TIMEOUT, "timeout_error", None),
                ErrorKind::InternalError | ErrorKind::Unknown => (StatusCode::BAD_GATEWAY, "upstream_error", None),
            },
            AppError::Timeout(_) => (StatusCode::GATEWAY_TIMEOUT, "timeout_error", None),
            AppError::Internal(_) => (StatusCode::INTERNAL_SERVER_ERROR, "server_error", None),
        };

        let body = Json(ErrorResponse {
            error: ErrorDetail {
                message: self.to_string(),
                r#type: error_type.to_string(),
                code: code.map(|c| c.to_string()),
            },
        });

        (status, body).into_response()
    }
}

/// Result type alias for convenience
pub type Result<T> = std::result::Result<T, AppError>;
