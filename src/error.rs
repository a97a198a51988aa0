//! Common error types for the generation relay

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use thiserror::Error;

/// Prompt rejected before any network call
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SanitationError {
    #[error("Prompt contains non-latin characters")]
    LatinOnly,

    #[error("Prompt has {count} words, maximum is {max}")]
    TooManyWords { count: usize, max: usize },
}

impl SanitationError {
    pub fn key(&self) -> &'static str {
        match self {
            SanitationError::LatinOnly => "latin-only",
            SanitationError::TooManyWords { .. } => "too-many-words",
        }
    }
}

/// Request options rejected during parameter resolution
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ValidationError {
    #[error("Invalid resolution: {0}")]
    InvalidResolution(String),

    #[error("Resolution {width}x{height} exceeds the maximum of {max}")]
    ResolutionTooLarge { width: u32, height: u32, max: u32 },

    #[error("Invalid step count: {0}")]
    InvalidSteps(i64),

    #[error("Option '{0}' requires elevated permission")]
    UnpermittedOverride(&'static str),

    #[error("Option '{field}' out of range: {value}")]
    OutOfRange { field: &'static str, value: f64 },

    #[error("An image is required")]
    ExpectImage,

    #[error("A prompt is required")]
    ExpectPrompt,

    #[error("Image size {width}x{height} is not supported for enhancement")]
    InvalidImageSize { width: u32, height: u32 },

    #[error("Unreadable source image: {0}")]
    UnreadableImage(String),

    #[error("Unknown model: {0}")]
    UnknownModel(String),

    #[error("Feature disabled: {0}")]
    FeatureDisabled(&'static str),

    #[error("Unknown upscaler: {0}")]
    InvalidUpscaler(String),
}

impl ValidationError {
    pub fn key(&self) -> &'static str {
        match self {
            ValidationError::InvalidResolution(_) => "invalid-resolution",
            ValidationError::ResolutionTooLarge { .. } => "invalid-resolution",
            ValidationError::InvalidSteps(_) => "invalid-steps",
            ValidationError::UnpermittedOverride(_) => "unpermitted-override",
            ValidationError::OutOfRange { .. } => "invalid-option",
            ValidationError::ExpectImage => "expect-image",
            ValidationError::ExpectPrompt => "expect-prompt",
            ValidationError::InvalidImageSize { .. } => "invalid-size",
            ValidationError::UnreadableImage(_) => "download-error",
            ValidationError::UnknownModel(_) => "invalid-option",
            ValidationError::FeatureDisabled(_) => "feature-disabled",
            ValidationError::InvalidUpscaler(_) => "invalid-upscaler",
        }
    }
}

/// Terminal outcome of a failed HTTP exchange
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TransportFailure {
    #[error("Backend rejected the credentials (status {0})")]
    Unauthorized(u16),

    #[error("Backend responded with status {0}")]
    Status(u16),

    #[error("Request timed out")]
    Timeout,

    #[error("Request failed: {0}")]
    Network(String),
}

impl TransportFailure {
    pub fn key(&self) -> &'static str {
        match self {
            TransportFailure::Unauthorized(_) => "unauthorized",
            TransportFailure::Status(_) => "response-error",
            TransportFailure::Timeout => "request-timeout",
            TransportFailure::Network(_) => "request-failed",
        }
    }
}

/// Application-wide error type
#[derive(Error, Debug)]
pub enum AppError {
    #[error("Configuration error: {0}")]
    Config(#[from] config::ConfigError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON serialization error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("HTTP client error: {0}")]
    HttpClient(#[from] reqwest::Error),

    #[error(transparent)]
    Sanitation(#[from] SanitationError),

    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error("Too many concurrent jobs ({queue_depth} in flight)")]
    AdmissionRejected { queue_depth: usize },

    #[error(transparent)]
    Transport(#[from] TransportFailure),

    #[error("Backend returned no image")]
    EmptyResponse,

    #[error("Backend error: {0}")]
    Backend(String),

    #[error("Credential error: {0}")]
    Credential(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl AppError {
    /// User-facing text key for localized rendering by the caller
    pub fn key(&self) -> &'static str {
        match self {
            AppError::Sanitation(e) => e.key(),
            AppError::Validation(e) => e.key(),
            AppError::AdmissionRejected { .. } => "concurrent-jobs",
            AppError::Transport(e) => e.key(),
            AppError::EmptyResponse => "empty-response",
            _ => "unknown-error",
        }
    }

    /// Whether the error was raised before anything reached the backend
    pub fn is_rejection(&self) -> bool {
        matches!(
            self,
            AppError::Sanitation(_) | AppError::Validation(_) | AppError::AdmissionRejected { .. }
        )
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
        let (status, error_type) = match &self {
            AppError::Config(_) | AppError::Io(_) | AppError::Internal(_) => {
                (StatusCode::INTERNAL_SERVER_ERROR, "server_error")
            }
            AppError::Json(_) => (StatusCode::BAD_REQUEST, "invalid_request_error"),
            AppError::Sanitation(_) | AppError::Validation(_) => {
                (StatusCode::UNPROCESSABLE_ENTITY, "invalid_request_error")
            }
            AppError::AdmissionRejected { .. } => (StatusCode::TOO_MANY_REQUESTS, "rate_limit_error"),
            AppError::Transport(TransportFailure::Timeout) => (StatusCode::GATEWAY_TIMEOUT, "timeout_error"),
            AppError::Transport(TransportFailure::Unauthorized(_)) | AppError::Credential(_) => {
                (StatusCode::BAD_GATEWAY, "authentication_error")
            }
            AppError::HttpClient(_)
            | AppError::Transport(_)
            | AppError::EmptyResponse
            | AppError::Backend(_) => (StatusCode::BAD_GATEWAY, "backend_error"),
        };

        let body = Json(ErrorResponse {
            error: ErrorDetail {
                message: self.to_string(),
                r#type: error_type.to_string(),
                code: Some(self.key().to_string()),
            },
        });

        (status, body).into_response()
    }
}

/// Result type alias for convenience
pub type Result<T> = std::result::Result<T, AppError>;
