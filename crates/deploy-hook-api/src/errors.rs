//! Error types for the HTTP service

use crate::responses::ResponseEnvelope;
use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
};
use deploy_hook_core::{PayloadRejection, PipelineStage, SignatureError, Timestamp};
use tracing::{error, warn};

/// Generic message returned for every unexpected failure.
pub const INTERNAL_ERROR_MESSAGE: &str = "Internal server error";

/// Webhook handler errors with HTTP status code mapping
///
/// Every variant renders as a JSON envelope with `status: "error"`:
///
/// - `400 Bad Request`: payload is not JSON or targets another repository/ref
/// - `401 Unauthorized`: signature missing or wrong
/// - `404 Not Found`: unknown path or method
/// - `408 Request Timeout`: body not received in time
/// - `413 Payload Too Large`: body exceeds the configured maximum
/// - `500 Internal Server Error`: a pipeline stage failed, or an unexpected error
///
/// # Security Considerations
///
/// Rejection reasons are logged server-side only; the response carries a
/// fixed message so callers learn nothing about why authentication or
/// validation failed. Internal errors never expose their detail.
#[derive(Debug, thiserror::Error)]
pub enum WebhookHandlerError {
    /// Maps to: `404 Not Found`
    #[error("Endpoint not found")]
    NotFound,

    /// Maps to: `413 Payload Too Large`
    ///
    /// `size` is the declared length when the client sent one.
    #[error("Payload too large: {size:?} bytes (max: {max_size} bytes)")]
    PayloadTooLarge { size: Option<u64>, max_size: usize },

    /// Maps to: `408 Request Timeout`
    #[error("Request body not received within {seconds}s")]
    Timeout { seconds: u64 },

    /// Maps to: `401 Unauthorized`
    #[error("Invalid signature: {0}")]
    InvalidSignature(#[from] SignatureError),

    /// Maps to: `400 Bad Request`
    #[error("Invalid or ignored payload: {0}")]
    InvalidPayload(#[from] PayloadRejection),

    /// Maps to: `500 Internal Server Error`, with the stage message in the body
    #[error("Pipeline failed at {stage}: {message}")]
    PipelineFailed {
        stage: PipelineStage,
        message: String,
    },

    /// Maps to: `500 Internal Server Error` with a generic message
    #[error("Internal server error: {message}")]
    InternalError { message: String },
}

impl WebhookHandlerError {
    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::NotFound => StatusCode::NOT_FOUND,
            Self::PayloadTooLarge { .. } => StatusCode::PAYLOAD_TOO_LARGE,
            Self::Timeout { .. } => StatusCode::REQUEST_TIMEOUT,
            Self::InvalidSignature(_) => StatusCode::UNAUTHORIZED,
            Self::InvalidPayload(_) => StatusCode::BAD_REQUEST,
            Self::PipelineFailed { .. } | Self::InternalError { .. } => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }
}

impl IntoResponse for WebhookHandlerError {
    fn into_response(self) -> Response {
        let status = self.status_code();

        let envelope = match self {
            Self::NotFound => ResponseEnvelope::error("Endpoint not found"),
            Self::PayloadTooLarge { size, max_size } => {
                warn!(payload_size = ?size, max_size, "Payload too large");
                ResponseEnvelope::error("Payload too large")
            }
            Self::Timeout { seconds } => {
                warn!(timeout_seconds = seconds, "Request body read timed out");
                ResponseEnvelope::error("Request timeout")
            }
            Self::InvalidSignature(ref reason) => {
                warn!(reason = %reason, "Invalid GitHub signature");
                ResponseEnvelope::error("Invalid signature")
            }
            Self::InvalidPayload(ref reason) => {
                warn!(reason = %reason, "Rejected webhook payload");
                ResponseEnvelope::error("Invalid or ignored payload")
            }
            Self::PipelineFailed { message, .. } => {
                ResponseEnvelope::error(message).with_timestamp(Timestamp::now())
            }
            Self::InternalError { ref message } => {
                // Log detailed error server-side but return generic message to client
                error!(error = %message, "Internal server error occurred");
                ResponseEnvelope::error(INTERNAL_ERROR_MESSAGE)
            }
        };

        envelope.into_response_with_status(status)
    }
}

/// Service-level errors
#[derive(Debug, thiserror::Error)]
pub enum ServiceError {
    #[error("Failed to bind to address {address}: {message}")]
    BindFailed { address: String, message: String },

    #[error("Server failed: {message}")]
    ServerFailed { message: String },

    #[error("Configuration error: {0}")]
    Configuration(#[from] ConfigError),

    #[error("TLS error: {0}")]
    Tls(#[from] TlsError),

    #[error("Build directory not found: {path}")]
    BuildDirectoryMissing { path: String },
}

impl ServiceError {
    /// Process exit code for this failure.
    pub fn exit_code(&self) -> i32 {
        match self {
            Self::BindFailed { .. } => 1,
            Self::ServerFailed { .. } => 2,
            Self::Configuration(_) => 3,
            Self::Tls(_) => 4,
            Self::BuildDirectoryMissing { .. } => 5,
        }
    }
}

/// Configuration errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Invalid configuration: {message}")]
    Invalid { message: String },

    #[error("Missing required configuration: {key}")]
    Missing { key: String },

    #[error("Configuration loading failed: {0}")]
    Load(#[from] config::ConfigError),
}

/// Certificate provisioning and loading errors
#[derive(Debug, thiserror::Error)]
pub enum TlsError {
    #[error("Failed to access {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Certificate generation failed: {message}")]
    Generation { message: String },

    #[error("Certificate generation timed out after {seconds}s")]
    GenerationTimedOut { seconds: u64 },

    #[error("Invalid certificate material: {message}")]
    Certificate { message: String },

    #[error("TLS configuration rejected: {0}")]
    Rustls(#[from] rustls::Error),
}

#[cfg(test)]
#[path = "errors_tests.rs"]
mod tests;
