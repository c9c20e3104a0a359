//! JSON response envelope shared by every endpoint.

use axum::{
    body::Body,
    http::{header, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
};
use deploy_hook_core::Timestamp;
use serde::Serialize;
use tracing::error;

/// Body used if serializing an envelope ever fails.
const FALLBACK_BODY: &str = r#"{"status":"error","message":"Internal server error"}"#;

/// Value of the envelope `status` field
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ResponseStatus {
    Success,
    Error,
    Ignored,
    Healthy,
}

/// Body of every response
///
/// Optional fields are omitted from the JSON entirely when unset.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ResponseEnvelope {
    pub status: ResponseStatus,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<Timestamp>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
}

impl ResponseEnvelope {
    fn with_message(status: ResponseStatus, message: impl Into<String>) -> Self {
        Self {
            status,
            message: Some(message.into()),
            timestamp: None,
            version: None,
        }
    }

    pub fn success(message: impl Into<String>) -> Self {
        Self::with_message(ResponseStatus::Success, message)
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self::with_message(ResponseStatus::Error, message)
    }

    pub fn ignored(message: impl Into<String>) -> Self {
        Self::with_message(ResponseStatus::Ignored, message)
    }

    /// Health report stamped with the current time.
    pub fn healthy(version: impl Into<String>) -> Self {
        Self {
            status: ResponseStatus::Healthy,
            message: None,
            timestamp: Some(Timestamp::now()),
            version: Some(version.into()),
        }
    }

    pub fn with_timestamp(mut self, timestamp: Timestamp) -> Self {
        self.timestamp = Some(timestamp);
        self
    }

    /// Serialize once and build a response with explicit content headers.
    pub fn into_response_with_status(self, status: StatusCode) -> Response {
        let body = match serde_json::to_vec(&self) {
            Ok(body) => body,
            Err(e) => {
                error!(error = %e, "Failed to serialize response envelope");
                return json_response(
                    StatusCode::INTERNAL_SERVER_ERROR,
                    FALLBACK_BODY.as_bytes().to_vec(),
                );
            }
        };
        json_response(status, body)
    }
}

impl IntoResponse for ResponseEnvelope {
    fn into_response(self) -> Response {
        self.into_response_with_status(StatusCode::OK)
    }
}

fn json_response(status: StatusCode, body: Vec<u8>) -> Response {
    let length = body.len();
    let mut response = Response::new(Body::from(body));
    *response.status_mut() = status;

    let headers = response.headers_mut();
    headers.insert(
        header::CONTENT_TYPE,
        HeaderValue::from_static("application/json"),
    );
    headers.insert(header::CONTENT_LENGTH, HeaderValue::from(length));
    response
}

#[cfg(test)]
#[path = "responses_tests.rs"]
mod tests;
