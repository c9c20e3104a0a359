//! Classification of delivered webhook payloads.
//!
//! A delivery is accepted only when it targets exactly the configured
//! repository and branch ref. Matching is plain string equality; there is no
//! globbing and no case folding.

use serde::Deserialize;
use std::fmt;

/// Header naming the kind of event being delivered.
pub const EVENT_HEADER: &str = "x-github-event";

/// The subset of a push payload this service cares about.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct ParsedEvent {
    /// Full ref that was pushed, e.g. `refs/heads/main`
    #[serde(rename = "ref", default)]
    pub git_ref: Option<String>,

    #[serde(default)]
    pub repository: Option<RepositoryRef>,
}

/// Repository identity inside a payload.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct RepositoryRef {
    /// `owner/name`
    #[serde(default)]
    pub full_name: Option<String>,
}

impl ParsedEvent {
    /// Decode a raw request body.
    ///
    /// # Errors
    ///
    /// Returns [`PayloadRejection::Malformed`] if the body is not a JSON object
    /// or its `ref` / `repository` fields have the wrong JSON type.
    pub fn from_slice(raw: &[u8]) -> Result<Self, PayloadRejection> {
        let value: serde_json::Value =
            serde_json::from_slice(raw).map_err(|e| PayloadRejection::Malformed {
                message: e.to_string(),
            })?;

        if !value.is_object() {
            return Err(PayloadRejection::Malformed {
                message: "payload is not a JSON object".to_string(),
            });
        }

        Self::deserialize(value).map_err(|e| PayloadRejection::Malformed {
            message: e.to_string(),
        })
    }

    pub fn repository_full_name(&self) -> Option<&str> {
        self.repository.as_ref()?.full_name.as_deref()
    }
}

/// Why a payload was not accepted. Used for logging only.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PayloadRejection {
    #[error("invalid JSON payload: {message}")]
    Malformed { message: String },

    #[error("ignoring push to ref {actual:?}")]
    UnexpectedRef { actual: Option<String> },

    #[error("unexpected repository {actual:?}")]
    UnexpectedRepository { actual: Option<String> },
}

/// Check an already-parsed event against the expected repository and ref.
///
/// # Errors
///
/// Returns the first mismatch found; the ref is checked before the repository.
pub fn check(
    parsed: &ParsedEvent,
    expected_repo: &str,
    expected_ref: &str,
) -> Result<(), PayloadRejection> {
    if parsed.git_ref.as_deref() != Some(expected_ref) {
        return Err(PayloadRejection::UnexpectedRef {
            actual: parsed.git_ref.clone(),
        });
    }

    if parsed.repository_full_name() != Some(expected_repo) {
        return Err(PayloadRejection::UnexpectedRepository {
            actual: parsed.repository_full_name().map(str::to_string),
        });
    }

    Ok(())
}

/// Boolean form of [`check`].
pub fn validate(parsed: &ParsedEvent, expected_repo: &str, expected_ref: &str) -> bool {
    check(parsed, expected_repo, expected_ref).is_ok()
}

/// Decode and check a raw body in one step.
///
/// # Errors
///
/// See [`ParsedEvent::from_slice`] and [`check`].
pub fn parse_and_validate(
    raw: &[u8],
    expected_repo: &str,
    expected_ref: &str,
) -> Result<ParsedEvent, PayloadRejection> {
    let parsed = ParsedEvent::from_slice(raw)?;
    check(&parsed, expected_repo, expected_ref)?;
    Ok(parsed)
}

// ============================================================================
// Event kinds
// ============================================================================

/// Value of the event-type header.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EventKind {
    /// Code was pushed; triggers the pipeline
    Push,

    /// Sent by GitHub when the webhook is created; proves reachability
    Ping,

    /// Anything else, including a missing header
    Other(String),
}

impl EventKind {
    /// Classify a header value. A missing header is `Other("")`.
    pub fn from_header(value: Option<&str>) -> Self {
        match value {
            Some("push") => Self::Push,
            Some("ping") => Self::Ping,
            Some(other) => Self::Other(other.to_string()),
            None => Self::Other(String::new()),
        }
    }

    pub fn as_str(&self) -> &str {
        match self {
            Self::Push => "push",
            Self::Ping => "ping",
            Self::Other(name) => name,
        }
    }
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
#[path = "payload_tests.rs"]
mod tests;
