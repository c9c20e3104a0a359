//! # Deploy-Hook Core
//!
//! Core logic for the deploy-hook webhook receiver.
//!
//! This crate contains everything that does not depend on the HTTP transport:
//! - [`signature`]: HMAC-SHA256 verification of GitHub webhook deliveries
//! - [`payload`]: classification of the delivered push payload
//! - [`pipeline`]: the sync → build → deploy stage runner
//!
//! ## Usage
//!
//! ```rust
//! use deploy_hook_core::signature::{compute_signature, format_signature_header, verify};
//!
//! let body = br#"{"ref":"refs/heads/main"}"#;
//! let header = format_signature_header(&compute_signature(body, b"secret"));
//! assert!(verify(body, Some(&header), b"secret"));
//! ```

use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize, Serializer};
use std::fmt;
use zeroize::{Zeroize, ZeroizeOnDrop};

pub mod payload;
pub mod pipeline;
pub mod signature;

pub use payload::{EventKind, ParsedEvent, PayloadRejection};
pub use pipeline::{PipelineResult, PipelineRunner, PipelineStage, ScriptPipeline, StageCommand};
pub use signature::SignatureError;

// ============================================================================
// Time Types
// ============================================================================

/// UTC timestamp rendered as ISO-8601 with a trailing `Z`
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct Timestamp(DateTime<Utc>);

impl Timestamp {
    /// Create timestamp for current moment
    pub fn now() -> Self {
        Self(Utc::now())
    }

    /// Wrap an existing UTC datetime
    pub fn from_datetime(value: DateTime<Utc>) -> Self {
        Self(value)
    }

    /// Get underlying DateTime
    pub fn as_datetime(&self) -> &DateTime<Utc> {
        &self.0
    }

    /// ISO-8601 string with microsecond precision, e.g. `2024-05-01T12:00:00.000000Z`
    pub fn to_iso8601(&self) -> String {
        self.0.to_rfc3339_opts(SecondsFormat::Micros, true)
    }
}

impl fmt::Display for Timestamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_iso8601())
    }
}

impl Serialize for Timestamp {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_iso8601())
    }
}

// ============================================================================
// Secrets
// ============================================================================

/// Shared secret used to key webhook signatures.
///
/// The value is zeroed when dropped and never appears in `Debug` or
/// `Display` output, so configuration structs holding it can be logged.
#[derive(Clone, PartialEq, Eq, Deserialize, Zeroize, ZeroizeOnDrop)]
#[serde(transparent)]
pub struct WebhookSecret(String);

impl WebhookSecret {
    /// Placeholder used when no secret has been configured.
    pub const PLACEHOLDER: &'static str = "change-me-in-production";

    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    /// Raw key bytes for HMAC computation.
    pub fn expose_bytes(&self) -> &[u8] {
        self.0.as_bytes()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// True when the secret is still the shipped placeholder value.
    pub fn is_placeholder(&self) -> bool {
        self.0 == Self::PLACEHOLDER
    }
}

impl Default for WebhookSecret {
    fn default() -> Self {
        Self::new(Self::PLACEHOLDER)
    }
}

impl fmt::Debug for WebhookSecret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("WebhookSecret(<REDACTED>)")
    }
}

impl fmt::Display for WebhookSecret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("<REDACTED>")
    }
}

#[cfg(test)]
#[path = "lib_tests.rs"]
mod tests;
