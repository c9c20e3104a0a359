//! HMAC-SHA256 verification of webhook deliveries.
//!
//! GitHub signs every delivery with the shared secret configured on the
//! webhook and sends the result in the `X-Hub-Signature-256` header as
//! `sha256=<lowercase hex digest>`. Verification recomputes the digest over
//! the raw request body and compares the two hex strings in constant time.
//!
//! Everything here is pure: no I/O, no logging, no state.

use hmac::{Hmac, Mac};
use sha2::Sha256;
use subtle::ConstantTimeEq;

type HmacSha256 = Hmac<Sha256>;

/// Header carrying the delivery signature.
pub const SIGNATURE_HEADER: &str = "x-hub-signature-256";

/// Algorithm prefix required on the signature header value.
pub const SIGNATURE_PREFIX: &str = "sha256=";

/// Reason a signature was rejected.
///
/// Only used for server-side logging; callers always answer the same way
/// regardless of the reason.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SignatureError {
    #[error("signature header is missing")]
    Missing,

    #[error("signature header does not start with '{SIGNATURE_PREFIX}'")]
    UnsupportedAlgorithm,

    #[error("HMAC-SHA256 digest does not match")]
    Mismatch,
}

/// Compute the lowercase hex HMAC-SHA256 of `payload` keyed by `secret`.
pub fn compute_signature(payload: &[u8], secret: &[u8]) -> String {
    // HMAC accepts keys of any length, so construction cannot fail.
    let mut mac = match HmacSha256::new_from_slice(secret) {
        Ok(mac) => mac,
        Err(_) => unreachable!("HMAC-SHA256 accepts keys of any length"),
    };
    mac.update(payload);
    hex::encode(mac.finalize().into_bytes())
}

/// Format a hex digest as a signature header value.
pub fn format_signature_header(hex_digest: &str) -> String {
    format!("{SIGNATURE_PREFIX}{hex_digest}")
}

/// Verify a delivery signature, returning the rejection reason on failure.
///
/// # Errors
///
/// - [`SignatureError::Missing`] when no header value is supplied
/// - [`SignatureError::UnsupportedAlgorithm`] when the value lacks the `sha256=` prefix
/// - [`SignatureError::Mismatch`] when the digest differs from the expected one
pub fn verify_signature(
    raw_body: &[u8],
    signature_header: Option<&str>,
    secret: &[u8],
) -> Result<(), SignatureError> {
    let header = signature_header.ok_or(SignatureError::Missing)?;
    let provided = header
        .strip_prefix(SIGNATURE_PREFIX)
        .ok_or(SignatureError::UnsupportedAlgorithm)?;

    let expected = compute_signature(raw_body, secret);

    // Length is public (always 64 for SHA-256), so the early return leaks nothing.
    if provided.len() != expected.len() {
        return Err(SignatureError::Mismatch);
    }

    if bool::from(provided.as_bytes().ct_eq(expected.as_bytes())) {
        Ok(())
    } else {
        Err(SignatureError::Mismatch)
    }
}

/// Boolean form of [`verify_signature`].
pub fn verify(raw_body: &[u8], signature_header: Option<&str>, secret: &[u8]) -> bool {
    verify_signature(raw_body, signature_header, secret).is_ok()
}

#[cfg(test)]
#[path = "signature_tests.rs"]
mod tests;
