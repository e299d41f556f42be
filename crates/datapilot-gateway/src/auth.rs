// crates/datapilot-gateway/src/auth.rs
// ============================================================================
// Module: Gateway Identity Verification
// Description: HMAC-verified identity headers injected by the boundary.
// Purpose: Fail-closed authentication of forwarded identities.
// Dependencies: datapilot-core, hmac, sha2
// ============================================================================

//! ## Overview
//! The boundary gateway authenticates end users and forwards the identity in
//! `X-Animus-*` headers, signed with HMAC-SHA256 over the canonical tuple
//! `subject \n email \n roles \n ts` using the shared internal secret. The
//! core verifies the signature in constant time and rejects timestamps
//! outside a five-minute skew window. Every denial is appended to the audit
//! ledger as an `auth.denied` event so the ledger records attempts.

// ============================================================================
// SECTION: Imports
// ============================================================================

use axum::http::HeaderMap;
use datapilot_core::Clock;
use hmac::Hmac;
use hmac::Mac;
use sha2::Sha256;
use thiserror::Error;

// ============================================================================
// SECTION: Constants
// ============================================================================

/// Subject identity header.
pub const SUBJECT_HEADER: &str = "x-animus-subject";
/// Email identity header.
pub const EMAIL_HEADER: &str = "x-animus-email";
/// Roles identity header (comma-separated).
pub const ROLES_HEADER: &str = "x-animus-roles";
/// Signature timestamp header (unix seconds).
pub const AUTH_TS_HEADER: &str = "x-animus-auth-ts";
/// Signature header (lowercase hex HMAC-SHA256).
pub const AUTH_SIG_HEADER: &str = "x-animus-auth-sig";

/// Maximum accepted clock skew in seconds.
pub const MAX_SKEW_SECONDS: i64 = 300;

/// HMAC-SHA256 alias.
type HmacSha256 = Hmac<Sha256>;

// ============================================================================
// SECTION: Identity
// ============================================================================

/// Verified caller identity.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Identity {
    /// Stable subject identifier.
    pub subject: String,
    /// Email address.
    pub email: String,
    /// Role labels.
    pub roles: Vec<String>,
}

/// Identity verification errors.
///
/// # Invariants
/// - Messages never echo the presented signature.
#[derive(Debug, Error)]
pub enum AuthError {
    /// A required identity header is missing or not valid UTF-8.
    #[error("unauthenticated: missing identity header {0}")]
    MissingHeader(&'static str),
    /// The signature timestamp is unparsable.
    #[error("unauthenticated: invalid auth timestamp")]
    InvalidTimestamp,
    /// The signature timestamp is outside the skew window.
    #[error("unauthenticated: auth timestamp outside skew window")]
    SkewExceeded,
    /// The signature does not match the canonical tuple.
    #[error("unauthenticated: signature mismatch")]
    SignatureMismatch,
}

// ============================================================================
// SECTION: Verifier
// ============================================================================

/// Identity-header verifier bound to the internal secret.
#[derive(Clone)]
pub struct IdentityVerifier {
    /// Shared internal secret.
    secret: Vec<u8>,
}

impl IdentityVerifier {
    /// Creates a verifier over the internal secret.
    #[must_use]
    pub fn new(secret: impl Into<Vec<u8>>) -> Self {
        Self {
            secret: secret.into(),
        }
    }

    /// Verifies the identity headers against the canonical signed tuple.
    ///
    /// # Errors
    ///
    /// Returns [`AuthError`] on missing headers, skew violations, or a
    /// signature mismatch. Verification is fail-closed.
    pub fn verify(&self, headers: &HeaderMap, clock: &dyn Clock) -> Result<Identity, AuthError> {
        let subject = header_string(headers, SUBJECT_HEADER)?;
        let email = header_string(headers, EMAIL_HEADER)?;
        let roles_raw = header_string(headers, ROLES_HEADER)?;
        let ts_raw = header_string(headers, AUTH_TS_HEADER)?;
        let signature = header_string(headers, AUTH_SIG_HEADER)?;

        let ts: i64 = ts_raw.parse().map_err(|_| AuthError::InvalidTimestamp)?;
        let now_seconds = clock.now().as_unix_millis() / 1_000;
        if (now_seconds - ts).abs() > MAX_SKEW_SECONDS {
            return Err(AuthError::SkewExceeded);
        }

        let tuple = canonical_tuple(&subject, &email, &roles_raw, &ts_raw);
        let mut mac = HmacSha256::new_from_slice(&self.secret)
            .map_err(|_| AuthError::SignatureMismatch)?;
        mac.update(tuple.as_bytes());
        let expected = decode_hex(&signature).ok_or(AuthError::SignatureMismatch)?;
        mac.verify_slice(&expected).map_err(|_| AuthError::SignatureMismatch)?;

        let roles = roles_raw
            .split(',')
            .map(str::trim)
            .filter(|role| !role.is_empty())
            .map(ToString::to_string)
            .collect();
        Ok(Identity {
            subject,
            email,
            roles,
        })
    }

    /// Signs the canonical tuple; used by tests and trusted boundary shims.
    #[must_use]
    pub fn sign(&self, subject: &str, email: &str, roles: &str, ts: i64) -> String {
        let tuple = canonical_tuple(subject, email, roles, &ts.to_string());
        let Ok(mut mac) = HmacSha256::new_from_slice(&self.secret) else {
            return String::new();
        };
        mac.update(tuple.as_bytes());
        let digest = mac.finalize().into_bytes();
        let mut out = String::with_capacity(digest.len() * 2);
        for byte in digest {
            out.push_str(&format!("{byte:02x}"));
        }
        out
    }
}

// ============================================================================
// SECTION: Helpers
// ============================================================================

/// Builds the canonical signed tuple.
fn canonical_tuple(subject: &str, email: &str, roles: &str, ts: &str) -> String {
    format!("{subject}\n{email}\n{roles}\n{ts}")
}

/// Extracts a required header as a string.
fn header_string(headers: &HeaderMap, name: &'static str) -> Result<String, AuthError> {
    headers
        .get(name)
        .and_then(|value| value.to_str().ok())
        .filter(|value| !value.is_empty())
        .map(ToString::to_string)
        .ok_or(AuthError::MissingHeader(name))
}

/// Decodes a lowercase hex string.
fn decode_hex(input: &str) -> Option<Vec<u8>> {
    if input.len() % 2 != 0 {
        return None;
    }
    let mut out = Vec::with_capacity(input.len() / 2);
    let bytes = input.as_bytes();
    for pair in bytes.chunks(2) {
        let high = hex_nibble(pair[0])?;
        let low = hex_nibble(pair[1])?;
        out.push((high << 4) | low);
    }
    Some(out)
}

/// Decodes one hex nibble.
const fn hex_nibble(byte: u8) -> Option<u8> {
    match byte {
        b'0' ..= b'9' => Some(byte - b'0'),
        b'a' ..= b'f' => Some(byte - b'a' + 10),
        _ => None,
    }
}

// ============================================================================
// SECTION: Tests
// ============================================================================

#[cfg(test)]
mod tests {
    #![allow(
        clippy::panic,
        clippy::unwrap_used,
        clippy::expect_used,
        reason = "Test-only assertions are permitted."
    )]

    use axum::http::HeaderMap;
    use axum::http::HeaderValue;
    use datapilot_core::FixedClock;
    use datapilot_core::Timestamp;

    use super::AUTH_SIG_HEADER;
    use super::AUTH_TS_HEADER;
    use super::AuthError;
    use super::EMAIL_HEADER;
    use super::IdentityVerifier;
    use super::ROLES_HEADER;
    use super::SUBJECT_HEADER;

    /// Fixture instant: 2026-03-01T12:00:00Z.
    fn clock() -> FixedClock {
        FixedClock::new(Timestamp::parse_rfc3339("2026-03-01T12:00:00Z").expect("timestamp"))
    }

    /// Unix seconds of the fixture instant.
    const NOW_SECONDS: i64 = 1_772_366_400;

    /// Builds a signed header set.
    fn signed_headers(verifier: &IdentityVerifier, ts: i64) -> HeaderMap {
        let signature = verifier.sign("user-1", "user@animus.local", "admin,auditor", ts);
        let mut headers = HeaderMap::new();
        headers.insert(SUBJECT_HEADER, HeaderValue::from_static("user-1"));
        headers.insert(EMAIL_HEADER, HeaderValue::from_static("user@animus.local"));
        headers.insert(ROLES_HEADER, HeaderValue::from_static("admin,auditor"));
        headers
            .insert(AUTH_TS_HEADER, HeaderValue::from_str(&ts.to_string()).expect("ts header"));
        headers.insert(AUTH_SIG_HEADER, HeaderValue::from_str(&signature).expect("sig header"));
        headers
    }

    #[test]
    fn valid_signature_verifies() {
        let verifier = IdentityVerifier::new(b"0123456789abcdef".to_vec());
        let headers = signed_headers(&verifier, NOW_SECONDS);
        let identity = verifier.verify(&headers, &clock()).expect("verify");
        assert_eq!(identity.subject, "user-1");
        assert_eq!(identity.roles, vec!["admin".to_string(), "auditor".to_string()]);
    }

    #[test]
    fn tampered_subject_is_rejected() {
        let verifier = IdentityVerifier::new(b"0123456789abcdef".to_vec());
        let mut headers = signed_headers(&verifier, NOW_SECONDS);
        headers.insert(SUBJECT_HEADER, HeaderValue::from_static("intruder"));
        let err = verifier.verify(&headers, &clock()).expect_err("tamper");
        assert!(matches!(err, AuthError::SignatureMismatch));
    }

    #[test]
    fn wrong_secret_is_rejected() {
        let signer = IdentityVerifier::new(b"0123456789abcdef".to_vec());
        let verifier = IdentityVerifier::new(b"fedcba9876543210".to_vec());
        let headers = signed_headers(&signer, NOW_SECONDS);
        let err = verifier.verify(&headers, &clock()).expect_err("wrong secret");
        assert!(matches!(err, AuthError::SignatureMismatch));
    }

    #[test]
    fn skew_outside_window_is_rejected() {
        let verifier = IdentityVerifier::new(b"0123456789abcdef".to_vec());
        let headers = signed_headers(&verifier, NOW_SECONDS - 301);
        let err = verifier.verify(&headers, &clock()).expect_err("stale");
        assert!(matches!(err, AuthError::SkewExceeded));

        let headers = signed_headers(&verifier, NOW_SECONDS - 299);
        assert!(verifier.verify(&headers, &clock()).is_ok(), "inside window verifies");
    }

    #[test]
    fn missing_headers_are_rejected() {
        let verifier = IdentityVerifier::new(b"0123456789abcdef".to_vec());
        let mut headers = signed_headers(&verifier, NOW_SECONDS);
        headers.remove(ROLES_HEADER);
        let err = verifier.verify(&headers, &clock()).expect_err("missing role header");
        assert!(matches!(err, AuthError::MissingHeader(_)));
    }
}
