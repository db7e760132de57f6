//! NIP-98 request authentication.
//!
//! # Verification Order
//!
//! Checks short-circuit on the first failure, always in this order, so the
//! reported error is deterministic for a given token:
//!
//! ```text
//! kind → timestamp skew → "u" tag → "method" tag → id recomputation → signature
//! ```
//!
//! # Optional Authentication
//!
//! An absent or empty `Authorization` header is not an error: the caller is
//! anonymous and the pipeline keys its quota by client address instead.
//!
//! # Error Classes
//!
//! | Error | Code |
//! |-------|------|
//! | `InvalidScheme`, `InvalidEncoding`, `MalformedToken` | `INVALID_AUTH` |
//! | everything else | `AUTH_FAILED` |

mod token;

use std::fmt;
use std::time::Duration;

use chrono::{DateTime, Utc};
use secp256k1::{Secp256k1, VerifyOnly, XOnlyPublicKey, schnorr};
use subtle::ConstantTimeEq;
use thiserror::Error;
use tracing::debug;

use crate::error::ErrorCode;

pub use token::{AUTH_SCHEME, AuthToken, HTTP_AUTH_KIND, METHOD_TAG, URL_TAG};

/// Default tolerance between `created_at` and the verification clock.
pub const DEFAULT_MAX_CLOCK_SKEW: Duration = Duration::from_secs(60);

/// Hex-encoded token field, for [`VerificationError::MalformedHex`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HexField {
    Id,
    Pubkey,
    Sig,
}

impl fmt::Display for HexField {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            HexField::Id => "id",
            HexField::Pubkey => "pubkey",
            HexField::Sig => "sig",
        })
    }
}

/// Why a token was refused.
///
/// Display strings are safe to return to clients: they name the failed check
/// and only echo values the client itself sent.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum VerificationError {
    #[error("invalid auth scheme")]
    InvalidScheme,

    #[error("invalid base64")]
    InvalidEncoding,

    #[error("invalid event JSON")]
    MalformedToken(String),

    #[error("invalid kind: expected {expected}, got {actual}")]
    InvalidKind { expected: i64, actual: i64 },

    #[error("event too old or too new")]
    TimestampSkew { created_at: i64, now: i64 },

    #[error("URL mismatch")]
    UrlMismatch {
        expected: String,
        actual: Option<String>,
    },

    #[error("method mismatch: expected {expected}, got {}", .actual.as_deref().unwrap_or("none"))]
    MethodMismatch {
        expected: String,
        actual: Option<String>,
    },

    #[error("invalid event ID")]
    IdMismatch,

    #[error("invalid signature")]
    BadSignature,

    #[error("malformed hex in {field}")]
    MalformedHex { field: HexField },
}

impl VerificationError {
    /// Response code for this failure.
    pub fn code(&self) -> ErrorCode {
        match self {
            VerificationError::InvalidScheme
            | VerificationError::InvalidEncoding
            | VerificationError::MalformedToken(_) => ErrorCode::InvalidAuth,
            VerificationError::InvalidKind { .. }
            | VerificationError::TimestampSkew { .. }
            | VerificationError::UrlMismatch { .. }
            | VerificationError::MethodMismatch { .. }
            | VerificationError::IdMismatch
            | VerificationError::BadSignature
            | VerificationError::MalformedHex { .. } => ErrorCode::AuthFailed,
        }
    }

    /// Short, bounded label for metrics.
    pub fn reason(&self) -> &'static str {
        match self {
            VerificationError::InvalidScheme => "invalid_scheme",
            VerificationError::InvalidEncoding => "invalid_encoding",
            VerificationError::MalformedToken(_) => "malformed_token",
            VerificationError::InvalidKind { .. } => "invalid_kind",
            VerificationError::TimestampSkew { .. } => "timestamp_skew",
            VerificationError::UrlMismatch { .. } => "url_mismatch",
            VerificationError::MethodMismatch { .. } => "method_mismatch",
            VerificationError::IdMismatch => "id_mismatch",
            VerificationError::BadSignature => "bad_signature",
            VerificationError::MalformedHex { .. } => "malformed_hex",
        }
    }
}

/// Stateless NIP-98 verifier.
///
/// Holds only immutable configuration and a verification-only secp256k1
/// context, so one instance is shared by every request.
#[derive(Clone)]
pub struct AuthVerifier {
    max_skew: Duration,
    secp: Secp256k1<VerifyOnly>,
}

impl fmt::Debug for AuthVerifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AuthVerifier")
            .field("max_skew", &self.max_skew)
            .finish_non_exhaustive()
    }
}

impl Default for AuthVerifier {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_CLOCK_SKEW)
    }
}

impl AuthVerifier {
    /// Create a verifier accepting tokens up to `max_skew` away from now.
    pub fn new(max_skew: Duration) -> Self {
        Self {
            max_skew,
            secp: Secp256k1::verification_only(),
        }
    }

    /// Verify a raw `Authorization` header value for a request.
    ///
    /// Returns `Ok(None)` when no header was sent (anonymous caller) and
    /// `Ok(Some(pubkey))` for a valid token.
    ///
    /// # Errors
    ///
    /// Any decoding or verification failure, see [`VerificationError`].
    pub fn verify(
        &self,
        raw_header: Option<&str>,
        expected_url: &str,
        expected_method: &str,
        now: DateTime<Utc>,
    ) -> Result<Option<String>, VerificationError> {
        let raw = match raw_header {
            Some(value) if !value.is_empty() => value,
            _ => return Ok(None),
        };

        let token = AuthToken::from_header(raw)?;
        self.verify_token(&token, expected_url, expected_method, now)?;

        debug!(pubkey = %token.pubkey, "NIP-98 token verified");
        Ok(Some(token.pubkey))
    }

    /// Run every protocol check against an already decoded token.
    ///
    /// # Errors
    ///
    /// The first failing check, in the order documented at module level.
    pub fn verify_token(
        &self,
        token: &AuthToken,
        expected_url: &str,
        expected_method: &str,
        now: DateTime<Utc>,
    ) -> Result<(), VerificationError> {
        if token.kind != HTTP_AUTH_KIND {
            return Err(VerificationError::InvalidKind {
                expected: HTTP_AUTH_KIND,
                actual: token.kind,
            });
        }

        let now_secs = now.timestamp();
        if token.created_at.abs_diff(now_secs) > self.max_skew.as_secs() {
            return Err(VerificationError::TimestampSkew {
                created_at: token.created_at,
                now: now_secs,
            });
        }

        let url = token.tag_value(URL_TAG);
        if url != Some(expected_url) {
            return Err(VerificationError::UrlMismatch {
                expected: expected_url.to_string(),
                actual: url.map(str::to_string),
            });
        }

        let method = token.tag_value(METHOD_TAG);
        if method != Some(expected_method) {
            return Err(VerificationError::MethodMismatch {
                expected: expected_method.to_string(),
                actual: method.map(str::to_string),
            });
        }

        let id_bytes: [u8; 32] = decode_hex(&token.id, HexField::Id)?;
        let computed = token
            .compute_id()
            .map_err(|e| VerificationError::MalformedToken(e.to_string()))?;
        if !bool::from(computed.as_bytes().ct_eq(token.id.as_bytes())) {
            return Err(VerificationError::IdMismatch);
        }

        let pubkey_bytes: [u8; 32] = decode_hex(&token.pubkey, HexField::Pubkey)?;
        let sig_bytes: [u8; 64] = decode_hex(&token.sig, HexField::Sig)?;

        // A 32-byte value off the curve is a well-formed field that fails to verify.
        let pubkey = XOnlyPublicKey::from_slice(&pubkey_bytes)
            .map_err(|_| VerificationError::BadSignature)?;
        let sig = schnorr::Signature::from_slice(&sig_bytes)
            .map_err(|_| VerificationError::BadSignature)?;

        self.secp
            .verify_schnorr(&sig, &id_bytes, &pubkey)
            .map_err(|_| VerificationError::BadSignature)
    }
}

/// Decode a fixed-width hex field.
fn decode_hex<const N: usize>(value: &str, field: HexField) -> Result<[u8; N], VerificationError> {
    let mut out = [0u8; N];
    hex::decode_to_slice(value, &mut out).map_err(|_| VerificationError::MalformedHex { field })?;
    Ok(out)
}
