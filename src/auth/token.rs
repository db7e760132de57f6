//! NIP-98 HTTP auth token: header decoding and canonical serialization.
//!
//! The header carries a base64-encoded Nostr event:
//!
//! ```text
//! Authorization: Nostr eyJpZCI6IjFh...
//! ```
//!
//! The event id is the SHA-256 of the compact JSON array
//! `[0, pubkey, created_at, kind, tags, content]`.

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use super::VerificationError;

/// Scheme prefix of the `Authorization` header value, including the separator.
pub const AUTH_SCHEME: &str = "Nostr ";

/// Event kind reserved for HTTP auth.
pub const HTTP_AUTH_KIND: i64 = 27235;

/// Tag carrying the absolute request URL.
pub const URL_TAG: &str = "u";

/// Tag carrying the HTTP method.
pub const METHOD_TAG: &str = "method";

/// A signed, URL- and method-bound assertion of identity.
///
/// Lives for exactly one request; nothing about it is cached.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuthToken {
    pub id: String,
    pub pubkey: String,
    pub created_at: i64,
    pub kind: i64,
    #[serde(default)]
    pub tags: Vec<Vec<String>>,
    #[serde(default)]
    pub content: String,
    pub sig: String,
}

impl AuthToken {
    /// Decode a token from a raw `Authorization` header value.
    ///
    /// # Errors
    ///
    /// - [`VerificationError::InvalidScheme`] without the `Nostr ` prefix
    /// - [`VerificationError::InvalidEncoding`] if the rest is not standard base64
    /// - [`VerificationError::MalformedToken`] if the bytes are not a token object
    pub fn from_header(value: &str) -> Result<Self, VerificationError> {
        let encoded = value
            .strip_prefix(AUTH_SCHEME)
            .ok_or(VerificationError::InvalidScheme)?;

        let json = STANDARD
            .decode(encoded.trim())
            .map_err(|_| VerificationError::InvalidEncoding)?;

        serde_json::from_slice(&json).map_err(|e| VerificationError::MalformedToken(e.to_string()))
    }

    /// First value of the first tag named `name` that carries a value.
    pub fn tag_value(&self, name: &str) -> Option<&str> {
        self.tags
            .iter()
            .find(|tag| tag.len() >= 2 && tag.first().is_some_and(|n| n == name))
            .and_then(|tag| tag.get(1))
            .map(String::as_str)
    }

    /// Compact JSON of `[0, pubkey, created_at, kind, tags, content]`.
    pub fn canonical_bytes(&self) -> Result<Vec<u8>, serde_json::Error> {
        serde_json::to_vec(&(
            0u8,
            &self.pubkey,
            self.created_at,
            self.kind,
            &self.tags,
            &self.content,
        ))
    }

    /// Lowercase hex SHA-256 of the canonical serialization.
    pub fn compute_id(&self) -> Result<String, serde_json::Error> {
        let digest = Sha256::digest(self.canonical_bytes()?);
        Ok(hex::encode(digest))
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    fn sample() -> AuthToken {
        AuthToken {
            id: String::new(),
            pubkey: "ab".repeat(32),
            created_at: 1_700_000_000,
            kind: HTTP_AUTH_KIND,
            tags: vec![
                vec!["u".to_string(), "http://localhost:9080/api/spaces".to_string()],
                vec!["method".to_string(), "GET".to_string()],
            ],
            content: String::new(),
            sig: "00".repeat(64),
        }
    }

    fn header_for(json: &str) -> String {
        format!("Nostr {}", STANDARD.encode(json))
    }

    #[test]
    fn test_tag_value() {
        let token = sample();
        assert_eq!(
            token.tag_value("u"),
            Some("http://localhost:9080/api/spaces")
        );
        assert_eq!(token.tag_value("method"), Some("GET"));
        assert_eq!(token.tag_value("missing"), None);
    }

    #[test]
    fn test_tag_value_skips_valueless_tags() {
        let mut token = sample();
        token.tags.insert(0, vec!["u".to_string()]);
        assert_eq!(
            token.tag_value("u"),
            Some("http://localhost:9080/api/spaces")
        );
    }

    #[test]
    fn test_canonical_serialization_is_compact_and_ordered() {
        let token = sample();
        let canonical = String::from_utf8(token.canonical_bytes().unwrap()).unwrap();
        let expected = format!(
            r#"[0,"{}",1700000000,27235,[["u","http://localhost:9080/api/spaces"],["method","GET"]],""]"#,
            "ab".repeat(32)
        );
        assert_eq!(canonical, expected);
    }

    #[test]
    fn test_compute_id_is_lowercase_sha256_hex() {
        let id = sample().compute_id().unwrap();
        assert_eq!(id.len(), 64);
        assert!(id.chars().all(|c| c.is_ascii_digit() || c.is_ascii_lowercase()));

        // Changing any serialized field changes the id
        let mut other = sample();
        other.content = "x".to_string();
        assert_ne!(other.compute_id().unwrap(), id);
    }

    #[test]
    fn test_from_header_round_trips_token() {
        let token = sample();
        let header = header_for(&serde_json::to_string(&token).unwrap());
        assert_eq!(AuthToken::from_header(&header).unwrap(), token);
    }

    #[test]
    fn test_from_header_rejects_other_schemes() {
        assert_eq!(
            AuthToken::from_header("Bearer abc"),
            Err(VerificationError::InvalidScheme)
        );
        // Scheme is case-sensitive
        assert_eq!(
            AuthToken::from_header("nostr abc"),
            Err(VerificationError::InvalidScheme)
        );
    }

    #[test]
    fn test_from_header_rejects_bad_base64() {
        assert_eq!(
            AuthToken::from_header("Nostr not*base64!"),
            Err(VerificationError::InvalidEncoding)
        );
    }

    #[test]
    fn test_from_header_rejects_non_token_json() {
        let header = header_for(r#"{"hello":"world"}"#);
        assert!(matches!(
            AuthToken::from_header(&header),
            Err(VerificationError::MalformedToken(_))
        ));

        let header = header_for("not json at all");
        assert!(matches!(
            AuthToken::from_header(&header),
            Err(VerificationError::MalformedToken(_))
        ));
    }

    #[test]
    fn test_from_header_defaults_missing_tags_and_content() {
        let json = format!(
            r#"{{"id":"{}","pubkey":"{}","created_at":1,"kind":27235,"sig":"{}"}}"#,
            "00".repeat(32),
            "00".repeat(32),
            "00".repeat(64)
        );
        let token = AuthToken::from_header(&header_for(&json)).unwrap();
        assert!(token.tags.is_empty());
        assert!(token.content.is_empty());
    }
}
