//! Fuzz testing for `Authorization` header handling.
//!
//! Feeds arbitrary bytes through token decoding and full verification. The
//! verifier must return a typed error for every malformed input and never
//! panic.
//!
//! # Running the Fuzz Tests
//!
//! ```bash
//! # Install cargo-fuzz (requires nightly)
//! cargo +nightly install cargo-fuzz
//!
//! # Run the auth token fuzz target
//! cargo +nightly fuzz run fuzz_auth_token
//!
//! # Run with a time limit (e.g., 60 seconds)
//! cargo +nightly fuzz run fuzz_auth_token -- -max_total_time=60
//! ```
//!
//! # What This Tests
//!
//! - `AuthToken::from_header`: scheme, base64 and JSON decoding
//! - `AuthVerifier::verify`: kind, skew, tag, hex, id and signature checks
//! - `Nostr `-prefixed raw bytes, so the fuzzer reaches past the scheme check

#![no_main]

use chrono::DateTime;
use edge_gateway::{AuthToken, AuthVerifier};
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    let Ok(s) = std::str::from_utf8(data) else {
        return;
    };

    let _ = AuthToken::from_header(s);

    let verifier = AuthVerifier::default();
    let Some(now) = DateTime::from_timestamp(1_700_000_000, 0) else {
        return;
    };

    let _ = verifier.verify(Some(s), "http://localhost:9080/api/spaces", "GET", now);

    let prefixed = format!("Nostr {s}");
    let _ = verifier.verify(Some(&prefixed), "http://localhost:9080/api/spaces", "GET", now);

    // Treat the input as token JSON so the verifier checks see arbitrary fields
    if let Ok(token) = token_from_json(s) {
        let _ = verifier.verify_token(&token, "http://localhost:9080/api/spaces", "GET", now);
    }
});

fn token_from_json(s: &str) -> Result<AuthToken, ()> {
    use base64::Engine as _;
    let header = format!(
        "Nostr {}",
        base64::engine::general_purpose::STANDARD.encode(s)
    );
    AuthToken::from_header(&header).map_err(|_| ())
}
