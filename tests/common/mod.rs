//! Shared helpers for integration tests: token signing and a stub backend.
#![allow(clippy::unwrap_used, clippy::expect_used, dead_code)]

use std::net::SocketAddr;
use std::time::Duration;

use axum::Router;
use axum::body::Body;
use axum::http::{Request, header};
use axum::response::IntoResponse;
use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use secp256k1::{Keypair, Secp256k1, SecretKey};
use serde_json::json;
use tokio::net::TcpListener;

use edge_gateway::AuthToken;
use edge_gateway::auth::HTTP_AUTH_KIND;

/// Origin the stub backend claims in its CORS header.
pub const BACKEND_CORS_ORIGIN: &str = "https://backend.example";

/// How long the stub backend stalls on `/slow`.
pub const SLOW_DELAY: Duration = Duration::from_secs(3);

/// Deterministic keypair from a one-byte seed (seed must be non-zero).
pub fn keypair(seed: u8) -> Keypair {
    let secp = Secp256k1::new();
    let secret = SecretKey::from_slice(&[seed; 32]).expect("valid secret key");
    Keypair::from_secret_key(&secp, &secret)
}

/// Hex x-only public key of `keys`.
pub fn pubkey_hex(keys: &Keypair) -> String {
    hex::encode(keys.x_only_public_key().0.serialize())
}

/// `Authorization` header value for a signed NIP-98 token.
pub fn auth_header(keys: &Keypair, url: &str, method: &str, created_at: i64) -> String {
    let mut token = AuthToken {
        id: String::new(),
        pubkey: pubkey_hex(keys),
        created_at,
        kind: HTTP_AUTH_KIND,
        tags: vec![
            vec!["u".to_string(), url.to_string()],
            vec!["method".to_string(), method.to_string()],
        ],
        content: String::new(),
        sig: String::new(),
    };

    token.id = token.compute_id().expect("serializable token");
    let mut id_bytes = [0u8; 32];
    hex::decode_to_slice(&token.id, &mut id_bytes).expect("sha256 hex");
    let sig = Secp256k1::new().sign_schnorr_no_aux_rand(&id_bytes, keys);
    token.sig = hex::encode(sig.serialize());

    let json = serde_json::to_string(&token).expect("serializable token");
    format!("Nostr {}", STANDARD.encode(json))
}

/// Echo what the backend received as JSON, with a backend CORS header.
async fn echo(req: Request<Body>) -> impl IntoResponse {
    if req.uri().path() == "/slow" {
        tokio::time::sleep(SLOW_DELAY).await;
    }

    let headers = req.headers();
    let value = |name: &str| {
        headers
            .get(name)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string)
    };

    let body = json!({
        "method": req.method().as_str(),
        "path": req.uri().path(),
        "query": req.uri().query(),
        "pubkey": value("x-auth-pubkey"),
        "host": value("host"),
        "forwarded_for": value("x-forwarded-for"),
        "request_id": value("x-request-id"),
    });

    (
        [(header::ACCESS_CONTROL_ALLOW_ORIGIN, BACKEND_CORS_ORIGIN)],
        axum::Json(body),
    )
}

/// Start the stub backend on an ephemeral port and return its base URL.
pub async fn start_backend() -> String {
    let listener = TcpListener::bind("127.0.0.1:0")
        .await
        .expect("Failed to bind backend");
    let addr: SocketAddr = listener.local_addr().expect("Failed to get backend address");

    let app = Router::new().fallback(echo);
    tokio::spawn(async move {
        axum::serve(listener, app).await.expect("Backend failed");
    });

    format!("http://{addr}")
}

/// A loopback port nothing listens on.
pub async fn closed_port() -> u16 {
    let listener = TcpListener::bind("127.0.0.1:0")
        .await
        .expect("Failed to bind");
    listener.local_addr().expect("Failed to get address").port()
}

/// Base URL of a backend that refuses connections.
pub async fn closed_backend() -> String {
    format!("http://127.0.0.1:{}", closed_port().await)
}
