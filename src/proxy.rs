//! Request forwarding to the backend.
//!
//! One pooled HTTP/1.1 client shared by all requests. Each forward makes a
//! single attempt bounded by the upstream timeout; there are no retries.
//!
//! # Header Handling
//!
//! Outbound:
//! - hop-by-hop headers (and any named in `Connection`) are dropped
//! - `Host` is dropped so the client sets it from the backend URI
//! - `X-Auth-Pubkey` is always removed, then set only for verified callers
//! - `X-Forwarded-For`, `X-Forwarded-Host` and `X-Forwarded-Proto` describe
//!   the client as the gateway saw it
//!
//! Inbound:
//! - hop-by-hop headers are dropped
//! - backend CORS headers are dropped; the gateway's `CorsLayer` owns them

use std::time::{Duration, Instant};

use axum::body::Body;
use axum::http::header::{self, HeaderMap, HeaderName, HeaderValue};
use axum::http::{Request, Uri};
use axum::response::Response;
use hyper_util::client::legacy::Client;
use hyper_util::client::legacy::connect::HttpConnector;
use hyper_util::rt::TokioExecutor;
use thiserror::Error;
use tracing::{debug, error, warn};

use crate::error::{ApiError, ErrorCode};
use crate::metrics;
use crate::pipeline::{ForwardPlan, RequestContext};

/// Header carrying the verified caller pubkey to the backend.
pub const X_AUTH_PUBKEY: HeaderName = HeaderName::from_static("x-auth-pubkey");

const X_FORWARDED_FOR: HeaderName = HeaderName::from_static("x-forwarded-for");
const X_FORWARDED_HOST: HeaderName = HeaderName::from_static("x-forwarded-host");
const X_FORWARDED_PROTO: HeaderName = HeaderName::from_static("x-forwarded-proto");

/// Headers meaningful only for a single transport hop.
const HOP_BY_HOP: [HeaderName; 8] = [
    header::CONNECTION,
    HeaderName::from_static("keep-alive"),
    HeaderName::from_static("proxy-connection"),
    header::PROXY_AUTHENTICATE,
    header::PROXY_AUTHORIZATION,
    header::TE,
    header::TRAILER,
    header::TRANSFER_ENCODING,
];

/// CORS headers a backend may set that the gateway replaces with its own.
const BACKEND_CORS: [HeaderName; 5] = [
    header::ACCESS_CONTROL_ALLOW_ORIGIN,
    header::ACCESS_CONTROL_ALLOW_METHODS,
    header::ACCESS_CONTROL_ALLOW_HEADERS,
    header::ACCESS_CONTROL_ALLOW_CREDENTIALS,
    header::ACCESS_CONTROL_MAX_AGE,
];

/// Failure forwarding a request.
#[derive(Error, Debug)]
pub enum ProxyError {
    #[error("backend target is not a valid URI: {0}")]
    InvalidTarget(String),

    #[error("backend unavailable: {0}")]
    Unavailable(String),

    #[error("backend did not respond within {0:?}")]
    Timeout(Duration),
}

impl ProxyError {
    /// Short, bounded label for metrics.
    pub fn kind(&self) -> &'static str {
        match self {
            ProxyError::InvalidTarget(_) => "invalid_target",
            ProxyError::Unavailable(_) => "unavailable",
            ProxyError::Timeout(_) => "timeout",
        }
    }
}

impl From<ProxyError> for ApiError {
    fn from(err: ProxyError) -> Self {
        match err {
            ProxyError::Timeout(_) => ApiError::new(ErrorCode::UpstreamTimeout, "backend timed out"),
            ProxyError::InvalidTarget(_) | ProxyError::Unavailable(_) => {
                ApiError::new(ErrorCode::UpstreamUnavailable, "backend unavailable")
            }
        }
    }
}

/// Pooled client forwarding admitted requests to the backend.
#[derive(Clone)]
pub struct Forwarder {
    client: Client<HttpConnector, Body>,
    timeout: Duration,
}

impl std::fmt::Debug for Forwarder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Forwarder")
            .field("timeout", &self.timeout)
            .finish_non_exhaustive()
    }
}

impl Forwarder {
    pub fn new(timeout: Duration) -> Self {
        let client = Client::builder(TokioExecutor::new()).build(HttpConnector::new());
        Self { client, timeout }
    }

    /// Forward `req` according to `plan` and return the backend response.
    ///
    /// # Errors
    ///
    /// - [`ProxyError::InvalidTarget`] if the target URL does not parse
    /// - [`ProxyError::Unavailable`] on connection or protocol failure
    /// - [`ProxyError::Timeout`] if no response head arrives in time
    pub async fn forward(
        &self,
        req: Request<Body>,
        plan: &ForwardPlan,
        ctx: &RequestContext,
    ) -> Result<Response, ProxyError> {
        let (parts, body) = req.into_parts();

        let target = plan.target.url(parts.uri.query());
        let uri: Uri = target
            .parse()
            .map_err(|e| ProxyError::InvalidTarget(format!("{target}: {e}")))?;

        let mut outbound = Request::new(body);
        *outbound.method_mut() = parts.method;
        *outbound.uri_mut() = uri;
        *outbound.headers_mut() = outbound_headers(parts.headers, plan.pubkey.as_deref(), ctx);

        debug!(
            class = %plan.class,
            target = %outbound.uri(),
            authenticated = plan.pubkey.is_some(),
            "Forwarding request"
        );

        let started = Instant::now();
        let response = match tokio::time::timeout(self.timeout, self.client.request(outbound)).await
        {
            Ok(Ok(response)) => response,
            Ok(Err(e)) => {
                error!(error = %e, target = %target, "Backend request failed");
                let err = ProxyError::Unavailable(e.to_string());
                metrics::record_upstream_error(err.kind());
                return Err(err);
            }
            Err(_) => {
                warn!(target = %target, timeout = ?self.timeout, "Backend request timed out");
                let err = ProxyError::Timeout(self.timeout);
                metrics::record_upstream_error(err.kind());
                return Err(err);
            }
        };

        metrics::record_upstream_duration(
            response.status().as_str(),
            started.elapsed().as_secs_f64(),
        );

        let (mut parts, body) = response.into_parts();
        strip_response_headers(&mut parts.headers);
        Ok(Response::from_parts(parts, Body::new(body)))
    }
}

/// Remove hop-by-hop headers, including those listed in `Connection`.
fn strip_hop_by_hop(headers: &mut HeaderMap) {
    let listed: Vec<HeaderName> = headers
        .get_all(header::CONNECTION)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .flat_map(|v| v.split(','))
        .filter_map(|name| HeaderName::from_bytes(name.trim().as_bytes()).ok())
        .collect();

    for name in listed.iter().chain(HOP_BY_HOP.iter()) {
        headers.remove(name);
    }
    // Upgrades are not proxied
    headers.remove(header::UPGRADE);
}

fn outbound_headers(mut headers: HeaderMap, pubkey: Option<&str>, ctx: &RequestContext) -> HeaderMap {
    strip_hop_by_hop(&mut headers);
    headers.remove(header::HOST);
    headers.remove(&X_AUTH_PUBKEY);

    if let Some(pubkey) = pubkey
        && let Ok(value) = HeaderValue::from_str(pubkey)
    {
        headers.insert(X_AUTH_PUBKEY, value);
    }

    if let Ok(value) = HeaderValue::from_str(&ctx.client_ip) {
        headers.insert(X_FORWARDED_FOR, value);
    }
    if let Ok(value) = HeaderValue::from_str(&ctx.host) {
        headers.insert(X_FORWARDED_HOST, value);
    }
    headers.insert(
        X_FORWARDED_PROTO,
        HeaderValue::from_static(if ctx.is_tls { "https" } else { "http" }),
    );

    headers
}

fn strip_response_headers(headers: &mut HeaderMap) {
    strip_hop_by_hop(headers);
    for name in &BACKEND_CORS {
        headers.remove(name);
    }
}
