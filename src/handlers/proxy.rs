//! Fallback handler: everything that is not `/health` goes through the pipeline.

use axum::body::Body;
use axum::extract::State;
use axum::http::{Request, header};
use axum::response::{IntoResponse, Response};
use chrono::Utc;

use crate::error::{ApiError, ErrorCode};
use crate::metrics;
use crate::middleware::client_origin;
use crate::pipeline::{Outcome, RequestContext};
use crate::state::AppState;

/// Evaluate the pipeline for a request and forward it if admitted.
///
/// Dropping this future (client disconnect) drops the in-flight quota
/// check or backend request with it.
pub async fn proxy_request(State(state): State<AppState>, req: Request<Body>) -> Response {
    let ctx = request_context(&req, &state);
    let outcome = state.pipeline.evaluate(&ctx, Utc::now()).await;
    let label = outcome.label();

    match outcome {
        Outcome::Forward(plan) => {
            let class = plan.class.as_str();
            match state.forwarder.forward(req, &plan, &ctx).await {
                Ok(response) => {
                    metrics::record_request(class, label);
                    response
                }
                Err(e) => {
                    metrics::record_request(class, "upstream_error");
                    ApiError::from(e).into_response()
                }
            }
        }
        Outcome::Rejected(error) => {
            metrics::record_request("protected", label);
            error.into_response()
        }
        Outcome::NotRouted => {
            metrics::record_request("none", label);
            ApiError::new(ErrorCode::NotFound, "no route for path").into_response()
        }
    }
}

/// Collect the facts the pipeline decides on.
fn request_context(req: &Request<Body>, state: &AppState) -> RequestContext {
    let origin = client_origin(req, &state.trusted_proxies);

    let host = req
        .headers()
        .get(header::HOST)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string)
        .or_else(|| req.uri().authority().map(|a| a.as_str().to_string()))
        .unwrap_or_default();

    // A present but non-ASCII value must still reach the verifier and fail there
    let authorization = req
        .headers()
        .get(header::AUTHORIZATION)
        .map(|v| String::from_utf8_lossy(v.as_bytes()).into_owned());

    RequestContext {
        method: req.method().clone(),
        path: req.uri().path().to_string(),
        host,
        is_tls: origin.is_tls,
        client_ip: origin.ip,
        authorization,
    }
}
