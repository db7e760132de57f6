//! Application routing configuration with middleware stack.
//!
//! # Middleware Stack (outermost first)
//!
//! ```text
//! Request
//!    │
//!    ▼
//! ┌──────────────────┐
//! │  Set Request ID  │ ← Generates X-Request-Id when absent
//! └────────┬─────────┘
//!          ▼
//! ┌──────────────────┐
//! │     Tracing      │ ← HTTP request/response logging
//! └────────┬─────────┘
//!          ▼
//! ┌──────────────────┐
//! │ Propagate Req ID │ ← Copies X-Request-Id onto the response
//! └────────┬─────────┘
//!          ▼
//! ┌──────────────────┐
//! │      CORS        │ ← Gateway owns all CORS headers
//! └────────┬─────────┘
//!          ▼
//!   /health  │  fallback → pipeline → backend
//! ```
//!
//! # Route Groups
//!
//! - `/health` - Gateway health, bypasses the pipeline
//! - everything else - [`handlers::proxy_request`], which routes by mount prefix

use axum::Router;
use axum::routing::get;
use tower_http::cors::{Any, CorsLayer};
use tower_http::request_id::{MakeRequestUuid, PropagateRequestIdLayer, SetRequestIdLayer};
use tower_http::trace::TraceLayer;
use tracing::info;

use crate::handlers;
use crate::state::AppState;

/// Build the application router with all routes and middleware configured.
///
/// # Arguments
///
/// * `state` - Application state containing config and the request pipeline
///
/// # Returns
///
/// Fully configured Axum router ready to be served.
pub fn build_router(state: AppState) -> Router {
    let config = &state.config;

    info!(
        protected = %config.protected_prefix,
        public = %config.public_prefix,
        backend = %config.backend_url,
        "Gateway mounts configured"
    );

    let cors = build_cors_layer(&config.cors_allowed_origins);

    Router::new()
        .route("/health", get(handlers::health_check))
        .fallback(handlers::proxy_request)
        .layer(cors)
        .layer(PropagateRequestIdLayer::x_request_id())
        .layer(TraceLayer::new_for_http())
        .layer(SetRequestIdLayer::x_request_id(MakeRequestUuid))
        .with_state(state)
}

/// Build CORS layer from configuration.
///
/// # Arguments
///
/// * `allowed_origins` - List of allowed origins, or `["*"]` for any origin
///
/// # Security Note
///
/// Using `*` (any origin) is convenient for development but should be
/// avoided in production. Specify explicit origins instead.
fn build_cors_layer(allowed_origins: &[String]) -> CorsLayer {
    let allow_any = allowed_origins.iter().any(|o| o == "*");

    if allow_any {
        CorsLayer::new()
            .allow_origin(Any)
            .allow_methods(Any)
            .allow_headers(Any)
    } else {
        let origins: Vec<_> = allowed_origins
            .iter()
            .filter_map(|o| o.parse().ok())
            .collect();

        CorsLayer::new()
            .allow_origin(origins)
            .allow_methods(Any)
            .allow_headers(Any)
    }
}
