//! Gateway health endpoint.
//!
//! `/health` reports on the gateway process only. It never touches the
//! backend or the quota store, so it stays green while either is down.

use axum::Json;
use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::instrument;

/// Health check response.
#[derive(Debug, Serialize)]
pub struct HealthResponse {
    /// Always "ok" while the process serves requests
    pub status: &'static str,
    /// Service name
    pub service: &'static str,
    /// Service version
    pub version: &'static str,
    /// Current timestamp
    pub timestamp: DateTime<Utc>,
}

/// Health check endpoint.
///
/// # Response Body
///
/// ```json
/// {
///   "status": "ok",
///   "service": "gateway",
///   "version": "0.1.0",
///   "timestamp": "2025-01-15T10:30:00Z"
/// }
/// ```
#[instrument]
pub async fn health_check() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        service: "gateway",
        version: env!("CARGO_PKG_VERSION"),
        timestamp: Utc::now(),
    })
}
