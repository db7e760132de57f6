//! Prometheus metrics for gateway observability.
//!
//! Metrics are exposed via a dedicated HTTP listener (default: `0.0.0.0:9090`).
//!
//! # Available Metrics
//!
//! ## Counters
//! - `gateway_requests_total` - Requests by route class and outcome
//! - `gateway_auth_failures_total` - Rejected auth tokens (labels: code, reason)
//! - `gateway_quota_decisions_total` - Quota decisions (labels: category, decision)
//! - `gateway_quota_store_failures_total` - Store errors and timeouts that failed open
//! - `gateway_upstream_errors_total` - Failed forwards (labels: kind)
//!
//! ## Histograms
//! - `gateway_upstream_duration_seconds` - Backend round trip (labels: status)
//!
//! # Usage
//!
//! ```rust,ignore
//! use edge_gateway::metrics::{try_init_metrics, record_request};
//!
//! try_init_metrics("0.0.0.0:9090".parse()?);
//! record_request("protected", "forwarded");
//! ```

use metrics::{counter, describe_counter, describe_histogram, histogram};
use metrics_exporter_prometheus::PrometheusBuilder;
use std::net::SocketAddr;
use tracing::{error, info};

/// Metric names as constants for consistency.
pub mod names {
    pub const REQUESTS_TOTAL: &str = "gateway_requests_total";
    pub const AUTH_FAILURES_TOTAL: &str = "gateway_auth_failures_total";
    pub const QUOTA_DECISIONS_TOTAL: &str = "gateway_quota_decisions_total";
    pub const QUOTA_STORE_FAILURES_TOTAL: &str = "gateway_quota_store_failures_total";
    pub const UPSTREAM_ERRORS_TOTAL: &str = "gateway_upstream_errors_total";
    pub const UPSTREAM_DURATION_SECONDS: &str = "gateway_upstream_duration_seconds";
}

/// Initialize the Prometheus metrics exporter.
///
/// # Arguments
///
/// * `metrics_addr` - Address for the Prometheus metrics endpoint
///
/// # Returns
///
/// `Ok(())` if initialization succeeds, `Err` with message otherwise.
pub fn init_metrics(metrics_addr: SocketAddr) -> Result<(), String> {
    PrometheusBuilder::new()
        .with_http_listener(metrics_addr)
        .install()
        .map_err(|e| format!("Failed to install Prometheus exporter: {e}"))?;

    describe_counter!(
        names::REQUESTS_TOTAL,
        "Total number of requests handled, by route class and outcome"
    );
    describe_counter!(
        names::AUTH_FAILURES_TOTAL,
        "Total number of rejected auth tokens"
    );
    describe_counter!(
        names::QUOTA_DECISIONS_TOTAL,
        "Total number of quota decisions"
    );
    describe_counter!(
        names::QUOTA_STORE_FAILURES_TOTAL,
        "Total number of quota store failures that were allowed through"
    );
    describe_counter!(
        names::UPSTREAM_ERRORS_TOTAL,
        "Total number of failed forwards to the backend"
    );

    describe_histogram!(
        names::UPSTREAM_DURATION_SECONDS,
        "Backend round trip duration in seconds"
    );

    info!(addr = %metrics_addr, "Prometheus metrics endpoint started");
    Ok(())
}

/// Try to initialize metrics, logging any errors but not failing.
pub fn try_init_metrics(metrics_addr: SocketAddr) {
    if let Err(e) = init_metrics(metrics_addr) {
        error!(error = %e, "Failed to initialize metrics, continuing without metrics");
    }
}

// =============================================================================
// Counter Recording Functions
// =============================================================================

/// Record the final outcome of a request.
pub fn record_request(class: &str, outcome: &str) {
    counter!(names::REQUESTS_TOTAL, "class" => class.to_string(), "outcome" => outcome.to_string())
        .increment(1);
}

/// Record a rejected auth token.
pub fn record_auth_failure(code: &str, reason: &str) {
    counter!(names::AUTH_FAILURES_TOTAL, "code" => code.to_string(), "reason" => reason.to_string())
        .increment(1);
}

/// Record a quota decision.
pub fn record_quota_decision(category: &str, decision: &str) {
    counter!(names::QUOTA_DECISIONS_TOTAL, "category" => category.to_string(), "decision" => decision.to_string())
        .increment(1);
}

/// Record a quota store failure that failed open.
pub fn record_quota_store_failure(reason: &str) {
    counter!(names::QUOTA_STORE_FAILURES_TOTAL, "reason" => reason.to_string()).increment(1);
}

/// Record a failed forward.
pub fn record_upstream_error(kind: &str) {
    counter!(names::UPSTREAM_ERRORS_TOTAL, "kind" => kind.to_string()).increment(1);
}

// =============================================================================
// Histogram Recording Functions
// =============================================================================

/// Record the backend round trip.
pub fn record_upstream_duration(status: &str, duration_secs: f64) {
    histogram!(names::UPSTREAM_DURATION_SECONDS, "status" => status.to_string())
        .record(duration_secs);
}
