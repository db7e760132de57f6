//! Distributed sliding-window quotas keyed by (category, subject).
//!
//! # Algorithm
//!
//! Each (category, subject) pair owns a sorted set of request timestamps in
//! the shared store. On every request, one atomic store operation evicts
//! timestamps older than the window, records the current request, reads the
//! cardinality and refreshes the key expiry to twice the window. The request
//! is allowed while the cardinality stays within the category threshold.
//!
//! # Fail-Open
//!
//! If the store errors or does not answer within the configured timeout the
//! request is **allowed**. The failure is logged and counted
//! (`gateway_quota_store_failures_total`) and reported as
//! [`QuotaDecision::FailedOpen`], so it is never confused with a normal allow.

mod store;

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use axum::http::Method;
use chrono::{DateTime, Utc};
use tracing::{debug, warn};

use crate::metrics;

pub use store::{CounterStore, MemoryCounterStore, RedisCounterStore, StoreError};

/// Path fragment that classifies a request as a search.
pub const SEARCH_MARKER: &str = "/search";

/// Request category, each with its own threshold and its own window.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum QuotaCategory {
    Read,
    Write,
    Search,
}

impl QuotaCategory {
    /// Classify a request.
    ///
    /// `POST`, `PUT`, `PATCH` and `DELETE` are writes; every other method,
    /// including extension methods, is a read. A path containing `/search`
    /// is a search regardless of method.
    pub fn classify(method: &Method, path: &str) -> Self {
        if path.contains(SEARCH_MARKER) {
            return QuotaCategory::Search;
        }
        match *method {
            Method::POST | Method::PUT | Method::PATCH | Method::DELETE => QuotaCategory::Write,
            _ => QuotaCategory::Read,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            QuotaCategory::Read => "read",
            QuotaCategory::Write => "write",
            QuotaCategory::Search => "search",
        }
    }
}

impl fmt::Display for QuotaCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Requests allowed per window, per category.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QuotaLimits {
    pub read: u32,
    pub write: u32,
    pub search: u32,
}

impl Default for QuotaLimits {
    fn default() -> Self {
        Self {
            read: 100,
            write: 30,
            search: 10,
        }
    }
}

impl QuotaLimits {
    pub fn threshold(&self, category: QuotaCategory) -> u32 {
        match category {
            QuotaCategory::Read => self.read,
            QuotaCategory::Write => self.write,
            QuotaCategory::Search => self.search,
        }
    }
}

/// Outcome of a quota check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QuotaDecision {
    /// Within the threshold.
    Allowed { count: u64, limit: u32 },
    /// Over the threshold.
    Denied { count: u64, limit: u32 },
    /// The store could not decide; allowed anyway.
    FailedOpen,
}

impl QuotaDecision {
    pub fn is_allowed(self) -> bool {
        !matches!(self, QuotaDecision::Denied { .. })
    }

    fn label(self) -> &'static str {
        match self {
            QuotaDecision::Allowed { .. } => "allowed",
            QuotaDecision::Denied { .. } => "denied",
            QuotaDecision::FailedOpen => "failed_open",
        }
    }
}

/// Sliding-window quota enforcer over an injected [`CounterStore`].
#[derive(Clone)]
pub struct QuotaEnforcer {
    store: Arc<dyn CounterStore>,
    limits: QuotaLimits,
    window: Duration,
    store_timeout: Duration,
}

impl fmt::Debug for QuotaEnforcer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("QuotaEnforcer")
            .field("limits", &self.limits)
            .field("window", &self.window)
            .field("store_timeout", &self.store_timeout)
            .finish_non_exhaustive()
    }
}

impl QuotaEnforcer {
    /// Create an enforcer.
    ///
    /// # Arguments
    ///
    /// * `store` - Shared counter store (Redis in production)
    /// * `limits` - Per-category thresholds
    /// * `window` - Sliding window length
    /// * `store_timeout` - Bound on one store round trip before failing open
    pub fn new(
        store: Arc<dyn CounterStore>,
        limits: QuotaLimits,
        window: Duration,
        store_timeout: Duration,
    ) -> Self {
        Self {
            store,
            limits,
            window,
            store_timeout,
        }
    }

    /// Store key for a (category, subject) pair.
    pub fn key(category: QuotaCategory, subject: &str) -> String {
        format!("ratelimit:{category}:{subject}")
    }

    /// `true` unless the subject is over its threshold for `category`.
    pub async fn allow(&self, subject: &str, category: QuotaCategory, now: DateTime<Utc>) -> bool {
        self.check(subject, category, now).await.is_allowed()
    }

    /// Record the request and decide.
    ///
    /// Makes exactly one store attempt, bounded by the store timeout.
    pub async fn check(
        &self,
        subject: &str,
        category: QuotaCategory,
        now: DateTime<Utc>,
    ) -> QuotaDecision {
        let key = Self::key(category, subject);
        let limit = self.limits.threshold(category);

        let result = tokio::time::timeout(
            self.store_timeout,
            self.store
                .record_and_count(&key, now.timestamp_millis(), self.window),
        )
        .await;

        let decision = match result {
            Ok(Ok(count)) if count <= u64::from(limit) => QuotaDecision::Allowed { count, limit },
            Ok(Ok(count)) => QuotaDecision::Denied { count, limit },
            Ok(Err(e)) => {
                warn!(
                    error = %e,
                    category = %category,
                    "Quota store failed, allowing request"
                );
                metrics::record_quota_store_failure(e.reason());
                QuotaDecision::FailedOpen
            }
            Err(_) => {
                warn!(
                    timeout_ms = self.store_timeout.as_millis() as u64,
                    category = %category,
                    "Quota store timed out, allowing request"
                );
                metrics::record_quota_store_failure("timeout");
                QuotaDecision::FailedOpen
            }
        };

        debug!(subject, category = %category, ?decision, "Quota checked");
        metrics::record_quota_decision(category.as_str(), decision.label());
        decision
    }
}
