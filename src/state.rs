//! Shared application state for Axum handlers.
//!
//! Everything in here is immutable after construction and cheap to clone.
//! Clones of the forwarder share one connection pool. The quota store is the
//! only component that touches shared mutable state, and that state lives in
//! Redis, not in this process.

use std::sync::Arc;

use crate::auth::AuthVerifier;
use crate::config::Config;
use crate::middleware::TrustedProxyConfig;
use crate::pipeline::RequestPipeline;
use crate::proxy::Forwarder;
use crate::quota::{CounterStore, QuotaEnforcer};
use crate::routing::RouteTable;

/// Shared application state for Axum handlers.
///
/// # Example
///
/// ```rust,ignore
/// let store = Arc::new(RedisCounterStore::new(&config.redis_url, config.rate_limit_store_timeout)?);
/// let state = AppState::new(config, store);
/// let app = build_router(state);
/// ```
#[derive(Clone)]
pub struct AppState {
    /// Application configuration
    pub config: Arc<Config>,
    /// Route, auth and quota decision chain
    pub pipeline: Arc<RequestPipeline>,
    /// Backend client
    pub forwarder: Forwarder,
    /// Networks whose forwarding headers are believed
    pub trusted_proxies: Arc<TrustedProxyConfig>,
}

impl AppState {
    /// Wire the gateway components from `config` around a counter store.
    pub fn new(config: Config, store: Arc<dyn CounterStore>) -> Self {
        let verifier = AuthVerifier::new(config.auth_max_clock_skew);
        let quota = QuotaEnforcer::new(
            store,
            config.quota_limits(),
            config.rate_limit_window,
            config.rate_limit_store_timeout,
        );
        let routes = RouteTable::from_config(&config);

        Self {
            pipeline: Arc::new(RequestPipeline::new(verifier, quota, routes)),
            forwarder: Forwarder::new(config.upstream_timeout),
            trusted_proxies: Arc::new(TrustedProxyConfig::new(&config.trusted_proxies)),
            config: Arc::new(config),
        }
    }
}
