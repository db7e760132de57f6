//! # Edge Gateway
//!
//! An HTTP edge gateway in front of a single backend that:
//!
//! - **Authenticates** callers with NIP-98 signed tokens (BIP-340 Schnorr)
//! - **Throttles** them with Redis sliding-window quotas per identity and category
//! - **Routes** by path prefix, stripping the protected mount before forwarding
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                      Axum HTTP Server                       │
//! ├─────────────────────────────────────────────────────────────┤
//! │  Layers (Request ID → Trace → CORS)                         │
//! ├─────────────────────────────────────────────────────────────┤
//! │  /health            │  fallback: proxy_request              │
//! ├─────────────────────┴───────────────────────────────────────┤
//! │  RequestPipeline: RouteTable → AuthVerifier → QuotaEnforcer │
//! ├─────────────────────────────────────────────────────────────┤
//! │  Forwarder (hyper-util pooled client)   │  CounterStore     │
//! ├─────────────────────────────────────────┼───────────────────┤
//! │  Backend                                │  Redis            │
//! └─────────────────────────────────────────┴───────────────────┘
//! ```
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use edge_gateway::{AppState, Config, build_router};
//! use edge_gateway::quota::RedisCounterStore;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = Config::from_env()?;
//!     let store = RedisCounterStore::new(&config.redis_url, config.rate_limit_store_timeout)?;
//!
//!     let state = AppState::new(config, Arc::new(store));
//!     let app = build_router(state);
//!
//!     // Serve with connect info so anonymous callers are keyed by address...
//!     Ok(())
//! }
//! ```
//!
//! ## Configuration
//!
//! ```bash
//! BACKEND_URL=http://localhost:3002 REDIS_URL=redis://localhost:6380 cargo run
//! ```

pub mod auth;
pub mod config;
pub mod error;
pub mod handlers;
pub mod metrics;
pub mod middleware;
pub mod pipeline;
pub mod proxy;
pub mod quota;
pub mod routes;
pub mod routing;
pub mod state;
pub mod utils;

// Re-exports for convenience
pub use auth::{AuthToken, AuthVerifier, VerificationError};
pub use config::Config;
pub use error::{ApiError, ErrorCode, GatewayError, GatewayResult};
pub use pipeline::{Identity, Outcome, RequestContext, RequestPipeline};
pub use quota::{QuotaCategory, QuotaDecision, QuotaEnforcer};
pub use routes::build_router;
pub use state::AppState;
