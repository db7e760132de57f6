//! HTTP request plumbing shared by handlers.
//!
//! - **Client origin**: peer address and scheme, with forwarding headers
//!   honoured only from trusted proxies
//!
//! Cross-cutting layers (CORS, tracing, request ids) come from `tower-http`
//! and are assembled in [`crate::routes`].

pub mod ip;

pub use ip::{CidrRange, ClientOrigin, TrustedProxyConfig, UNKNOWN_IP, client_origin};
