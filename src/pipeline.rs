//! Per-request decision chain: route, authenticate, throttle.
//!
//! ```text
//!              ┌── public ─────────────────────────────────┐
//! route(path) ─┤                                           ├─▶ Forward(plan)
//!              └── protected ─▶ auth ──▶ quota ────────────┘
//!                                 │         │
//!                               401       429
//! ```
//!
//! Stages short-circuit: a rejection is final and the backend is never
//! contacted. Auth runs first so quotas are keyed by the verified pubkey
//! whenever there is one.
//!
//! The pipeline never touches the inbound request. It reads a
//! [`RequestContext`] and returns an [`Outcome`]; the verified identity
//! reaches the forwarder as a field of [`ForwardPlan`].

use axum::http::Method;
use chrono::{DateTime, Utc};
use tracing::{debug, info, warn};

use crate::auth::{AuthVerifier, VerificationError};
use crate::error::{ApiError, ErrorCode};
use crate::metrics;
use crate::quota::{QuotaCategory, QuotaDecision, QuotaEnforcer};
use crate::routing::{RouteClass, RouteTable, RouteTarget};

/// The request facts the pipeline decides on.
#[derive(Debug, Clone)]
pub struct RequestContext {
    pub method: Method,
    /// Inbound path, without the query string.
    pub path: String,
    pub host: String,
    /// Whether the client reached the edge over TLS.
    pub is_tls: bool,
    pub client_ip: String,
    /// Raw `Authorization` header value, if any.
    pub authorization: Option<String>,
}

impl RequestContext {
    /// The URL a token for this request must be bound to.
    pub fn expected_url(&self) -> String {
        let scheme = if self.is_tls { "https" } else { "http" };
        format!("{scheme}://{}{}", self.host, self.path)
    }
}

/// Who the caller is, as far as the quota stage is concerned.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Identity {
    /// Holder of a verified token.
    Verified(String),
    /// No token; identified by client address.
    Anonymous(String),
}

impl Identity {
    /// Quota subject: the pubkey, or `anon:{ip}`.
    pub fn subject(&self) -> String {
        match self {
            Identity::Verified(pubkey) => pubkey.clone(),
            Identity::Anonymous(ip) => format!("anon:{ip}"),
        }
    }

    pub fn pubkey(&self) -> Option<&str> {
        match self {
            Identity::Verified(pubkey) => Some(pubkey),
            Identity::Anonymous(_) => None,
        }
    }
}

/// Everything the forwarder needs to know about an admitted request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ForwardPlan {
    pub class: RouteClass,
    pub target: RouteTarget,
    /// Value for `X-Auth-Pubkey`; `None` means the header is removed.
    pub pubkey: Option<String>,
}

/// Terminal result of the pipeline.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    Forward(ForwardPlan),
    Rejected(ApiError),
    NotRouted,
}

impl Outcome {
    /// Metric label for this outcome.
    pub fn label(&self) -> &'static str {
        match self {
            Outcome::Forward(_) => "forwarded",
            Outcome::Rejected(e) if e.code == ErrorCode::RateLimited => "rate_limited",
            Outcome::Rejected(_) => "unauthorized",
            Outcome::NotRouted => "not_found",
        }
    }
}

/// The ordered chain of gateway stages.
#[derive(Debug, Clone)]
pub struct RequestPipeline {
    verifier: AuthVerifier,
    quota: QuotaEnforcer,
    routes: RouteTable,
}

impl RequestPipeline {
    pub fn new(verifier: AuthVerifier, quota: QuotaEnforcer, routes: RouteTable) -> Self {
        Self {
            verifier,
            quota,
            routes,
        }
    }

    /// Decide what happens to a request.
    pub async fn evaluate(&self, ctx: &RequestContext, now: DateTime<Utc>) -> Outcome {
        let Some((class, target)) = self.routes.route(&ctx.path) else {
            debug!(path = %ctx.path, "No mount for path");
            return Outcome::NotRouted;
        };

        if class == RouteClass::Public {
            return Outcome::Forward(ForwardPlan {
                class,
                target,
                pubkey: None,
            });
        }

        let identity = match self.authenticate(ctx, now) {
            Ok(identity) => identity,
            Err(rejection) => return Outcome::Rejected(rejection),
        };

        let category = QuotaCategory::classify(&ctx.method, &ctx.path);
        let decision = self.quota.check(&identity.subject(), category, now).await;
        if let QuotaDecision::Denied { count, limit } = decision {
            info!(
                subject = %identity.subject(),
                category = %category,
                count,
                limit,
                "Quota exceeded"
            );
            return Outcome::Rejected(ApiError::new(
                ErrorCode::RateLimited,
                "rate limit exceeded",
            ));
        }

        Outcome::Forward(ForwardPlan {
            class,
            target,
            pubkey: identity.pubkey().map(str::to_string),
        })
    }

    fn authenticate(&self, ctx: &RequestContext, now: DateTime<Utc>) -> Result<Identity, ApiError> {
        let expected_url = ctx.expected_url();
        let verified = self.verifier.verify(
            ctx.authorization.as_deref(),
            &expected_url,
            ctx.method.as_str(),
            now,
        );

        match verified {
            Ok(Some(pubkey)) => Ok(Identity::Verified(pubkey)),
            Ok(None) => Ok(Identity::Anonymous(ctx.client_ip.clone())),
            Err(e) => Err(self.reject_auth(ctx, &e)),
        }
    }

    fn reject_auth(&self, ctx: &RequestContext, error: &VerificationError) -> ApiError {
        let code = error.code();
        match error {
            VerificationError::InvalidScheme
            | VerificationError::InvalidEncoding
            | VerificationError::MalformedToken(_) => {
                debug!(client_ip = %ctx.client_ip, error = %error, "Undecodable auth header");
            }
            _ => {
                warn!(
                    client_ip = %ctx.client_ip,
                    method = %ctx.method,
                    path = %ctx.path,
                    reason = error.reason(),
                    error = %error,
                    "Auth token rejected"
                );
            }
        }
        metrics::record_auth_failure(code.as_str(), error.reason());
        ApiError::new(code, error.to_string())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::auth::testing::{header_for, keypair, signed_token};
    use crate::config::Config;
    use crate::quota::{CounterStore, MemoryCounterStore, QuotaLimits};
    use std::sync::Arc;
    use std::time::Duration;

    fn now() -> DateTime<Utc> {
        DateTime::from_timestamp(1_750_000_000, 0).unwrap()
    }

    fn pipeline_with(store: Arc<dyn CounterStore>) -> RequestPipeline {
        let config = Config::default();
        RequestPipeline::new(
            AuthVerifier::default(),
            QuotaEnforcer::new(
                store,
                QuotaLimits::default(),
                Duration::from_secs(60),
                Duration::from_millis(100),
            ),
            RouteTable::from_config(&config),
        )
    }

    fn pipeline() -> RequestPipeline {
        pipeline_with(Arc::new(MemoryCounterStore::new()))
    }

    fn context(method: Method, path: &str) -> RequestContext {
        RequestContext {
            method,
            path: path.to_string(),
            host: "gw.example".to_string(),
            is_tls: true,
            client_ip: "198.51.100.4".to_string(),
            authorization: None,
        }
    }

    fn signed_context(method: Method, path: &str, created_at: i64) -> (RequestContext, String) {
        let keys = keypair(7);
        let mut ctx = context(method, path);
        let token = signed_token(&keys, &ctx.expected_url(), ctx.method.as_str(), created_at);
        ctx.authorization = Some(header_for(&token));
        (ctx, token.pubkey)
    }

    #[test]
    fn test_expected_url_uses_scheme_and_host() {
        let mut ctx = context(Method::GET, "/api/spaces");
        assert_eq!(ctx.expected_url(), "https://gw.example/api/spaces");
        ctx.is_tls = false;
        assert_eq!(ctx.expected_url(), "http://gw.example/api/spaces");
    }

    #[test]
    fn test_identity_subjects() {
        assert_eq!(Identity::Verified("ab".to_string()).subject(), "ab");
        assert_eq!(
            Identity::Anonymous("10.0.0.1".to_string()).subject(),
            "anon:10.0.0.1"
        );
    }

    #[tokio::test]
    async fn test_valid_token_forwards_with_pubkey() {
        let (ctx, pubkey) = signed_context(Method::GET, "/api/spaces", now().timestamp() - 10);

        let outcome = pipeline().evaluate(&ctx, now()).await;
        let Outcome::Forward(plan) = outcome else {
            panic!("expected forward");
        };
        assert_eq!(plan.class, RouteClass::Protected);
        assert_eq!(plan.target.path, "/spaces");
        assert_eq!(plan.pubkey, Some(pubkey));
    }

    #[tokio::test]
    async fn test_stale_token_is_auth_failed() {
        let (ctx, _) = signed_context(Method::GET, "/api/spaces", now().timestamp() - 300);

        let outcome = pipeline().evaluate(&ctx, now()).await;
        let Outcome::Rejected(error) = outcome else {
            panic!("expected rejection");
        };
        assert_eq!(error.code, ErrorCode::AuthFailed);
        assert_eq!(error.status().as_u16(), 401);
    }

    #[tokio::test]
    async fn test_garbage_header_is_invalid_auth() {
        let mut ctx = context(Method::GET, "/api/spaces");
        ctx.authorization = Some("Bearer token".to_string());

        let outcome = pipeline().evaluate(&ctx, now()).await;
        assert!(matches!(
            outcome,
            Outcome::Rejected(ApiError { code: ErrorCode::InvalidAuth, .. })
        ));
    }

    #[tokio::test]
    async fn test_token_for_plain_http_fails_over_tls() {
        let keys = keypair(7);
        let mut ctx = context(Method::GET, "/api/spaces");
        let token = signed_token(
            &keys,
            "http://gw.example/api/spaces",
            "GET",
            now().timestamp(),
        );
        ctx.authorization = Some(header_for(&token));

        let outcome = pipeline().evaluate(&ctx, now()).await;
        assert!(matches!(
            outcome,
            Outcome::Rejected(ApiError { code: ErrorCode::AuthFailed, .. })
        ));
    }

    #[tokio::test]
    async fn test_thirty_first_write_is_rate_limited() {
        let pipeline = pipeline();
        let (ctx, _) = signed_context(Method::POST, "/api/spaces", now().timestamp());

        for i in 1..=30 {
            let outcome = pipeline.evaluate(&ctx, now()).await;
            assert!(
                matches!(outcome, Outcome::Forward(_)),
                "request {i} should be forwarded"
            );
        }

        let outcome = pipeline.evaluate(&ctx, now()).await;
        let Outcome::Rejected(error) = outcome else {
            panic!("expected rejection");
        };
        assert_eq!(error.code, ErrorCode::RateLimited);
        assert_eq!(error.status().as_u16(), 429);
    }

    #[tokio::test]
    async fn test_rejected_auth_is_not_counted() {
        let store = Arc::new(MemoryCounterStore::new());
        let pipeline = pipeline_with(store.clone());
        let (ctx, _) = signed_context(Method::GET, "/api/spaces", now().timestamp() - 300);

        pipeline.evaluate(&ctx, now()).await;
        assert!(store.is_empty().await);
    }

    #[tokio::test]
    async fn test_anonymous_is_keyed_by_client_ip() {
        let store = Arc::new(MemoryCounterStore::new());
        let pipeline = pipeline_with(store.clone());

        let outcome = pipeline
            .evaluate(&context(Method::GET, "/api/spaces"), now())
            .await;
        let Outcome::Forward(plan) = outcome else {
            panic!("expected forward");
        };
        assert_eq!(plan.pubkey, None);

        let count = store
            .record_and_count(
                "ratelimit:read:anon:198.51.100.4",
                now().timestamp_millis(),
                Duration::from_secs(60),
            )
            .await
            .unwrap();
        assert_eq!(count, 2);
    }

    #[tokio::test]
    async fn test_public_mount_skips_auth_and_quota() {
        let store = Arc::new(MemoryCounterStore::new());
        let pipeline = pipeline_with(store.clone());
        let mut ctx = context(Method::GET, "/uploads/cat.png");
        ctx.authorization = Some("garbage".to_string());

        let outcome = pipeline.evaluate(&ctx, now()).await;
        let Outcome::Forward(plan) = outcome else {
            panic!("expected forward");
        };
        assert_eq!(plan.class, RouteClass::Public);
        assert_eq!(plan.target.path, "/uploads/cat.png");
        assert_eq!(plan.pubkey, None);
        assert!(store.is_empty().await);
    }

    #[tokio::test]
    async fn test_unmounted_path_is_not_routed() {
        let outcome = pipeline()
            .evaluate(&context(Method::GET, "/admin"), now())
            .await;
        assert_eq!(outcome, Outcome::NotRouted);
        assert_eq!(outcome.label(), "not_found");
    }
}
