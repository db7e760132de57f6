//! Gateway configuration loaded from environment variables.
//!
//! # Configuration Hierarchy
//!
//! All configuration is loaded from environment variables with sensible defaults
//! for development. In production, configure via environment variables or a `.env` file.
//!
//! # Routing
//!
//! - `BACKEND_URL`: Base URL of the single backend (default: `http://localhost:3002`)
//! - `PROTECTED_PREFIX`: Mount that requires auth + quota, stripped before forwarding (default: `/api`)
//! - `PUBLIC_PREFIX`: Passthrough mount, forwarded unchanged (default: `/uploads`)
//!
//! # Authentication
//!
//! - `AUTH_MAX_CLOCK_SKEW_SECS`: Allowed distance between token `created_at` and now (default: 60)
//!
//! # Quotas
//!
//! - `REDIS_URL`: Shared counter store (default: `redis://localhost:6380`)
//! - `RATE_LIMIT_READ` / `RATE_LIMIT_WRITE` / `RATE_LIMIT_SEARCH`: Requests per window (100 / 30 / 10)
//! - `RATE_LIMIT_WINDOW_SECS`: Sliding window length (default: 60)
//! - `RATE_LIMIT_STORE_TIMEOUT_MS`: Bound on the store round trip before failing open (default: 250)

use std::env;
use std::time::Duration;

use axum::http::Uri;

use crate::error::{GatewayError, GatewayResult};
use crate::quota::QuotaLimits;

/// Log output format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LogFormat {
    /// Human-readable lines (default)
    #[default]
    Text,
    /// One JSON object per event
    Json,
}

/// Gateway configuration loaded from environment variables.
///
/// # Example
///
/// ```rust,ignore
/// let config = Config::from_env()?;
/// println!("Gateway will listen on {}", config.server_addr());
/// ```
#[derive(Debug, Clone)]
pub struct Config {
    // =========================================================================
    // Server Configuration
    // =========================================================================
    /// Server host address (default: "0.0.0.0")
    pub host: String,

    /// Server port (default: 9080)
    pub port: u16,

    // =========================================================================
    // Routing Configuration
    // =========================================================================
    /// Base URL of the backend every mount forwards to
    pub backend_url: String,

    /// Prefix of the protected mount (auth + quota, prefix stripped)
    pub protected_prefix: String,

    /// Prefix of the public mount (no auth, no quota, path unchanged)
    pub public_prefix: String,

    /// Timeout for a single forward to the backend (default: 30 seconds)
    pub upstream_timeout: Duration,

    // =========================================================================
    // Authentication Configuration
    // =========================================================================
    /// Maximum distance between a token's `created_at` and the gateway clock
    pub auth_max_clock_skew: Duration,

    // =========================================================================
    // Quota Configuration
    // =========================================================================
    /// Shared counter store connection string
    /// Format: "redis://[user:pass@]host:port[/db]"
    pub redis_url: String,

    /// Read requests allowed per window per subject (default: 100)
    pub rate_limit_read: u32,

    /// Write requests allowed per window per subject (default: 30)
    pub rate_limit_write: u32,

    /// Search requests allowed per window per subject (default: 10)
    pub rate_limit_search: u32,

    /// Sliding window length (default: 60 seconds)
    pub rate_limit_window: Duration,

    /// Bound on a single store round trip; exceeding it fails open
    pub rate_limit_store_timeout: Duration,

    // =========================================================================
    // Security Configuration
    // =========================================================================
    /// Comma-separated list of allowed CORS origins
    /// Use "*" to allow all origins (not recommended for production)
    pub cors_allowed_origins: Vec<String>,

    /// Trusted proxy CIDR ranges.
    ///
    /// `X-Forwarded-For`, `X-Real-IP` and `X-Forwarded-Proto` are only honoured
    /// when the TCP peer falls inside one of these networks.
    ///
    /// Format: Comma-separated CIDR notation (e.g., "10.0.0.0/8,172.16.0.0/12")
    /// Default: Empty (forwarding headers are ignored)
    pub trusted_proxies: Vec<String>,

    // =========================================================================
    // Observability Configuration
    // =========================================================================
    /// Log level (e.g., "info", "debug", "trace")
    pub log_level: String,

    /// Log output format ("text" or "json")
    pub log_format: LogFormat,

    /// Port for Prometheus metrics endpoint (default: 9090, 0 = disabled)
    pub metrics_port: u16,
}

impl Config {
    /// Load configuration from environment variables with sensible defaults.
    ///
    /// # Errors
    ///
    /// Returns `GatewayError::ConfigError` if any value fails to parse or
    /// the resulting configuration is inconsistent.
    pub fn from_env() -> GatewayResult<Self> {
        // Load an .env file if present (ignore errors if not found)
        let _ = dotenvy::dotenv();

        let config = Self {
            // Server
            host: env::var("HOST").unwrap_or_else(|_| "0.0.0.0".to_string()),
            port: Self::parse_env("GATEWAY_PORT", 9080)?,

            // Routing
            backend_url: env::var("BACKEND_URL")
                .unwrap_or_else(|_| "http://localhost:3002".to_string()),
            protected_prefix: env::var("PROTECTED_PREFIX").unwrap_or_else(|_| "/api".to_string()),
            public_prefix: env::var("PUBLIC_PREFIX").unwrap_or_else(|_| "/uploads".to_string()),
            upstream_timeout: Duration::from_secs(Self::parse_env("UPSTREAM_TIMEOUT_SECS", 30)?),

            // Authentication
            auth_max_clock_skew: Duration::from_secs(Self::parse_env(
                "AUTH_MAX_CLOCK_SKEW_SECS",
                60,
            )?),

            // Quotas
            redis_url: env::var("REDIS_URL")
                .unwrap_or_else(|_| "redis://localhost:6380".to_string()),
            rate_limit_read: Self::parse_env("RATE_LIMIT_READ", 100)?,
            rate_limit_write: Self::parse_env("RATE_LIMIT_WRITE", 30)?,
            rate_limit_search: Self::parse_env("RATE_LIMIT_SEARCH", 10)?,
            rate_limit_window: Duration::from_secs(Self::parse_env("RATE_LIMIT_WINDOW_SECS", 60)?),
            rate_limit_store_timeout: Duration::from_millis(Self::parse_env(
                "RATE_LIMIT_STORE_TIMEOUT_MS",
                250,
            )?),

            // Security
            cors_allowed_origins: Self::parse_list("CORS_ALLOWED_ORIGINS", "*"),
            trusted_proxies: Self::parse_list("TRUSTED_PROXIES", ""),

            // Observability
            log_level: env::var("RUST_LOG").unwrap_or_else(|_| "info".to_string()),
            log_format: Self::parse_log_format(env::var("LOG_FORMAT").ok().as_deref())?,
            metrics_port: Self::parse_env("METRICS_PORT", 9090)?,
        };

        // Validate configuration before returning
        config.validate()?;

        Ok(config)
    }

    /// Validate configuration values for consistency and correctness.
    ///
    /// # Errors
    ///
    /// Returns `GatewayError::ConfigError` if validation fails.
    pub fn validate(&self) -> GatewayResult<()> {
        let backend: Uri = self.backend_url.parse().map_err(|e| {
            GatewayError::ConfigError(format!("BACKEND_URL is not a valid URI: {e}"))
        })?;
        match backend.scheme_str() {
            Some("http") => {}
            Some(other) => {
                return Err(GatewayError::ConfigError(format!(
                    "BACKEND_URL scheme must be http, got {other}"
                )));
            }
            None => {
                return Err(GatewayError::ConfigError(
                    "BACKEND_URL must be absolute (e.g. http://backend:3002)".to_string(),
                ));
            }
        }
        if backend.authority().is_none() {
            return Err(GatewayError::ConfigError(
                "BACKEND_URL is missing a host".to_string(),
            ));
        }

        for (name, prefix) in [
            ("PROTECTED_PREFIX", &self.protected_prefix),
            ("PUBLIC_PREFIX", &self.public_prefix),
        ] {
            if !prefix.starts_with('/') || prefix.len() < 2 || prefix.ends_with('/') {
                return Err(GatewayError::ConfigError(format!(
                    "{name} must start with '/', be non-root and have no trailing slash (got {prefix:?})"
                )));
            }
        }
        if self.protected_prefix == self.public_prefix {
            return Err(GatewayError::ConfigError(
                "PROTECTED_PREFIX and PUBLIC_PREFIX must differ".to_string(),
            ));
        }
        let nested = |outer: &str, inner: &str| {
            inner
                .strip_prefix(outer)
                .is_some_and(|rest| rest.starts_with('/'))
        };
        if nested(&self.protected_prefix, &self.public_prefix)
            || nested(&self.public_prefix, &self.protected_prefix)
        {
            return Err(GatewayError::ConfigError(format!(
                "PROTECTED_PREFIX ({}) and PUBLIC_PREFIX ({}) must not nest",
                self.protected_prefix, self.public_prefix
            )));
        }
        if self.protected_prefix == "/health" || self.public_prefix == "/health" {
            return Err(GatewayError::ConfigError(
                "/health is reserved for the gateway health check".to_string(),
            ));
        }

        if self.rate_limit_window.is_zero() {
            return Err(GatewayError::ConfigError(
                "RATE_LIMIT_WINDOW_SECS must be greater than 0".to_string(),
            ));
        }
        if self.rate_limit_store_timeout.is_zero() {
            return Err(GatewayError::ConfigError(
                "RATE_LIMIT_STORE_TIMEOUT_MS must be greater than 0".to_string(),
            ));
        }
        if self.upstream_timeout.is_zero() {
            return Err(GatewayError::ConfigError(
                "UPSTREAM_TIMEOUT_SECS must be greater than 0".to_string(),
            ));
        }

        Ok(())
    }

    /// Get the full server address for binding.
    pub fn server_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// Per-category thresholds for the quota enforcer.
    pub fn quota_limits(&self) -> QuotaLimits {
        QuotaLimits {
            read: self.rate_limit_read,
            write: self.rate_limit_write,
            search: self.rate_limit_search,
        }
    }

    /// Check if Prometheus metrics export is enabled.
    pub fn metrics_enabled(&self) -> bool {
        self.metrics_port > 0
    }

    /// Get the metrics endpoint address.
    ///
    /// Returns `None` if metrics are disabled (port = 0).
    pub fn metrics_addr(&self) -> Option<std::net::SocketAddr> {
        if self.metrics_enabled() {
            Some(std::net::SocketAddr::from((
                [0, 0, 0, 0],
                self.metrics_port,
            )))
        } else {
            None
        }
    }

    /// Parse an environment variable into the specified type with a default value.
    fn parse_env<T>(name: &str, default: T) -> GatewayResult<T>
    where
        T: std::str::FromStr,
        T::Err: std::fmt::Display,
    {
        match env::var(name) {
            Ok(val) => val
                .trim()
                .parse()
                .map_err(|e| GatewayError::ConfigError(format!("Invalid {name}: {e}"))),
            Err(_) => Ok(default),
        }
    }

    /// Parse a comma-separated list, dropping empty entries.
    fn parse_list(name: &str, default: &str) -> Vec<String> {
        env::var(name)
            .unwrap_or_else(|_| default.to_string())
            .split(',')
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .collect()
    }

    fn parse_log_format(value: Option<&str>) -> GatewayResult<LogFormat> {
        match value.map(|v| v.trim().to_ascii_lowercase()) {
            None => Ok(LogFormat::Text),
            Some(v) if v.is_empty() || v == "text" => Ok(LogFormat::Text),
            Some(v) if v == "json" => Ok(LogFormat::Json),
            Some(v) => Err(GatewayError::ConfigError(format!(
                "Invalid LOG_FORMAT: {v} (expected text or json)"
            ))),
        }
    }
}

/// Default configuration for testing and development.
///
/// Production deployments should use `Config::from_env()` instead.
impl Default for Config {
    fn default() -> Self {
        Self {
            // Server
            host: "0.0.0.0".to_string(),
            port: 9080,
            // Routing
            backend_url: "http://localhost:3002".to_string(),
            protected_prefix: "/api".to_string(),
            public_prefix: "/uploads".to_string(),
            upstream_timeout: Duration::from_secs(30),
            // Authentication
            auth_max_clock_skew: Duration::from_secs(60),
            // Quotas
            redis_url: "redis://localhost:6380".to_string(),
            rate_limit_read: 100,
            rate_limit_write: 30,
            rate_limit_search: 10,
            rate_limit_window: Duration::from_secs(60),
            rate_limit_store_timeout: Duration::from_millis(250),
            // Security
            cors_allowed_origins: vec!["*".to_string()],
            trusted_proxies: vec![],
            // Observability
            log_level: "info".to_string(),
            log_format: LogFormat::Text,
            metrics_port: 9090,
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_values() {
        let config = Config::default();

        assert_eq!(config.port, 9080);
        assert_eq!(config.protected_prefix, "/api");
        assert_eq!(config.public_prefix, "/uploads");
        assert_eq!(config.rate_limit_window, Duration::from_secs(60));
        assert_eq!(config.auth_max_clock_skew, Duration::from_secs(60));
    }

    #[test]
    fn test_default_quota_limits() {
        let limits = Config::default().quota_limits();
        assert_eq!(limits.read, 100);
        assert_eq!(limits.write, 30);
        assert_eq!(limits.search, 10);
    }

    #[test]
    fn test_server_addr_format() {
        let config = Config {
            host: "127.0.0.1".to_string(),
            port: 8080,
            ..Config::default()
        };

        assert_eq!(config.server_addr(), "127.0.0.1:8080");
    }

    #[test]
    fn test_validate_valid_config() {
        assert!(Config::default().validate().is_ok());
    }

    #[test]
    fn test_validate_rejects_relative_backend() {
        let config = Config {
            backend_url: "/not-absolute".to_string(),
            ..Config::default()
        };

        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("BACKEND_URL"));
    }

    #[test]
    fn test_validate_rejects_https_backend() {
        let config = Config {
            backend_url: "https://backend.internal".to_string(),
            ..Config::default()
        };

        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_rejects_trailing_slash_prefix() {
        let config = Config {
            protected_prefix: "/api/".to_string(),
            ..Config::default()
        };

        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("PROTECTED_PREFIX"));
    }

    #[test]
    fn test_validate_rejects_identical_prefixes() {
        let config = Config {
            public_prefix: "/api".to_string(),
            ..Config::default()
        };

        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_rejects_nested_prefixes() {
        let public_inside = Config {
            public_prefix: "/api/uploads".to_string(),
            ..Config::default()
        };
        assert!(public_inside.validate().is_err());

        let protected_inside = Config {
            protected_prefix: "/uploads/private".to_string(),
            ..Config::default()
        };
        assert!(protected_inside.validate().is_err());

        // Sharing leading characters is not nesting
        let siblings = Config {
            public_prefix: "/apifiles".to_string(),
            ..Config::default()
        };
        assert!(siblings.validate().is_ok());
    }

    #[test]
    fn test_validate_rejects_zero_window() {
        let config = Config {
            rate_limit_window: Duration::ZERO,
            ..Config::default()
        };

        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("RATE_LIMIT_WINDOW_SECS"));
    }

    #[test]
    fn test_parse_log_format() {
        assert_eq!(Config::parse_log_format(None).unwrap(), LogFormat::Text);
        assert_eq!(
            Config::parse_log_format(Some("JSON")).unwrap(),
            LogFormat::Json
        );
        assert!(Config::parse_log_format(Some("xml")).is_err());
    }

    #[test]
    fn test_metrics_addr_disabled() {
        let config = Config {
            metrics_port: 0,
            ..Config::default()
        };
        assert!(config.metrics_addr().is_none());
    }
}
