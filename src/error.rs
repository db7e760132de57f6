use axum::http::{HeaderValue, StatusCode, header};
use axum::response::{IntoResponse, Response};
use serde::Serialize;
use thiserror::Error;

/// Configuration failures.
///
/// Request-scoped failures never use this type; they are expressed as an
/// [`ApiError`] with a stable [`ErrorCode`].
#[derive(Error, Debug)]
pub enum GatewayError {
    #[error("Configuration error: {0}")]
    ConfigError(String),
}

/// Convenience type alias for Results with GatewayError.
pub type GatewayResult<T> = Result<T, GatewayError>;

/// Machine-readable error codes returned in the `code` field of error bodies.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    /// The `Authorization` header could not be decoded into a token.
    InvalidAuth,
    /// The token decoded but failed protocol verification.
    AuthFailed,
    /// The caller exhausted its quota for the request category.
    RateLimited,
    /// No mount matches the request path.
    NotFound,
    /// The backend could not be reached.
    UpstreamUnavailable,
    /// The backend did not answer within the upstream timeout.
    UpstreamTimeout,
}

impl ErrorCode {
    /// HTTP status paired with this code.
    pub fn status(self) -> StatusCode {
        match self {
            ErrorCode::InvalidAuth | ErrorCode::AuthFailed => StatusCode::UNAUTHORIZED,
            ErrorCode::RateLimited => StatusCode::TOO_MANY_REQUESTS,
            ErrorCode::NotFound => StatusCode::NOT_FOUND,
            ErrorCode::UpstreamUnavailable => StatusCode::BAD_GATEWAY,
            ErrorCode::UpstreamTimeout => StatusCode::GATEWAY_TIMEOUT,
        }
    }

    /// Wire representation, identical to the serialized form.
    pub fn as_str(self) -> &'static str {
        match self {
            ErrorCode::InvalidAuth => "INVALID_AUTH",
            ErrorCode::AuthFailed => "AUTH_FAILED",
            ErrorCode::RateLimited => "RATE_LIMITED",
            ErrorCode::NotFound => "NOT_FOUND",
            ErrorCode::UpstreamUnavailable => "UPSTREAM_UNAVAILABLE",
            ErrorCode::UpstreamTimeout => "UPSTREAM_TIMEOUT",
        }
    }
}

/// Error response body for gateway rejections.
///
/// ```json
/// {"error": "rate limit exceeded", "code": "RATE_LIMITED"}
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ErrorBody {
    pub error: String,
    pub code: ErrorCode,
}

/// A terminal, client-visible failure produced by the gateway itself.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ApiError {
    pub code: ErrorCode,
    pub message: String,
}

impl ApiError {
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }

    pub fn status(&self) -> StatusCode {
        self.code.status()
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        let challenge = status == StatusCode::UNAUTHORIZED;
        let body = ErrorBody {
            error: self.message,
            code: self.code,
        };

        let mut response = (status, axum::Json(body)).into_response();
        if challenge {
            response
                .headers_mut()
                .insert(header::WWW_AUTHENTICATE, HeaderValue::from_static("Nostr"));
        }
        response
    }
}
