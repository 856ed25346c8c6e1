// HTTP error envelope for the auth edge
// Domain errors are translated here exactly once; internals never leak.

use axum::{
    http::{header, HeaderValue, StatusCode},
    response::{IntoResponse, Json, Response},
};
use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::middleware::correlation::RequestContext;

/// Stable error codes surfaced in the envelope's `error` field.
/// Single scheme: `AUTH-NNN`.
pub mod codes {
    pub const INVALID_CREDENTIALS: &str = "AUTH-001";
    pub const USER_LOCKED: &str = "AUTH-002";
    pub const USER_DISABLED: &str = "AUTH-003";
    pub const USER_DELETED: &str = "AUTH-004";
    pub const RATE_LIMITED: &str = "AUTH-005";

    pub const JWT_INVALID: &str = "AUTH-010";
    pub const JWT_EXPIRED: &str = "AUTH-011";
    pub const JWT_UNKNOWN_KID: &str = "AUTH-012";
    pub const JWT_BAD_SIGNATURE: &str = "AUTH-013";
    pub const JWT_BAD_ISSUER: &str = "AUTH-014";
    pub const JWT_BAD_AUDIENCE: &str = "AUTH-015";
    pub const JWT_BAD_TYPE: &str = "AUTH-016";
    pub const JWT_MISSING_CLAIM: &str = "AUTH-017";

    pub const REFRESH_UNKNOWN: &str = "AUTH-020";
    pub const REFRESH_EXPIRED: &str = "AUTH-021";
    pub const REFRESH_REUSE: &str = "AUTH-022";

    pub const UNAUTHENTICATED: &str = "AUTH-030";
    pub const VALIDATION: &str = "AUTH-400";
    pub const INTERNAL: &str = "AUTH-500";
}

/// Wire shape of every error response.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ErrorEnvelope {
    pub timestamp: DateTime<Utc>,
    pub status: u16,
    pub error: String,
    pub path: String,
    pub correlation_id: String,
}

/// A fully-resolved API error, ready to render.
#[derive(Debug)]
pub struct ApiError {
    pub status: StatusCode,
    pub code: &'static str,
    pub retry_after_seconds: Option<u64>,
    pub path: String,
    pub correlation_id: String,
}

impl ApiError {
    pub fn new(status: StatusCode, code: &'static str, ctx: &RequestContext) -> Self {
        Self {
            status,
            code,
            retry_after_seconds: None,
            path: ctx.path.clone(),
            correlation_id: ctx.correlation_id.clone(),
        }
    }

    pub fn with_retry_after(mut self, seconds: u64) -> Self {
        self.retry_after_seconds = Some(seconds);
        self
    }

    pub fn unauthenticated(ctx: &RequestContext) -> Self {
        Self::new(StatusCode::UNAUTHORIZED, codes::UNAUTHENTICATED, ctx)
    }

    pub fn validation(ctx: &RequestContext) -> Self {
        Self::new(StatusCode::BAD_REQUEST, codes::VALIDATION, ctx)
    }

    pub fn internal(ctx: &RequestContext) -> Self {
        Self::new(StatusCode::INTERNAL_SERVER_ERROR, codes::INTERNAL, ctx)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let envelope = ErrorEnvelope {
            timestamp: Utc::now(),
            status: self.status.as_u16(),
            error: self.code.to_string(),
            path: self.path,
            correlation_id: self.correlation_id,
        };

        let mut response = (self.status, Json(envelope)).into_response();
        if let Some(seconds) = self.retry_after_seconds {
            if let Ok(value) = HeaderValue::from_str(&seconds.to_string()) {
                response.headers_mut().insert(header::RETRY_AFTER, value);
            }
        }
        response
    }
}

/// Structured log line for authentication failures.
pub fn log_auth_failure(username: &str, ip: &str, error_code: &str) {
    tracing::warn!(
        username = username,
        ip = ip,
        error_code = error_code,
        "authentication failure"
    );
}
