/// Error handling for the API server
///
/// This module provides a unified error type that maps to HTTP responses.
/// All handlers should return `Result<T, ApiError>` which automatically
/// converts to appropriate HTTP status codes.
///
/// Admission denials are not handler errors: the middleware converts an
/// [`AdmissionDecision`] into the matching `ApiError` via [`ApiError::from_denial`]
/// so every denial carries its machine-readable code and, for rate limits,
/// a `Retry-After` header.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::{Deserialize, Serialize};
use std::fmt;

use supportline_shared::context::{AdmissionDecision, DenyCode};

/// API result type alias
pub type ApiResult<T> = Result<T, ApiError>;

/// Unified API error type
#[derive(Debug)]
pub enum ApiError {
    /// Bad request (400)
    BadRequest(String),

    /// Payment required (402) - billing and quota denials
    PaymentRequired {
        code: &'static str,
        message: String,
        retry_at: Option<chrono::DateTime<chrono::Utc>>,
    },

    /// Forbidden (403)
    Forbidden(String),

    /// Not found (404)
    NotFound(String),

    /// Too many requests (429)
    RateLimitExceeded { retry_after: u64, message: String },

    /// Internal server error (500)
    InternalError(String),

    /// Service unavailable (503)
    ServiceUnavailable(String),
}

/// Error response format
#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorResponse {
    /// Error code (e.g., "RATE_LIMITED", "BILLING_LOCKED")
    pub error: String,

    /// Human-readable error message
    pub message: String,

    /// When the denial lifts, if known
    #[serde(skip_serializing_if = "Option::is_none")]
    pub retry_at: Option<chrono::DateTime<chrono::Utc>>,
}

impl fmt::Display for ApiError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ApiError::BadRequest(msg) => write!(f, "Bad request: {}", msg),
            ApiError::PaymentRequired { code, message, .. } => {
                write!(f, "Payment required ({}): {}", code, message)
            }
            ApiError::Forbidden(msg) => write!(f, "Forbidden: {}", msg),
            ApiError::NotFound(msg) => write!(f, "Not found: {}", msg),
            ApiError::RateLimitExceeded { message, .. } => {
                write!(f, "Rate limit exceeded: {}", message)
            }
            ApiError::InternalError(msg) => write!(f, "Internal error: {}", msg),
            ApiError::ServiceUnavailable(msg) => write!(f, "Service unavailable: {}", msg),
        }
    }
}

impl std::error::Error for ApiError {}

impl ApiError {
    /// Maps a denied admission decision to the HTTP error surface.
    ///
    /// Rate limits become 429 with `Retry-After`; billing and quota denials
    /// become 402 carrying their stable code; a missing tenant on a primary
    /// write gate is a plain 404.
    pub fn from_denial(decision: AdmissionDecision) -> Self {
        let code = match decision.code {
            Some(code) => code,
            // Denied with no code should not happen; treat as internal.
            None => return ApiError::InternalError("admission denied without code".to_string()),
        };

        match code {
            DenyCode::RateLimited => ApiError::RateLimitExceeded {
                retry_after: decision.retry_after_secs.unwrap_or(60),
                message: decision.message,
            },
            DenyCode::TenantNotFound => ApiError::NotFound(decision.message),
            DenyCode::BillingLocked
            | DenyCode::BillingGrace
            | DenyCode::SubscriptionInactive
            | DenyCode::TrialExpired
            | DenyCode::QuotaM2Exceeded
            | DenyCode::QuotaM3Exceeded => ApiError::PaymentRequired {
                code: code.as_str(),
                message: decision.message,
                retry_at: decision.resets_at,
            },
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        // Handle rate limit separately to add Retry-After header
        if let ApiError::RateLimitExceeded {
            retry_after,
            message,
        } = &self
        {
            let body = Json(ErrorResponse {
                error: DenyCode::RateLimited.as_str().to_string(),
                message: message.clone(),
                retry_at: None,
            });

            let mut response = (StatusCode::TOO_MANY_REQUESTS, body).into_response();
            if let Ok(value) = axum::http::HeaderValue::from_str(&retry_after.to_string()) {
                response.headers_mut().insert("Retry-After", value);
            }
            return response;
        }

        let (status, error_code, message, retry_at) = match self {
            ApiError::BadRequest(msg) => (StatusCode::BAD_REQUEST, "BAD_REQUEST", msg, None),
            ApiError::PaymentRequired {
                code,
                message,
                retry_at,
            } => (StatusCode::PAYMENT_REQUIRED, code, message, retry_at),
            ApiError::Forbidden(msg) => (StatusCode::FORBIDDEN, "FORBIDDEN", msg, None),
            ApiError::NotFound(msg) => (StatusCode::NOT_FOUND, "NOT_FOUND", msg, None),
            ApiError::RateLimitExceeded { message, .. } => (
                StatusCode::TOO_MANY_REQUESTS,
                DenyCode::RateLimited.as_str(),
                message,
                None,
            ),
            ApiError::InternalError(msg) => {
                // Log internal errors but don't expose details to clients
                tracing::error!("Internal error: {}", msg);
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "INTERNAL_ERROR",
                    "An internal error occurred".to_string(),
                    None,
                )
            }
            ApiError::ServiceUnavailable(msg) => {
                (StatusCode::SERVICE_UNAVAILABLE, "SERVICE_UNAVAILABLE", msg, None)
            }
        };

        let body = Json(ErrorResponse {
            error: error_code.to_string(),
            message,
            retry_at,
        });

        (status, body).into_response()
    }
}

/// Convert reply-generation errors to API errors
impl From<supportline_shared::ai::ReplyError> for ApiError {
    fn from(err: supportline_shared::ai::ReplyError) -> Self {
        use supportline_shared::ai::ReplyError;
        match err {
            ReplyError::ContentFiltered => {
                ApiError::BadRequest("Reply was filtered by the provider".to_string())
            }
            ReplyError::Timeout | ReplyError::Unavailable => {
                ApiError::ServiceUnavailable("AI reply provider unavailable".to_string())
            }
            ReplyError::Provider(msg) => {
                ApiError::InternalError(format!("Reply provider error: {}", msg))
            }
        }
    }
}

/// Convert sqlx errors to API errors
impl From<sqlx::Error> for ApiError {
    fn from(err: sqlx::Error) -> Self {
        match err {
            sqlx::Error::RowNotFound => ApiError::NotFound("Resource not found".to_string()),
            _ => ApiError::InternalError(format!("Database error: {}", err)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = ApiError::BadRequest("Invalid input".to_string());
        assert_eq!(err.to_string(), "Bad request: Invalid input");

        let err = ApiError::NotFound("Tenant not found".to_string());
        assert_eq!(err.to_string(), "Not found: Tenant not found");
    }

    #[test]
    fn test_rate_limit_denial_maps_to_429() {
        let decision =
            AdmissionDecision::deny(DenyCode::RateLimited, "Too many requests").with_retry_after(17);
        match ApiError::from_denial(decision) {
            ApiError::RateLimitExceeded { retry_after, .. } => assert_eq!(retry_after, 17),
            other => panic!("expected rate limit error, got {:?}", other),
        }
    }

    #[test]
    fn test_quota_denial_maps_to_402_with_code() {
        let decision = AdmissionDecision::deny(DenyCode::QuotaM2Exceeded, "AI reply limit reached");
        match ApiError::from_denial(decision) {
            ApiError::PaymentRequired { code, .. } => assert_eq!(code, "QUOTA_M2_EXCEEDED"),
            other => panic!("expected payment required, got {:?}", other),
        }
    }

    #[test]
    fn test_missing_tenant_maps_to_404() {
        let decision = AdmissionDecision::deny(DenyCode::TenantNotFound, "Tenant not found");
        assert!(matches!(
            ApiError::from_denial(decision),
            ApiError::NotFound(_)
        ));
    }
}
