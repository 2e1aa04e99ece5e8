/// Rate limit header stamping and login throttling
///
/// The admission layer runs the tenant-write limiter as part of its gate
/// chain; this module owns the HTTP-facing pieces around it: stamping
/// `X-RateLimit-*` response headers from a limiter decision, and the
/// standalone login-attempt throttle mounted on the auth routes.
///
/// # Headers
///
/// - `X-RateLimit-Limit`: requests allowed per window
/// - `X-RateLimit-Remaining`: requests left in the current window
/// - `X-RateLimit-Reset`: Unix timestamp (seconds) when the window ends
/// - `Retry-After`: seconds to wait (429 responses only, set by the error type)

use axum::{
    extract::{Request, State},
    http::HeaderValue,
    middleware::Next,
    response::Response,
};

use supportline_shared::ratelimit::RateLimitDecision;

use crate::app::AppState;
use crate::error::ApiError;

/// Stamps limiter metadata onto a response.
pub fn set_rate_limit_headers(response: &mut Response, decision: &RateLimitDecision) {
    let headers = response.headers_mut();
    if let Ok(v) = HeaderValue::from_str(&decision.limit.to_string()) {
        headers.insert("X-RateLimit-Limit", v);
    }
    if let Ok(v) = HeaderValue::from_str(&decision.remaining.to_string()) {
        headers.insert("X-RateLimit-Remaining", v);
    }
    if let Ok(v) = HeaderValue::from_str(&(decision.reset_at_ms / 1000).to_string()) {
        headers.insert("X-RateLimit-Reset", v);
    }
}

/// Login-attempt throttle, keyed by caller IP.
///
/// Mounted on the auth routes only. Unlike the tenant-write limiter this
/// never fails open; when the shared store is down it counts attempts in a
/// per-process fallback map.
pub async fn login_rate_limit_layer(
    State(state): State<AppState>,
    request: Request,
    next: Next,
) -> Result<Response, ApiError> {
    let ip = request
        .headers()
        .get("x-forwarded-for")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.split(',').next())
        .map(|v| v.trim().to_string())
        .unwrap_or_else(|| "unknown".to_string());

    let decision = state.login_limiter.check(&ip).await;
    if !decision.allowed {
        tracing::warn!(ip = %ip, "login attempt rate limited");
        return Err(ApiError::RateLimitExceeded {
            retry_after: decision.retry_after_secs,
            message: "Too many login attempts, try again later".to_string(),
        });
    }

    let mut response = next.run(request).await;
    set_rate_limit_headers(&mut response, &decision);
    Ok(response)
}
