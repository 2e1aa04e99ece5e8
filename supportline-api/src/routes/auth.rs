/// Login endpoint
///
/// Credential verification itself is delegated to the identity provider at
/// the edge; this route exists to anchor the login-attempt throttle, which
/// is security-sensitive and therefore never fails open (see
/// `middleware::rate_limit`).
///
/// # Endpoint
///
/// ```text
/// POST /v1/auth/login
/// ```

use crate::error::{ApiError, ApiResult};
use axum::Json;
use serde::{Deserialize, Serialize};

/// Login request body
#[derive(Debug, Deserialize)]
pub struct LoginRequest {
    /// Account email
    pub email: String,
}

/// Login response
#[derive(Debug, Serialize, Deserialize)]
pub struct LoginResponse {
    /// Where the caller should continue the flow
    pub next: String,
}

/// Login handler: validates the request shape and hands off to the identity
/// provider. Throttling already happened in the layer above.
pub async fn login(Json(body): Json<LoginRequest>) -> ApiResult<Json<LoginResponse>> {
    if body.email.trim().is_empty() || !body.email.contains('@') {
        return Err(ApiError::BadRequest("A valid email is required".to_string()));
    }

    Ok(Json(LoginResponse {
        next: "identity_provider".to_string(),
    }))
}
