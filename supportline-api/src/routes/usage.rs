/// Current-month usage and AI allowance
///
/// Read-only view over the usage ledger. The AI allowance block is derived
/// from the canonical m2 counter at read time; no separate AI counter is
/// stored, so this endpoint can never disagree with what the quota gate
/// enforces.
///
/// # Endpoint
///
/// ```text
/// GET /v1/usage
/// ```

use axum::{extract::State, Json};
use chrono::Utc;
use serde::{Deserialize, Serialize};

use supportline_shared::models::usage::month_key;
use supportline_shared::quota::AiQuotaSnapshot;

use crate::app::AppState;
use crate::error::{ApiError, ApiResult};
use crate::middleware::admission::context_from_request;

/// Usage response
#[derive(Debug, Serialize, Deserialize)]
pub struct UsageResponse {
    /// Ledger month, "YYYY-MM" UTC
    pub month: String,

    /// Conversations created this month
    pub conversations_created: i64,

    /// Messages sent this month
    pub messages_sent: i64,

    /// Human-authored messages this month
    pub human_messages: i64,

    /// Distinct automation-reached visitors this month
    pub automation_visitors: i64,

    /// AI allowance for the month
    pub ai: AiQuotaSnapshot,
}

/// Returns the tenant's current-month usage and AI allowance.
pub async fn get_usage(
    State(state): State<AppState>,
    req: axum::extract::Request,
) -> ApiResult<Json<UsageResponse>> {
    let ctx = context_from_request(&req, "usage.read");
    let tenant_id = ctx
        .tenant_id
        .ok_or_else(|| ApiError::NotFound("Tenant not found".to_string()))?;

    let tenant = state
        .tenants
        .find(tenant_id)
        .await
        .map_err(|e| ApiError::InternalError(format!("Tenant lookup failed: {}", e)))?
        .ok_or_else(|| ApiError::NotFound("Tenant not found".to_string()))?;

    let now = Utc::now();
    let month = month_key(now);
    let ledger = state
        .usage
        .get_for_month(tenant_id, &month)
        .await
        .map_err(|e| ApiError::InternalError(format!("Usage lookup failed: {}", e)))?;

    // Same fail-closed plan resolution as the quota gate.
    let plan = match state.plans.find(&tenant.plan_key).await {
        Ok(Some(plan)) => plan,
        Ok(None) | Err(_) => supportline_shared::models::plan::Plan::free_fallback(),
    };

    Ok(Json(UsageResponse {
        month,
        conversations_created: ledger.conversations_created,
        messages_sent: ledger.messages_sent,
        human_messages: ledger.m1_count,
        automation_visitors: ledger.m3_count,
        ai: AiQuotaSnapshot::derive(&ledger, &plan, now),
    }))
}
