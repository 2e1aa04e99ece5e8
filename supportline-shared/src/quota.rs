/// Quota evaluation
///
/// Resolves whether a tenant may consume one more unit of a metered metric.
/// Checks run in a fixed order and the first failure wins:
///
/// 1. Trial expiry (free plan with an explicit, expired trial; the free
///    tier without trial dates is permanent)
/// 2. Subscription state (enforced tenants outside active/trialing and past
///    any grace window)
/// 3. The metric's plan cap
///
/// Plan resolution fails closed: an unknown plan key or an unreadable plans
/// table resolves to the hard-coded free tier, never to unlimited.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::billing::is_write_blocked;
use crate::context::DenyCode;
use crate::models::plan::{Plan, PlanSource};
use crate::models::tenant::Tenant;
use crate::models::usage::{month_key, month_resets_at, UsageLedger, UsageMetric, UsageStore};

/// Quota evaluation errors
#[derive(thiserror::Error, Debug)]
pub enum QuotaError {
    /// Usage ledger unreadable
    #[error(transparent)]
    Usage(#[from] crate::models::usage::UsageError),
}

/// Outcome of a quota check for one metric.
#[derive(Debug, Clone)]
pub struct Entitlement {
    /// Whether one more unit may be consumed
    pub allowed: bool,

    /// Denial code when not allowed
    pub code: Option<DenyCode>,

    /// Current usage for the metric
    pub used: i64,

    /// Plan limit, `None` meaning unlimited
    pub limit: Option<i64>,

    /// When the usage window resets
    pub resets_at: DateTime<Utc>,
}

impl Entitlement {
    fn allowed(used: i64, limit: Option<i64>, resets_at: DateTime<Utc>) -> Self {
        Self {
            allowed: true,
            code: None,
            used,
            limit,
            resets_at,
        }
    }

    fn denied(code: DenyCode, used: i64, limit: Option<i64>, resets_at: DateTime<Utc>) -> Self {
        Self {
            allowed: false,
            code: Some(code),
            used,
            limit,
            resets_at,
        }
    }
}

/// Resolves plan caps against the usage ledger.
pub struct QuotaEvaluator {
    plans: Arc<dyn PlanSource>,
    usage: Arc<dyn UsageStore>,
}

impl QuotaEvaluator {
    /// Creates an evaluator over plan and usage sources.
    pub fn new(plans: Arc<dyn PlanSource>, usage: Arc<dyn UsageStore>) -> Self {
        Self { plans, usage }
    }

    /// Resolves the tenant's plan, falling back to the free tier when the key
    /// is unknown or the lookup fails.
    pub async fn resolve_plan(&self, tenant: &Tenant) -> Plan {
        match self.plans.find(&tenant.plan_key).await {
            Ok(Some(plan)) => plan,
            Ok(None) => {
                tracing::warn!(
                    tenant_id = %tenant.id,
                    plan_key = %tenant.plan_key,
                    "unknown plan key, falling back to free limits"
                );
                Plan::free_fallback()
            }
            Err(e) => {
                tracing::warn!(
                    tenant_id = %tenant.id,
                    error = %e,
                    "plan lookup failed, falling back to free limits"
                );
                Plan::free_fallback()
            }
        }
    }

    /// Whether the tenant may consume one more unit of `metric` at `now`.
    pub async fn check_entitlement(
        &self,
        tenant: &Tenant,
        metric: UsageMetric,
        now: DateTime<Utc>,
    ) -> Result<Entitlement, QuotaError> {
        let resets_at = month_resets_at(now);

        // Trial expiry gates everything else. It only applies on the free
        // plan: a free tenant without explicit trial dates is permanent, and
        // a paid tenant with stale trial dates falls through to the
        // subscription check below.
        if tenant.is_free_plan() && tenant.trial_expired(now) {
            return Ok(Entitlement::denied(
                DenyCode::TrialExpired,
                0,
                None,
                resets_at,
            ));
        }

        // Subscription state, past any grace window.
        if is_write_blocked(tenant, now) {
            return Ok(Entitlement::denied(
                DenyCode::SubscriptionInactive,
                0,
                None,
                resets_at,
            ));
        }

        let plan = self.resolve_plan(tenant).await;
        let limit = plan.limit_for(metric);

        let month = month_key(now);
        let ledger = self.usage.get_for_month(tenant.id, &month).await?;
        let mut used = ledger.count(metric);

        match limit {
            None => Ok(Entitlement::allowed(used, None, resets_at)),
            Some(limit) => {
                if used > limit {
                    // Overage left behind by a non-capped writer or a plan
                    // downgrade; repair on read.
                    self.usage
                        .clamp_overage(tenant.id, &month, metric, limit)
                        .await?;
                    used = limit;
                }

                if used >= limit {
                    let code = match metric {
                        UsageMetric::M3 => DenyCode::QuotaM3Exceeded,
                        _ => DenyCode::QuotaM2Exceeded,
                    };
                    Ok(Entitlement::denied(code, used, Some(limit), resets_at))
                } else {
                    Ok(Entitlement::allowed(used, Some(limit), resets_at))
                }
            }
        }
    }
}

/// Read-only view of a tenant's AI-reply allowance for the current month.
///
/// Derived from the ledger on demand; nothing writes this shape back, so it
/// can never drift from the canonical m2 counter.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AiQuotaSnapshot {
    /// AI replies generated this calendar month
    pub current_month_ai_messages: i64,

    /// Plan cap on AI replies, `None` meaning unlimited
    pub ai_messages_limit: Option<i64>,

    /// When the month's counter resets
    pub ai_messages_reset_date: DateTime<Utc>,
}

impl AiQuotaSnapshot {
    /// Derives the snapshot from a ledger row and the resolved plan.
    pub fn derive(ledger: &UsageLedger, plan: &Plan, now: DateTime<Utc>) -> Self {
        Self {
            current_month_ai_messages: ledger.m2_count,
            ai_messages_limit: plan.limit_for(UsageMetric::M2),
            ai_messages_reset_date: month_resets_at(now),
        }
    }
}
