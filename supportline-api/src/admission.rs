/// Write-path admission control
///
/// Every mutating request passes through [`AdmissionService::admit`] before
/// it touches business data: rate limiter first, then tenant resolution, the
/// manual kill switch, the billing lock, and finally the quota evaluator.
/// The first gate to deny wins and the rest are skipped.
///
/// The service never returns an error to the middleware: infrastructure
/// failures map to each gate's fallback policy (the limiter admits, plan
/// resolution falls back to free limits, a tenant read failure admits with a
/// warning) so the request pipeline can always produce a response.
///
/// Bypass rules: operator and trusted internal-automation callers skip the
/// rate limiter and the billing lock. The per-tenant `write_enabled` kill
/// switch is a separate gate and applies even to those callers unless the
/// service is built with the explicit operator override.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use uuid::Uuid;

use supportline_shared::billing::{BillingGuard, LockReason};
use supportline_shared::context::{AdmissionDecision, CallerAuthority, DenyCode, RequestContext};
use supportline_shared::models::tenant::{Tenant, TenantStore};
use supportline_shared::models::usage::{
    month_key, record_automation_visitor, UsageMetric, UsageStore,
};
use supportline_shared::quota::QuotaEvaluator;
use supportline_shared::ratelimit::{FixedWindowLimiter, RateLimitDecision};

/// A mutating action subject to admission control.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WriteAction {
    /// Opening a new conversation
    CreateConversation,

    /// A human (visitor or agent) sending a message
    SendHumanMessage,

    /// Generating an AI reply (consumes M2)
    GenerateAiReply,

    /// An automation run reaching a visitor (consumes M3, deduplicated)
    AutomationTouch {
        /// Stable visitor identity for dedupe
        visitor_key: String,
    },
}

impl WriteAction {
    /// The metered metric this action consumes.
    pub fn metric(&self) -> UsageMetric {
        match self {
            WriteAction::CreateConversation => UsageMetric::ConversationsCreated,
            WriteAction::SendHumanMessage => UsageMetric::M1,
            WriteAction::GenerateAiReply => UsageMetric::M2,
            WriteAction::AutomationTouch { .. } => UsageMetric::M3,
        }
    }
}

/// A decision plus the limiter metadata behind it.
#[derive(Debug, Clone)]
pub struct AdmissionOutcome {
    /// The admit/deny decision
    pub decision: AdmissionDecision,

    /// Limiter state for this request, absent when the caller bypassed it
    pub rate: Option<RateLimitDecision>,
}

/// Tuning knobs for the admission service.
#[derive(Debug, Clone)]
pub struct AdmissionSettings {
    /// Requests admitted per key per window
    pub rate_limit: u32,

    /// Fixed-window length
    pub rate_window: Duration,

    /// Whether operator callers may write through a disabled kill switch
    pub operator_overrides_kill_switch: bool,
}

impl Default for AdmissionSettings {
    fn default() -> Self {
        Self {
            rate_limit: 60,
            rate_window: Duration::from_secs(60),
            operator_overrides_kill_switch: false,
        }
    }
}

/// The admission gate chain.
///
/// Holds trait objects only, so tests drive it entirely with in-memory
/// stores.
pub struct AdmissionService {
    limiter: FixedWindowLimiter,
    guard: BillingGuard,
    evaluator: QuotaEvaluator,
    tenants: Arc<dyn TenantStore>,
    usage: Arc<dyn UsageStore>,
    settings: AdmissionSettings,
}

impl AdmissionService {
    /// Wires the gate chain over its stores.
    pub fn new(
        limiter: FixedWindowLimiter,
        guard: BillingGuard,
        evaluator: QuotaEvaluator,
        tenants: Arc<dyn TenantStore>,
        usage: Arc<dyn UsageStore>,
        settings: AdmissionSettings,
    ) -> Self {
        Self {
            limiter,
            guard,
            evaluator,
            tenants,
            usage,
            settings,
        }
    }

    /// Runs the full gate chain for one request.
    pub async fn admit(&self, ctx: &RequestContext, action: &WriteAction) -> AdmissionDecision {
        self.admit_at(ctx, action, Utc::now()).await
    }

    /// Clock-injected variant of [`admit`](Self::admit) for tests.
    pub async fn admit_at(
        &self,
        ctx: &RequestContext,
        action: &WriteAction,
        now: DateTime<Utc>,
    ) -> AdmissionDecision {
        self.evaluate_at(ctx, action, now).await.decision
    }

    /// Like [`admit`](Self::admit), but also returns the limiter metadata so
    /// the HTTP layer can stamp `X-RateLimit-*` headers.
    pub async fn evaluate(&self, ctx: &RequestContext, action: &WriteAction) -> AdmissionOutcome {
        self.evaluate_at(ctx, action, Utc::now()).await
    }

    async fn evaluate_at(
        &self,
        ctx: &RequestContext,
        action: &WriteAction,
        now: DateTime<Utc>,
    ) -> AdmissionOutcome {
        let mut rate = None;
        if !ctx.authority.bypasses_rate_limit() {
            let outcome = self
                .limiter
                .admit_at(
                    &ctx.rate_limit_key(),
                    self.settings.rate_limit,
                    self.settings.rate_window,
                    now.timestamp_millis(),
                )
                .await;
            if !outcome.allowed {
                return AdmissionOutcome {
                    decision: AdmissionDecision::deny(
                        DenyCode::RateLimited,
                        "Too many requests, slow down",
                    )
                    .with_retry_after(outcome.retry_after_secs),
                    rate: Some(outcome),
                };
            }
            rate = Some(outcome);
        }

        AdmissionOutcome {
            decision: self.check_tenant_gates(ctx, action, now).await,
            rate,
        }
    }

    async fn check_tenant_gates(
        &self,
        ctx: &RequestContext,
        action: &WriteAction,
        now: DateTime<Utc>,
    ) -> AdmissionDecision {

        // Admission is the primary gate of a write, so a missing tenant is a
        // denial, not an enrichment miss.
        let tenant_id = match ctx.tenant_id {
            Some(id) => id,
            None => {
                return AdmissionDecision::deny(DenyCode::TenantNotFound, "Tenant not found");
            }
        };
        let tenant = match self.tenants.find(tenant_id).await {
            Ok(Some(tenant)) => tenant,
            Ok(None) => {
                return AdmissionDecision::deny(DenyCode::TenantNotFound, "Tenant not found");
            }
            Err(e) => {
                // An unreadable tenant row must not take down unrelated
                // requests; admit and let the write path's own persistence
                // surface the real failure.
                tracing::warn!(tenant_id = %tenant_id, error = %e, "tenant lookup failed, admitting");
                return AdmissionDecision::allow();
            }
        };

        if let Some(denial) = self.check_kill_switch(&tenant, ctx.authority) {
            return denial;
        }

        if !ctx.authority.bypasses_billing_lock() {
            let status = self.guard.check(&tenant, now).await;
            if status.locked {
                let mut decision = match status.reason {
                    LockReason::Grace => AdmissionDecision::deny(
                        DenyCode::BillingGrace,
                        "Your subscription is past due; update billing to keep write access",
                    ),
                    _ => AdmissionDecision::deny(
                        DenyCode::BillingLocked,
                        "Workspace is locked due to billing; update billing to restore access",
                    ),
                };
                if let Some(ends_at) = status.grace_ends_at {
                    decision = decision.with_resets_at(ends_at);
                }
                return decision;
            }
        }

        match self
            .evaluator
            .check_entitlement(&tenant, action.metric(), now)
            .await
        {
            Ok(ent) if ent.allowed => AdmissionDecision::allow(),
            Ok(ent) => {
                let code = ent.code.unwrap_or(DenyCode::SubscriptionInactive);
                let mut decision =
                    AdmissionDecision::deny(code, denial_message(code)).with_resets_at(ent.resets_at);
                if let Some(limit) = ent.limit {
                    decision = decision.with_usage(ent.used, limit);
                }
                decision
            }
            Err(e) => {
                // Ledger unreadable: the caps themselves already resolved
                // against free-tier limits at worst, and denying here would
                // turn a metering outage into a write outage.
                tracing::warn!(tenant_id = %tenant.id, error = %e, "usage lookup failed, admitting");
                AdmissionDecision::allow()
            }
        }
    }

    /// The manual kill switch, evaluated independently of billing bypass.
    fn check_kill_switch(
        &self,
        tenant: &Tenant,
        authority: CallerAuthority,
    ) -> Option<AdmissionDecision> {
        if tenant.write_enabled {
            return None;
        }
        if authority == CallerAuthority::Operator && self.settings.operator_overrides_kill_switch {
            tracing::info!(tenant_id = %tenant.id, "operator override through disabled kill switch");
            return None;
        }
        Some(AdmissionDecision::deny(
            DenyCode::BillingLocked,
            "Writes are disabled for this workspace",
        ))
    }

    /// Records consumption after the write succeeded.
    ///
    /// Capped metrics go through the conditional increment so concurrent
    /// writers can never push a counter past its limit even after all of
    /// them were admitted; analytics metrics are unconditional upserts.
    pub async fn record(&self, tenant_id: Uuid, action: &WriteAction, now: DateTime<Utc>) {
        let month = month_key(now);
        let result = match action {
            WriteAction::CreateConversation => {
                self.usage
                    .record(tenant_id, &month, UsageMetric::ConversationsCreated, 1)
                    .await
            }
            WriteAction::SendHumanMessage => {
                let recorded = self
                    .usage
                    .record(tenant_id, &month, UsageMetric::MessagesSent, 1)
                    .await;
                match recorded {
                    Ok(()) => self.usage.record(tenant_id, &month, UsageMetric::M1, 1).await,
                    Err(e) => Err(e),
                }
            }
            WriteAction::GenerateAiReply => {
                let recorded = self
                    .usage
                    .record(tenant_id, &month, UsageMetric::MessagesSent, 1)
                    .await;
                match recorded {
                    Ok(()) => self.record_capped(tenant_id, &month, UsageMetric::M2).await,
                    Err(e) => Err(e),
                }
            }
            WriteAction::AutomationTouch { visitor_key } => {
                let limit = self.capped_limit(tenant_id, UsageMetric::M3).await;
                record_automation_visitor(
                    self.usage.as_ref(),
                    tenant_id,
                    &month,
                    visitor_key,
                    limit,
                )
                .await
                .map(|_| ())
            }
        };

        if let Err(e) = result {
            // Consumption tracking is best-effort after the write landed.
            tracing::warn!(tenant_id = %tenant_id, error = %e, "failed to record usage");
        }
    }

    async fn record_capped(
        &self,
        tenant_id: Uuid,
        month: &str,
        metric: UsageMetric,
    ) -> Result<(), supportline_shared::models::usage::UsageError> {
        match self.capped_limit(tenant_id, metric).await {
            None => self.usage.record(tenant_id, month, metric, 1).await,
            Some(limit) => {
                let accepted = self
                    .usage
                    .try_increment_capped(tenant_id, month, metric, limit)
                    .await?;
                if !accepted {
                    // Lost the race for the last slot after admission; the
                    // counter holds at the limit, which is the invariant that
                    // matters.
                    tracing::debug!(tenant_id = %tenant_id, ?metric, "capped increment rejected at limit");
                }
                Ok(())
            }
        }
    }

    /// Resolves the plan cap for a capped metric, free-fallback included.
    async fn capped_limit(&self, tenant_id: Uuid, metric: UsageMetric) -> Option<i64> {
        match self.tenants.find(tenant_id).await {
            Ok(Some(tenant)) => self.evaluator.resolve_plan(&tenant).await.limit_for(metric),
            _ => supportline_shared::models::plan::Plan::free_fallback().limit_for(metric),
        }
    }
}

fn denial_message(code: DenyCode) -> &'static str {
    match code {
        DenyCode::TrialExpired => "Your trial has ended; choose a plan to continue",
        DenyCode::SubscriptionInactive => "Your subscription is inactive; update billing to continue",
        DenyCode::QuotaM2Exceeded => "Monthly AI reply limit reached",
        DenyCode::QuotaM3Exceeded => "Monthly automation visitor limit reached",
        DenyCode::RateLimited => "Too many requests, slow down",
        DenyCode::BillingGrace => "Your subscription is past due",
        DenyCode::BillingLocked => "Workspace is locked due to billing",
        DenyCode::TenantNotFound => "Tenant not found",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use supportline_shared::models::plan::StaticPlanSource;
    use supportline_shared::models::tenant::{test_tenant, MemoryTenantStore};
    use supportline_shared::models::usage::MemoryUsageStore;
    use supportline_shared::ratelimit::{MemoryCounterStore, UnavailableCounterStore};
    use chrono::Duration as ChronoDuration;

    struct Harness {
        service: AdmissionService,
        tenants: Arc<MemoryTenantStore>,
        usage: Arc<MemoryUsageStore>,
    }

    fn harness_with(settings: AdmissionSettings, store_down: bool) -> Harness {
        let counter: Arc<dyn supportline_shared::ratelimit::CounterStore> = if store_down {
            Arc::new(UnavailableCounterStore)
        } else {
            Arc::new(MemoryCounterStore::new(10_000))
        };
        let tenants = Arc::new(MemoryTenantStore::new());
        let usage = Arc::new(MemoryUsageStore::new());
        let plans = Arc::new(StaticPlanSource::builtin());

        let service = AdmissionService::new(
            FixedWindowLimiter::new(counter),
            BillingGuard::new(tenants.clone()),
            QuotaEvaluator::new(plans, usage.clone()),
            tenants.clone(),
            usage.clone(),
            settings,
        );
        Harness {
            service,
            tenants,
            usage,
        }
    }

    fn harness() -> Harness {
        harness_with(AdmissionSettings::default(), false)
    }

    fn widget_ctx(tenant_id: Uuid) -> RequestContext {
        RequestContext::new(
            Some(tenant_id),
            "203.0.113.9",
            CallerAuthority::Widget,
            "messages.send",
        )
    }

    #[tokio::test]
    async fn test_healthy_tenant_is_admitted() {
        let h = harness();
        let tenant = test_tenant("pro");
        let id = tenant.id;
        h.tenants.insert(tenant);

        let decision = h
            .service
            .admit(&widget_ctx(id), &WriteAction::SendHumanMessage)
            .await;
        assert!(decision.allowed);
    }

    #[tokio::test]
    async fn test_rate_limit_denies_with_retry_after() {
        let h = harness_with(
            AdmissionSettings {
                rate_limit: 3,
                ..Default::default()
            },
            false,
        );
        let tenant = test_tenant("pro");
        let id = tenant.id;
        h.tenants.insert(tenant);
        let ctx = widget_ctx(id);

        for _ in 0..3 {
            assert!(h
                .service
                .admit(&ctx, &WriteAction::SendHumanMessage)
                .await
                .allowed);
        }
        let decision = h.service.admit(&ctx, &WriteAction::SendHumanMessage).await;
        assert!(!decision.allowed);
        assert_eq!(decision.code, Some(DenyCode::RateLimited));
        assert!(decision.retry_after_secs.is_some());
    }

    #[tokio::test]
    async fn test_rate_limiter_fails_open_when_store_down() {
        let h = harness_with(AdmissionSettings::default(), true);
        let tenant = test_tenant("pro");
        let id = tenant.id;
        h.tenants.insert(tenant);

        let decision = h
            .service
            .admit(&widget_ctx(id), &WriteAction::SendHumanMessage)
            .await;
        assert!(decision.allowed);
    }

    #[tokio::test]
    async fn test_operator_bypasses_rate_limit() {
        let h = harness_with(
            AdmissionSettings {
                rate_limit: 1,
                ..Default::default()
            },
            false,
        );
        let tenant = test_tenant("pro");
        let id = tenant.id;
        h.tenants.insert(tenant);
        let ctx = RequestContext::new(
            Some(id),
            "203.0.113.9",
            CallerAuthority::Operator,
            "messages.send",
        );

        for _ in 0..10 {
            assert!(h
                .service
                .admit(&ctx, &WriteAction::SendHumanMessage)
                .await
                .allowed);
        }
    }

    #[tokio::test]
    async fn test_unknown_tenant_is_denied() {
        let h = harness();
        let decision = h
            .service
            .admit(&widget_ctx(Uuid::new_v4()), &WriteAction::SendHumanMessage)
            .await;
        assert!(!decision.allowed);
        assert_eq!(decision.code, Some(DenyCode::TenantNotFound));

        let ctx = RequestContext::new(None, "203.0.113.9", CallerAuthority::Widget, "messages.send");
        let decision = h.service.admit(&ctx, &WriteAction::SendHumanMessage).await;
        assert_eq!(decision.code, Some(DenyCode::TenantNotFound));
    }

    #[tokio::test]
    async fn test_kill_switch_denies_even_operators() {
        let h = harness();
        let mut tenant = test_tenant("pro");
        tenant.write_enabled = false;
        let id = tenant.id;
        h.tenants.insert(tenant);

        let ctx = RequestContext::new(
            Some(id),
            "203.0.113.9",
            CallerAuthority::Operator,
            "messages.send",
        );
        let decision = h.service.admit(&ctx, &WriteAction::SendHumanMessage).await;
        assert!(!decision.allowed);
        assert_eq!(decision.code, Some(DenyCode::BillingLocked));
    }

    #[tokio::test]
    async fn test_kill_switch_operator_override() {
        let h = harness_with(
            AdmissionSettings {
                operator_overrides_kill_switch: true,
                ..Default::default()
            },
            false,
        );
        let mut tenant = test_tenant("pro");
        tenant.write_enabled = false;
        let id = tenant.id;
        h.tenants.insert(tenant);

        let operator = RequestContext::new(
            Some(id),
            "203.0.113.9",
            CallerAuthority::Operator,
            "messages.send",
        );
        assert!(h
            .service
            .admit(&operator, &WriteAction::SendHumanMessage)
            .await
            .allowed);

        // The override is operator-only; everyone else stays blocked.
        let decision = h
            .service
            .admit(&widget_ctx(id), &WriteAction::SendHumanMessage)
            .await;
        assert!(!decision.allowed);
    }

    #[tokio::test]
    async fn test_grace_denies_with_softer_code_and_deadline() {
        let h = harness();
        let now = Utc::now();
        let mut tenant = test_tenant("pro");
        tenant.billing_enforced = true;
        tenant.billing_status = "past_due".to_string();
        tenant.current_period_end = Some(now - ChronoDuration::days(2));
        tenant.billing_grace_days = 7;
        let id = tenant.id;
        h.tenants.insert(tenant);

        let decision = h
            .service
            .admit_at(&widget_ctx(id), &WriteAction::SendHumanMessage, now)
            .await;
        assert!(!decision.allowed);
        assert_eq!(decision.code, Some(DenyCode::BillingGrace));
        assert_eq!(decision.resets_at, Some(now + ChronoDuration::days(5)));
        // Grace never stamps the lock timestamp.
        assert!(h.tenants.get(id).unwrap().billing_locked_at.is_none());
    }

    #[tokio::test]
    async fn test_locked_denies_and_stamps_once() {
        let h = harness();
        let now = Utc::now();
        let mut tenant = test_tenant("pro");
        tenant.billing_enforced = true;
        tenant.billing_status = "unpaid".to_string();
        tenant.current_period_end = Some(now - ChronoDuration::days(30));
        let id = tenant.id;
        h.tenants.insert(tenant);

        let decision = h
            .service
            .admit_at(&widget_ctx(id), &WriteAction::SendHumanMessage, now)
            .await;
        assert!(!decision.allowed);
        assert_eq!(decision.code, Some(DenyCode::BillingLocked));
        let stamped = h.tenants.get(id).unwrap().billing_locked_at;
        assert!(stamped.is_some());

        // Second observation of the same episode leaves the stamp alone.
        h.service
            .admit_at(&widget_ctx(id), &WriteAction::SendHumanMessage, now)
            .await;
        assert_eq!(h.tenants.get(id).unwrap().billing_locked_at, stamped);
    }

    #[tokio::test]
    async fn test_internal_automation_bypasses_billing_lock() {
        let h = harness();
        let now = Utc::now();
        let mut tenant = test_tenant("pro");
        tenant.billing_enforced = true;
        tenant.billing_status = "unpaid".to_string();
        tenant.current_period_end = Some(now - ChronoDuration::days(30));
        let id = tenant.id;
        h.tenants.insert(tenant);

        let ctx = RequestContext::new(
            Some(id),
            "203.0.113.9",
            CallerAuthority::InternalAutomation,
            "messages.send",
        );
        let decision = h
            .service
            .admit_at(&ctx, &WriteAction::SendHumanMessage, now)
            .await;
        // The billing lock itself is bypassed; the quota evaluator's own
        // subscription check still applies to metered consumption.
        assert_eq!(decision.code, Some(DenyCode::SubscriptionInactive));
    }

    #[tokio::test]
    async fn test_m2_cap_denies_with_usage_and_reset() {
        let h = harness();
        let now = Utc::now();
        let tenant = test_tenant("free");
        let id = tenant.id;
        h.tenants.insert(tenant);
        let month = month_key(now);
        h.usage.record(id, &month, UsageMetric::M2, 10).await.unwrap();

        let decision = h
            .service
            .admit_at(&widget_ctx(id), &WriteAction::GenerateAiReply, now)
            .await;
        assert!(!decision.allowed);
        assert_eq!(decision.code, Some(DenyCode::QuotaM2Exceeded));
        let usage = decision.usage.unwrap();
        assert_eq!(usage.used, 10);
        assert_eq!(usage.limit, 10);
        assert!(decision.resets_at.is_some());
    }

    #[tokio::test]
    async fn test_record_ai_reply_consumes_m2_and_messages() {
        let h = harness();
        let now = Utc::now();
        let tenant = test_tenant("pro");
        let id = tenant.id;
        h.tenants.insert(tenant);

        h.service.record(id, &WriteAction::GenerateAiReply, now).await;
        h.service.record(id, &WriteAction::SendHumanMessage, now).await;

        let ledger = h.usage.get_for_month(id, &month_key(now)).await.unwrap();
        assert_eq!(ledger.m2_count, 1);
        assert_eq!(ledger.m1_count, 1);
        assert_eq!(ledger.messages_sent, 2);
    }

    #[tokio::test]
    async fn test_record_automation_touch_dedupes() {
        let h = harness();
        let now = Utc::now();
        let tenant = test_tenant("pro");
        let id = tenant.id;
        h.tenants.insert(tenant);

        let action = WriteAction::AutomationTouch {
            visitor_key: "visitor-9".to_string(),
        };
        for _ in 0..5 {
            h.service.record(id, &action, now).await;
        }

        let ledger = h.usage.get_for_month(id, &month_key(now)).await.unwrap();
        assert_eq!(ledger.m3_count, 1);
    }
}
