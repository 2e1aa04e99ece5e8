/// Request context and admission decisions
///
/// Every mutating request is normalized into a [`RequestContext`] before it
/// reaches the admission gates. The caller's authority is resolved exactly
/// once per request and passed down, instead of each gate re-checking ad-hoc
/// session flags or trusted-credential headers.
///
/// Gates communicate through [`AdmissionDecision`] values. A check never
/// throws past the middleware boundary: infrastructure failures are mapped to
/// a per-gate fallback policy and denials carry a stable machine-readable
/// code from [`DenyCode`].
///
/// # Example
///
/// ```
/// use supportline_shared::context::{AdmissionDecision, CallerAuthority, DenyCode, RequestContext};
/// use uuid::Uuid;
///
/// let ctx = RequestContext::new(Some(Uuid::new_v4()), "203.0.113.9", CallerAuthority::Widget, "conversations.create");
/// assert!(!ctx.authority.bypasses_rate_limit());
///
/// let decision = AdmissionDecision::deny(DenyCode::RateLimited, "Too many requests");
/// assert!(!decision.allowed);
/// assert_eq!(decision.code.unwrap().as_str(), "RATE_LIMITED");
/// ```

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Who is making the request, resolved once per request.
///
/// The ordering is roughly least to most trusted. Bypass behavior is a
/// property of the authority, not of individual call sites.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CallerAuthority {
    /// No identity at all (e.g. a widget visitor before tenant resolution)
    Anonymous,

    /// Embedded chat widget acting for an end user of a tenant
    Widget,

    /// Authenticated customer-portal user
    PortalUser,

    /// Trusted internal automation credential (workflows, schedulers)
    InternalAutomation,

    /// Authenticated platform operator (internal admin panel)
    Operator,
}

impl CallerAuthority {
    /// Operators and trusted internal automation skip rate limiting entirely.
    pub fn bypasses_rate_limit(&self) -> bool {
        matches!(
            self,
            CallerAuthority::Operator | CallerAuthority::InternalAutomation
        )
    }

    /// Operators and trusted internal automation skip billing-lock checks.
    ///
    /// The per-tenant `write_enabled` kill switch is NOT covered by this
    /// bypass; it is evaluated independently by the admission service.
    pub fn bypasses_billing_lock(&self) -> bool {
        matches!(
            self,
            CallerAuthority::Operator | CallerAuthority::InternalAutomation
        )
    }
}

/// Normalized request context consumed by the admission gates.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RequestContext {
    /// Tenant the request targets, if resolved
    pub tenant_id: Option<Uuid>,

    /// Caller IP as reported by the request layer
    pub caller_ip: String,

    /// Caller authority, resolved once upstream
    pub authority: CallerAuthority,

    /// Target route/action name (e.g. "conversations.create")
    pub action: String,
}

impl RequestContext {
    /// Creates a new request context.
    pub fn new(
        tenant_id: Option<Uuid>,
        caller_ip: impl Into<String>,
        authority: CallerAuthority,
        action: impl Into<String>,
    ) -> Self {
        Self {
            tenant_id,
            caller_ip: caller_ip.into(),
            authority,
            action: action.into(),
        }
    }

    /// Default rate-limit key: `callerIdentity:ip`.
    ///
    /// Uses the tenant key when present, "anonymous" otherwise. Call sites
    /// that need per-route or per-device keys build their own key instead.
    pub fn rate_limit_key(&self) -> String {
        match self.tenant_id {
            Some(id) => format!("{}:{}", id, self.caller_ip),
            None => format!("anonymous:{}", self.caller_ip),
        }
    }
}

/// Stable machine-readable denial codes.
///
/// The HTTP layer maps these to status codes (429 for rate limiting, 402/403
/// for billing and quota). The string forms are part of the API contract and
/// must not change.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DenyCode {
    /// Fixed-window rate limit exceeded
    RateLimited,

    /// Tenant is fully billing-locked (grace elapsed)
    BillingLocked,

    /// Tenant is within the billing grace window (writes blocked, softer message)
    BillingGrace,

    /// Billing enforced and subscription neither active nor trialing
    SubscriptionInactive,

    /// Free-plan tenant with an explicit, expired trial
    TrialExpired,

    /// AI-reply (M2) monthly cap reached
    QuotaM2Exceeded,

    /// Automation-visitor (M3) monthly cap reached
    QuotaM3Exceeded,

    /// Tenant row missing at check time on a primary write gate
    TenantNotFound,
}

impl DenyCode {
    /// The wire form of the code.
    pub fn as_str(&self) -> &'static str {
        match self {
            DenyCode::RateLimited => "RATE_LIMITED",
            DenyCode::BillingLocked => "BILLING_LOCKED",
            DenyCode::BillingGrace => "BILLING_GRACE",
            DenyCode::SubscriptionInactive => "SUBSCRIPTION_INACTIVE",
            DenyCode::TrialExpired => "TRIAL_EXPIRED",
            DenyCode::QuotaM2Exceeded => "QUOTA_M2_EXCEEDED",
            DenyCode::QuotaM3Exceeded => "QUOTA_M3_EXCEEDED",
            DenyCode::TenantNotFound => "TENANT_NOT_FOUND",
        }
    }
}

/// Used/limit pair attached to quota denials so clients can render
/// "you're at 100/100, resets in 12 days".
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct UsedOfLimit {
    /// Current usage for the metric
    pub used: i64,

    /// Plan limit for the metric
    pub limit: i64,
}

/// Structured admit/deny result crossing the middleware boundary.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AdmissionDecision {
    /// Whether the request may proceed
    pub allowed: bool,

    /// Denial code, present only when denied
    #[serde(skip_serializing_if = "Option::is_none")]
    pub code: Option<DenyCode>,

    /// Retry delay for rate-limit denials
    #[serde(skip_serializing_if = "Option::is_none")]
    pub retry_after_secs: Option<u64>,

    /// Usage snapshot for quota denials
    #[serde(skip_serializing_if = "Option::is_none")]
    pub usage: Option<UsedOfLimit>,

    /// When the relevant window resets (quota) or grace ends (billing)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub resets_at: Option<DateTime<Utc>>,

    /// Human-readable message
    pub message: String,
}

impl AdmissionDecision {
    /// An unconditional admit.
    pub fn allow() -> Self {
        Self {
            allowed: true,
            code: None,
            retry_after_secs: None,
            usage: None,
            resets_at: None,
            message: String::new(),
        }
    }

    /// A denial with the given code and message.
    pub fn deny(code: DenyCode, message: impl Into<String>) -> Self {
        Self {
            allowed: false,
            code: Some(code),
            retry_after_secs: None,
            usage: None,
            resets_at: None,
            message: message.into(),
        }
    }

    /// Attaches a retry delay (rate-limit denials).
    pub fn with_retry_after(mut self, secs: u64) -> Self {
        self.retry_after_secs = Some(secs);
        self
    }

    /// Attaches a used/limit snapshot (quota denials).
    pub fn with_usage(mut self, used: i64, limit: i64) -> Self {
        self.usage = Some(UsedOfLimit { used, limit });
        self
    }

    /// Attaches a reset/grace-end timestamp.
    pub fn with_resets_at(mut self, at: DateTime<Utc>) -> Self {
        self.resets_at = Some(at);
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_authority_bypass() {
        assert!(CallerAuthority::Operator.bypasses_rate_limit());
        assert!(CallerAuthority::InternalAutomation.bypasses_billing_lock());
        assert!(!CallerAuthority::Widget.bypasses_rate_limit());
        assert!(!CallerAuthority::PortalUser.bypasses_billing_lock());
        assert!(!CallerAuthority::Anonymous.bypasses_rate_limit());
    }

    #[test]
    fn test_rate_limit_key_anonymous() {
        let ctx = RequestContext::new(None, "198.51.100.7", CallerAuthority::Anonymous, "messages.send");
        assert_eq!(ctx.rate_limit_key(), "anonymous:198.51.100.7");
    }

    #[test]
    fn test_rate_limit_key_tenant() {
        let id = Uuid::new_v4();
        let ctx = RequestContext::new(Some(id), "198.51.100.7", CallerAuthority::Widget, "messages.send");
        assert_eq!(ctx.rate_limit_key(), format!("{}:198.51.100.7", id));
    }

    #[test]
    fn test_deny_code_wire_forms() {
        assert_eq!(DenyCode::RateLimited.as_str(), "RATE_LIMITED");
        assert_eq!(DenyCode::BillingLocked.as_str(), "BILLING_LOCKED");
        assert_eq!(DenyCode::BillingGrace.as_str(), "BILLING_GRACE");
        assert_eq!(DenyCode::SubscriptionInactive.as_str(), "SUBSCRIPTION_INACTIVE");
        assert_eq!(DenyCode::TrialExpired.as_str(), "TRIAL_EXPIRED");
        assert_eq!(DenyCode::QuotaM2Exceeded.as_str(), "QUOTA_M2_EXCEEDED");
        assert_eq!(DenyCode::QuotaM3Exceeded.as_str(), "QUOTA_M3_EXCEEDED");
    }

    #[test]
    fn test_decision_builders() {
        let d = AdmissionDecision::deny(DenyCode::QuotaM2Exceeded, "AI reply limit reached")
            .with_usage(100, 100);
        assert!(!d.allowed);
        assert_eq!(d.usage.unwrap().used, 100);
        assert_eq!(d.usage.unwrap().limit, 100);

        let d = AdmissionDecision::deny(DenyCode::RateLimited, "slow down").with_retry_after(42);
        assert_eq!(d.retry_after_secs, Some(42));

        let d = AdmissionDecision::allow();
        assert!(d.allowed);
        assert!(d.code.is_none());
    }
}
