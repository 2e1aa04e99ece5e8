/// Lock status computation and the billing guard
///
/// `compute_lock_status` is a pure function of a tenant row and a clock; the
/// write path calls it on every admission so a status change takes effect on
/// the very next request, webhook or not. `BillingGuard` wraps it with the
/// two persistence effects the state machine needs: stamping
/// `billing_locked_at` once per lock episode and clearing it on reactivation.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::models::tenant::{Tenant, TenantStore, TenantStoreError};

use super::grace::grace_end;

/// Why a tenant is (or is not) locked.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LockReason {
    /// Free tier: billing never locks these tenants
    Free,

    /// Billing in good standing, or gating not enforced for this tenant
    Active,

    /// Billing inactive but inside the grace window; writes denied with a
    /// softer message and no lock stamp yet
    Grace,

    /// Billing inactive and grace elapsed (or never existed); writes denied
    Locked,
}

/// Resolved billing posture for one tenant at one instant.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LockStatus {
    /// Whether writes are denied on billing grounds
    pub locked: bool,

    /// Which arm of the state machine produced this outcome
    pub reason: LockReason,

    /// When grace ends, for Grace (future) and Locked (past) outcomes
    pub grace_ends_at: Option<DateTime<Utc>>,

    /// Whether the caller should stamp `billing_locked_at` now: true only on
    /// the first observation of a lock episode
    pub should_set_locked_at: bool,
}

impl LockStatus {
    fn open(reason: LockReason) -> Self {
        Self {
            locked: false,
            reason,
            grace_ends_at: None,
            should_set_locked_at: false,
        }
    }
}

/// Resolves a tenant's billing posture at `now`.
///
/// Resolution order: free tier first, then enforcement and status, then the
/// grace window. A persisted `grace_ends_at` takes precedence over the
/// derived deadline so an operator-extended window is honored.
pub fn compute_lock_status(tenant: &Tenant, now: DateTime<Utc>) -> LockStatus {
    if tenant.is_free_plan() {
        return LockStatus::open(LockReason::Free);
    }

    if !tenant.billing_enforced || tenant.is_billing_active() {
        return LockStatus::open(LockReason::Active);
    }

    let deadline = tenant.grace_ends_at.or_else(|| {
        grace_end(
            tenant.status(),
            tenant.billing_grace_days,
            tenant.current_period_end,
            tenant.last_stripe_event_at,
        )
    });

    match deadline {
        Some(ends_at) if ends_at > now => LockStatus {
            locked: true,
            reason: LockReason::Grace,
            grace_ends_at: Some(ends_at),
            should_set_locked_at: false,
        },
        _ => LockStatus {
            locked: true,
            reason: LockReason::Locked,
            grace_ends_at: deadline,
            should_set_locked_at: tenant.billing_locked_at.is_none(),
        },
    }
}

/// Subscription-activity predicate for the quota path: true once billing is
/// enforced, inactive, and past the grace window.
///
/// Inside the grace window this stays false; the lock gate already denies
/// those requests with its softer grace code, and the quota evaluator's
/// `SUBSCRIPTION_INACTIVE` is reserved for tenants past grace. Unlike
/// [`compute_lock_status`] this ignores the persisted `grace_ends_at` column
/// and derives the deadline from the billing anchors alone; both functions
/// share the same derivation underneath.
pub fn is_write_blocked(tenant: &Tenant, now: DateTime<Utc>) -> bool {
    if tenant.is_free_plan() || !tenant.billing_enforced || tenant.is_billing_active() {
        return false;
    }

    match grace_end(
        tenant.status(),
        tenant.billing_grace_days,
        tenant.current_period_end,
        tenant.last_stripe_event_at,
    ) {
        Some(ends_at) => ends_at <= now,
        None => true,
    }
}

/// Applies the lock state machine with its persistence effects.
pub struct BillingGuard {
    tenants: Arc<dyn TenantStore>,
}

impl BillingGuard {
    /// Creates a guard over a tenant store.
    pub fn new(tenants: Arc<dyn TenantStore>) -> Self {
        Self { tenants }
    }

    /// Resolves the tenant's posture and performs the matching persistence
    /// effect: stamp on the first locked observation, clear on seeing a
    /// reactivated tenant that still carries a stamp.
    ///
    /// Persistence failures degrade to log lines; the returned status is
    /// authoritative for admission either way.
    pub async fn check(&self, tenant: &Tenant, now: DateTime<Utc>) -> LockStatus {
        let status = compute_lock_status(tenant, now);

        if status.should_set_locked_at {
            match self.tenants.stamp_billing_locked_at(tenant.id).await {
                Ok(true) => {
                    tracing::info!(tenant_id = %tenant.id, "billing lock engaged");
                }
                Ok(false) => {
                    // Another request won the stamp; same episode.
                }
                Err(e) => {
                    tracing::warn!(tenant_id = %tenant.id, error = %e, "failed to stamp billing lock");
                }
            }
        } else if !status.locked && tenant.billing_locked_at.is_some() {
            if let Err(e) = self.tenants.clear_billing_lock(tenant.id).await {
                tracing::warn!(tenant_id = %tenant.id, error = %e, "failed to clear billing lock");
            } else {
                tracing::info!(tenant_id = %tenant.id, "billing lock cleared after reactivation");
            }
        }

        status
    }

    /// Clears the lock episode directly (webhook reactivation path).
    pub async fn clear(&self, tenant_id: Uuid) -> Result<(), TenantStoreError> {
        self.tenants.clear_billing_lock(tenant_id).await
    }
}
