/// Tenant model and billing fields
///
/// A tenant is an organization using the platform: the unit of billing,
/// quota, and isolation. The billing columns drive the lock state machine in
/// `crate::billing`; the model itself only carries data and small pure
/// predicates over it.
///
/// # Schema
///
/// ```sql
/// CREATE TABLE tenants (
///     id UUID PRIMARY KEY DEFAULT gen_random_uuid(),
///     name VARCHAR(255) NOT NULL,
///     plan_key VARCHAR(50) NOT NULL DEFAULT 'free',
///     billing_enforced BOOLEAN NOT NULL DEFAULT FALSE,
///     billing_status VARCHAR(50) NOT NULL DEFAULT 'none',
///     billing_grace_days INTEGER NOT NULL DEFAULT 7,
///     current_period_end TIMESTAMPTZ,
///     last_stripe_event_at TIMESTAMPTZ,
///     grace_ends_at TIMESTAMPTZ,
///     billing_locked_at TIMESTAMPTZ,
///     trial_started_at TIMESTAMPTZ,
///     trial_ends_at TIMESTAMPTZ,
///     write_enabled BOOLEAN NOT NULL DEFAULT TRUE,
///     created_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
///     updated_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
/// );
/// ```
///
/// # Example
///
/// ```no_run
/// use supportline_shared::models::tenant::{CreateTenant, Tenant};
/// # use sqlx::PgPool;
/// # async fn example(pool: PgPool) -> Result<(), sqlx::Error> {
/// let tenant = Tenant::create(&pool, CreateTenant {
///     name: "Acme Corp".to_string(),
///     plan_key: "pro".to_string(),
/// }).await?;
/// assert!(!tenant.is_free_plan());
/// # Ok(())
/// # }
/// ```

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::PgPool;
use std::collections::HashMap;
use std::sync::Mutex;
use thiserror::Error;
use uuid::Uuid;

/// Subscription status as reported by the billing provider.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BillingStatus {
    /// No subscription at all
    None,

    /// Provider-managed trial in progress
    Trialing,

    /// Paid and current
    Active,

    /// Payment failed, provider retrying
    PastDue,

    /// Subscription canceled
    Canceled,

    /// Provider gave up collecting
    Unpaid,

    /// Checkout started but never completed
    Incomplete,
}

impl BillingStatus {
    /// Database string form.
    pub fn as_str(&self) -> &'static str {
        match self {
            BillingStatus::None => "none",
            BillingStatus::Trialing => "trialing",
            BillingStatus::Active => "active",
            BillingStatus::PastDue => "past_due",
            BillingStatus::Canceled => "canceled",
            BillingStatus::Unpaid => "unpaid",
            BillingStatus::Incomplete => "incomplete",
        }
    }

    /// Parses the database string form.
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "none" => Some(BillingStatus::None),
            "trialing" => Some(BillingStatus::Trialing),
            "active" => Some(BillingStatus::Active),
            "past_due" => Some(BillingStatus::PastDue),
            "canceled" => Some(BillingStatus::Canceled),
            "unpaid" => Some(BillingStatus::Unpaid),
            "incomplete" => Some(BillingStatus::Incomplete),
            _ => None,
        }
    }
}

/// Tenant model with billing posture fields.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct Tenant {
    /// Unique tenant ID
    pub id: Uuid,

    /// Organization name
    pub name: String,

    /// Current plan key ("free", "pro", "business", ...)
    pub plan_key: String,

    /// Whether billing gating applies to this tenant at all
    pub billing_enforced: bool,

    /// Subscription status string (see [`BillingStatus`])
    pub billing_status: String,

    /// Days of grace after billing becomes inactive
    pub billing_grace_days: i32,

    /// End of the current paid period (preferred grace anchor)
    pub current_period_end: Option<DateTime<Utc>>,

    /// Last billing-provider event (fallback grace anchor)
    pub last_stripe_event_at: Option<DateTime<Utc>>,

    /// Persisted grace deadline, if one has been computed
    pub grace_ends_at: Option<DateTime<Utc>>,

    /// When this tenant transitioned into locked. Sticky: set at most once
    /// per lock episode, cleared only by reactivation.
    pub billing_locked_at: Option<DateTime<Utc>>,

    /// Explicit trial start, if the tenant ever had one
    pub trial_started_at: Option<DateTime<Utc>>,

    /// Explicit trial end, if the tenant ever had one
    pub trial_ends_at: Option<DateTime<Utc>>,

    /// Manual per-tenant kill switch, independent of billing state
    pub write_enabled: bool,

    /// When the tenant was created
    pub created_at: DateTime<Utc>,

    /// When the tenant was last updated
    pub updated_at: DateTime<Utc>,
}

impl Tenant {
    /// Parsed billing status; unknown strings read as `None` (no subscription).
    pub fn status(&self) -> BillingStatus {
        BillingStatus::parse(&self.billing_status).unwrap_or(BillingStatus::None)
    }

    /// Whether the tenant sits on the permanent free tier.
    pub fn is_free_plan(&self) -> bool {
        self.plan_key == "free"
    }

    /// Free plan, or a subscription in good standing.
    pub fn is_billing_active(&self) -> bool {
        self.is_free_plan()
            || matches!(self.status(), BillingStatus::Active | BillingStatus::Trialing)
    }

    /// Whether the tenant ever had an explicit trial.
    ///
    /// Being on the free plan alone does not imply trialing; free is a
    /// permanent tier.
    pub fn has_explicit_trial(&self) -> bool {
        self.trial_started_at.is_some()
            || self.trial_ends_at.is_some()
            || self.status() == BillingStatus::Trialing
    }

    /// Whether an explicit trial existed and has ended as of `now`.
    pub fn trial_expired(&self, now: DateTime<Utc>) -> bool {
        match self.trial_ends_at {
            Some(ends_at) => self.has_explicit_trial() && ends_at <= now,
            None => false,
        }
    }
}

/// Input for creating a tenant
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateTenant {
    /// Organization name
    pub name: String,

    /// Initial plan key
    #[serde(default = "default_plan_key")]
    pub plan_key: String,
}

fn default_plan_key() -> String {
    "free".to_string()
}

const TENANT_COLUMNS: &str = "id, name, plan_key, billing_enforced, billing_status, \
     billing_grace_days, current_period_end, last_stripe_event_at, grace_ends_at, \
     billing_locked_at, trial_started_at, trial_ends_at, write_enabled, created_at, updated_at";

impl Tenant {
    /// Creates a new tenant.
    pub async fn create(pool: &PgPool, data: CreateTenant) -> Result<Self, sqlx::Error> {
        sqlx::query_as::<_, Tenant>(&format!(
            "INSERT INTO tenants (name, plan_key) VALUES ($1, $2) RETURNING {}",
            TENANT_COLUMNS
        ))
        .bind(data.name)
        .bind(data.plan_key)
        .fetch_one(pool)
        .await
    }

    /// Finds a tenant by ID.
    pub async fn find_by_id(pool: &PgPool, id: Uuid) -> Result<Option<Self>, sqlx::Error> {
        sqlx::query_as::<_, Tenant>(&format!(
            "SELECT {} FROM tenants WHERE id = $1",
            TENANT_COLUMNS
        ))
        .bind(id)
        .fetch_optional(pool)
        .await
    }

    /// Applies a billing-provider update (webhook handlers call this).
    pub async fn update_billing(
        pool: &PgPool,
        id: Uuid,
        status: BillingStatus,
        current_period_end: Option<DateTime<Utc>>,
        last_event_at: DateTime<Utc>,
    ) -> Result<Option<Self>, sqlx::Error> {
        sqlx::query_as::<_, Tenant>(&format!(
            r#"
            UPDATE tenants
            SET billing_status = $2,
                current_period_end = $3,
                last_stripe_event_at = $4,
                updated_at = NOW()
            WHERE id = $1
            RETURNING {}
            "#,
            TENANT_COLUMNS
        ))
        .bind(id)
        .bind(status.as_str())
        .bind(current_period_end)
        .bind(last_event_at)
        .fetch_optional(pool)
        .await
    }

    /// Records when the tenant transitioned into fully locked.
    ///
    /// The `billing_locked_at IS NULL` guard makes the stamp set-once at the
    /// database: concurrent observers of the same lock episode race, exactly
    /// one write wins, the rest affect zero rows.
    pub async fn stamp_billing_locked_at(pool: &PgPool, id: Uuid) -> Result<bool, sqlx::Error> {
        let result = sqlx::query(
            r#"
            UPDATE tenants
            SET billing_locked_at = NOW(), updated_at = NOW()
            WHERE id = $1 AND billing_locked_at IS NULL
            "#,
        )
        .bind(id)
        .execute(pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    /// Clears the lock episode on reactivation so a future episode can be
    /// timestamped again.
    pub async fn clear_billing_lock(pool: &PgPool, id: Uuid) -> Result<(), sqlx::Error> {
        sqlx::query(
            r#"
            UPDATE tenants
            SET billing_locked_at = NULL, grace_ends_at = NULL, updated_at = NOW()
            WHERE id = $1
            "#,
        )
        .bind(id)
        .execute(pool)
        .await?;

        Ok(())
    }

    /// Flips the manual kill switch.
    pub async fn set_write_enabled(
        pool: &PgPool,
        id: Uuid,
        enabled: bool,
    ) -> Result<(), sqlx::Error> {
        sqlx::query("UPDATE tenants SET write_enabled = $2, updated_at = NOW() WHERE id = $1")
            .bind(id)
            .bind(enabled)
            .execute(pool)
            .await?;

        Ok(())
    }
}

/// Tenant store errors
#[derive(Error, Debug)]
pub enum TenantStoreError {
    /// Database error
    #[error("tenant store error: {0}")]
    Database(#[from] sqlx::Error),
}

/// Read/conditional-write access to tenants by key.
///
/// The admission gates consume this seam so they can be exercised without a
/// live database.
#[async_trait]
pub trait TenantStore: Send + Sync {
    /// Finds a tenant by ID.
    async fn find(&self, id: Uuid) -> Result<Option<Tenant>, TenantStoreError>;

    /// Stamps `billing_locked_at`, returning whether this call won the stamp.
    async fn stamp_billing_locked_at(&self, id: Uuid) -> Result<bool, TenantStoreError>;

    /// Clears the lock episode (reactivation).
    async fn clear_billing_lock(&self, id: Uuid) -> Result<(), TenantStoreError>;
}

/// Tenant store over the tenants table.
pub struct PgTenantStore {
    pool: PgPool,
}

impl PgTenantStore {
    /// Creates a store over a connection pool.
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl TenantStore for PgTenantStore {
    async fn find(&self, id: Uuid) -> Result<Option<Tenant>, TenantStoreError> {
        Ok(Tenant::find_by_id(&self.pool, id).await?)
    }

    async fn stamp_billing_locked_at(&self, id: Uuid) -> Result<bool, TenantStoreError> {
        Ok(Tenant::stamp_billing_locked_at(&self.pool, id).await?)
    }

    async fn clear_billing_lock(&self, id: Uuid) -> Result<(), TenantStoreError> {
        Ok(Tenant::clear_billing_lock(&self.pool, id).await?)
    }
}

/// In-memory tenant store for tests.
#[derive(Default)]
pub struct MemoryTenantStore {
    tenants: Mutex<HashMap<Uuid, Tenant>>,
}

impl MemoryTenantStore {
    /// Creates an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Inserts or replaces a tenant.
    pub fn insert(&self, tenant: Tenant) {
        self.tenants
            .lock()
            .expect("tenant map poisoned")
            .insert(tenant.id, tenant);
    }

    /// Reads a tenant back out (test assertions).
    pub fn get(&self, id: Uuid) -> Option<Tenant> {
        self.tenants
            .lock()
            .expect("tenant map poisoned")
            .get(&id)
            .cloned()
    }
}

#[async_trait]
impl TenantStore for MemoryTenantStore {
    async fn find(&self, id: Uuid) -> Result<Option<Tenant>, TenantStoreError> {
        Ok(self.get(id))
    }

    async fn stamp_billing_locked_at(&self, id: Uuid) -> Result<bool, TenantStoreError> {
        let mut tenants = self.tenants.lock().expect("tenant map poisoned");
        match tenants.get_mut(&id) {
            Some(t) if t.billing_locked_at.is_none() => {
                t.billing_locked_at = Some(Utc::now());
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn clear_billing_lock(&self, id: Uuid) -> Result<(), TenantStoreError> {
        let mut tenants = self.tenants.lock().expect("tenant map poisoned");
        if let Some(t) = tenants.get_mut(&id) {
            t.billing_locked_at = None;
            t.grace_ends_at = None;
        }
        Ok(())
    }
}

/// A test tenant with sane defaults; callers override the fields under test.
pub fn test_tenant(plan_key: &str) -> Tenant {
    let now = Utc::now();
    Tenant {
        id: Uuid::new_v4(),
        name: "Test Tenant".to_string(),
        plan_key: plan_key.to_string(),
        billing_enforced: false,
        billing_status: "none".to_string(),
        billing_grace_days: 7,
        current_period_end: None,
        last_stripe_event_at: None,
        grace_ends_at: None,
        billing_locked_at: None,
        trial_started_at: None,
        trial_ends_at: None,
        write_enabled: true,
        created_at: now,
        updated_at: now,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    #[test]
    fn test_billing_status_round_trip() {
        for status in [
            BillingStatus::None,
            BillingStatus::Trialing,
            BillingStatus::Active,
            BillingStatus::PastDue,
            BillingStatus::Canceled,
            BillingStatus::Unpaid,
            BillingStatus::Incomplete,
        ] {
            assert_eq!(BillingStatus::parse(status.as_str()), Some(status));
        }
        assert_eq!(BillingStatus::parse("garbage"), None);
    }

    #[test]
    fn test_unknown_status_reads_as_none() {
        let mut tenant = test_tenant("pro");
        tenant.billing_status = "something_new".to_string();
        assert_eq!(tenant.status(), BillingStatus::None);
    }

    #[test]
    fn test_is_billing_active() {
        let mut tenant = test_tenant("pro");
        tenant.billing_status = "active".to_string();
        assert!(tenant.is_billing_active());

        tenant.billing_status = "trialing".to_string();
        assert!(tenant.is_billing_active());

        tenant.billing_status = "past_due".to_string();
        assert!(!tenant.is_billing_active());

        // Free tier is always in good standing.
        let free = test_tenant("free");
        assert!(free.is_billing_active());
    }

    #[test]
    fn test_free_plan_is_not_a_trial() {
        let tenant = test_tenant("free");
        assert!(!tenant.has_explicit_trial());
        // Never trial-expired without explicit trial dates, no matter how
        // much time has passed.
        assert!(!tenant.trial_expired(Utc::now() + Duration::days(10_000)));
    }

    #[test]
    fn test_explicit_trial_expiry() {
        let now = Utc::now();
        let mut tenant = test_tenant("free");
        tenant.trial_started_at = Some(now - Duration::days(14));
        tenant.trial_ends_at = Some(now - Duration::days(7));

        assert!(tenant.has_explicit_trial());
        assert!(tenant.trial_expired(now));
        assert!(!tenant.trial_expired(now - Duration::days(10)));
    }

    #[tokio::test]
    async fn test_memory_store_stamp_is_set_once() {
        let store = MemoryTenantStore::new();
        let tenant = test_tenant("pro");
        let id = tenant.id;
        store.insert(tenant);

        assert!(store.stamp_billing_locked_at(id).await.unwrap());
        assert!(!store.stamp_billing_locked_at(id).await.unwrap());

        store.clear_billing_lock(id).await.unwrap();
        assert!(store.stamp_billing_locked_at(id).await.unwrap());
    }

    // Integration tests for the Postgres store are in tests/.
}
