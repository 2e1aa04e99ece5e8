/// Usage ledger model and store
///
/// Tracks per-tenant, per-calendar-month counters. All windows are UTC
/// calendar months keyed "YYYY-MM"; a month rollover lands writes in a fresh
/// row, so limit-bound counters never need an in-place reset.
///
/// # Metrics
///
/// - `conversations_created`, `messages_sent`: unbounded, analytics only
/// - `m1_count`: human-sent messages, unlimited by product rule but tracked
/// - `m2_count`: AI-generated replies, hard-capped per plan
/// - `m3_count`: distinct visitors reached by automation, hard-capped and
///   deduplicated per period
///
/// # Concurrency
///
/// No application-side locks. The capped increment is one conditional
/// statement (`SET count = count + 1 WHERE count < limit`); zero rows
/// affected means the counter is already at cap and the increment is
/// rejected. M3's exactly-once-per-visitor guarantee is the dedupe table's
/// primary key, not a mutex.
///
/// # Example
///
/// ```no_run
/// use supportline_shared::models::usage::{month_key, PgUsageStore, UsageMetric, UsageStore};
/// use chrono::Utc;
/// # use sqlx::PgPool;
/// # use uuid::Uuid;
/// # async fn example(pool: PgPool, tenant_id: Uuid) -> anyhow::Result<()> {
/// let store = PgUsageStore::new(pool);
/// let month = month_key(Utc::now());
///
/// store.record(tenant_id, &month, UsageMetric::MessagesSent, 1).await?;
/// let accepted = store
///     .try_increment_capped(tenant_id, &month, UsageMetric::M2, 100)
///     .await?;
/// # Ok(())
/// # }
/// ```

use async_trait::async_trait;
use chrono::{DateTime, Datelike, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use sqlx::PgPool;
use std::collections::{HashMap, HashSet};
use std::sync::Mutex;
use thiserror::Error;
use uuid::Uuid;

/// Usage store errors
#[derive(Error, Debug)]
pub enum UsageError {
    /// Database error
    #[error("usage store error: {0}")]
    Database(#[from] sqlx::Error),
}

/// Metered usage dimensions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UsageMetric {
    /// Conversations created (analytics only)
    ConversationsCreated,

    /// Messages sent, any author (analytics only)
    MessagesSent,

    /// Human-authored messages (tracked, never denied)
    M1,

    /// AI-generated replies (hard-capped)
    M2,

    /// Distinct automation-reached visitors (hard-capped, deduplicated)
    M3,
}

impl UsageMetric {
    /// Ledger column holding this metric. Static strings only; these are
    /// interpolated into SQL.
    pub fn column(&self) -> &'static str {
        match self {
            UsageMetric::ConversationsCreated => "conversations_created",
            UsageMetric::MessagesSent => "messages_sent",
            UsageMetric::M1 => "m1_count",
            UsageMetric::M2 => "m2_count",
            UsageMetric::M3 => "m3_count",
        }
    }

    /// Whether the metric is subject to a plan cap at all.
    pub fn is_capped(&self) -> bool {
        matches!(self, UsageMetric::M2 | UsageMetric::M3)
    }
}

/// Derives the ledger key for a point in time: "YYYY-MM", UTC calendar month.
pub fn month_key(now: DateTime<Utc>) -> String {
    format!("{:04}-{:02}", now.year(), now.month())
}

/// First instant of the next UTC calendar month: when capped counters reset.
pub fn month_resets_at(now: DateTime<Utc>) -> DateTime<Utc> {
    let (year, month) = if now.month() == 12 {
        (now.year() + 1, 1)
    } else {
        (now.year(), now.month() + 1)
    };
    Utc.with_ymd_and_hms(year, month, 1, 0, 0, 0)
        .single()
        .expect("first of month is always a valid instant")
}

/// One month of usage for one tenant.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct UsageLedger {
    /// Tenant ID
    pub tenant_id: Uuid,

    /// Calendar month, "YYYY-MM" UTC
    pub month_key: String,

    /// Conversations created this month
    pub conversations_created: i64,

    /// Messages sent this month
    pub messages_sent: i64,

    /// Human-authored messages this month
    pub m1_count: i64,

    /// AI-generated replies this month
    pub m2_count: i64,

    /// Distinct automation-reached visitors this month
    pub m3_count: i64,
}

impl UsageLedger {
    /// A zeroed ledger for months with no writes yet.
    pub fn empty(tenant_id: Uuid, month_key: impl Into<String>) -> Self {
        Self {
            tenant_id,
            month_key: month_key.into(),
            conversations_created: 0,
            messages_sent: 0,
            m1_count: 0,
            m2_count: 0,
            m3_count: 0,
        }
    }

    /// Current count for a metric.
    pub fn count(&self, metric: UsageMetric) -> i64 {
        match metric {
            UsageMetric::ConversationsCreated => self.conversations_created,
            UsageMetric::MessagesSent => self.messages_sent,
            UsageMetric::M1 => self.m1_count,
            UsageMetric::M2 => self.m2_count,
            UsageMetric::M3 => self.m3_count,
        }
    }
}

/// Outcome of recording an automation-reached visitor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VisitorOutcome {
    /// New visitor this period; the M3 counter was incremented
    Counted,

    /// Visitor already counted this period; counter untouched
    AlreadyCounted,

    /// New visitor, but the M3 counter is at its cap
    CapReached,
}

/// Multi-writer usage ledger access.
///
/// Implementations must make each operation a single atomic statement
/// against their backing store; callers never wrap these in transactions or
/// locks.
#[async_trait]
pub trait UsageStore: Send + Sync {
    /// Reads a month's ledger, zeros when no row exists yet.
    async fn get_for_month(
        &self,
        tenant_id: Uuid,
        month_key: &str,
    ) -> Result<UsageLedger, UsageError>;

    /// Unbounded upsert-increment; never rejected.
    async fn record(
        &self,
        tenant_id: Uuid,
        month_key: &str,
        metric: UsageMetric,
        amount: i64,
    ) -> Result<(), UsageError>;

    /// Capped increment: adds one only while the counter is under `limit`.
    ///
    /// Returns whether the increment was accepted. Under concurrent callers
    /// the stored value never exceeds `limit`; which caller wins the last
    /// slot is unspecified.
    async fn try_increment_capped(
        &self,
        tenant_id: Uuid,
        month_key: &str,
        metric: UsageMetric,
        limit: i64,
    ) -> Result<bool, UsageError>;

    /// Repairs overage left by non-capped writers or a lowered limit.
    ///
    /// Run opportunistically on read; a no-op when the counter is at or
    /// under `limit`.
    async fn clamp_overage(
        &self,
        tenant_id: Uuid,
        month_key: &str,
        metric: UsageMetric,
        limit: i64,
    ) -> Result<(), UsageError>;

    /// Inserts the M3 dedupe row, returning whether it was fresh.
    async fn insert_visitor(
        &self,
        tenant_id: Uuid,
        period_key: &str,
        visitor_key: &str,
    ) -> Result<bool, UsageError>;
}

/// Records an automation-reached visitor: dedupe first, then the capped
/// increment, and only on a fresh dedupe row.
///
/// `limit` of `None` means the plan is uncapped for M3.
pub async fn record_automation_visitor(
    store: &dyn UsageStore,
    tenant_id: Uuid,
    period_key: &str,
    visitor_key: &str,
    limit: Option<i64>,
) -> Result<VisitorOutcome, UsageError> {
    let fresh = store
        .insert_visitor(tenant_id, period_key, visitor_key)
        .await?;
    if !fresh {
        return Ok(VisitorOutcome::AlreadyCounted);
    }

    match limit {
        None => {
            store
                .record(tenant_id, period_key, UsageMetric::M3, 1)
                .await?;
            Ok(VisitorOutcome::Counted)
        }
        Some(limit) => {
            let accepted = store
                .try_increment_capped(tenant_id, period_key, UsageMetric::M3, limit)
                .await?;
            if accepted {
                Ok(VisitorOutcome::Counted)
            } else {
                Ok(VisitorOutcome::CapReached)
            }
        }
    }
}

/// Usage store over the usage_ledgers and usage_visitors tables.
pub struct PgUsageStore {
    pool: PgPool,
}

impl PgUsageStore {
    /// Creates a store over a connection pool.
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Makes sure the month's row exists so conditional updates have a row
    /// to match.
    async fn ensure_row(&self, tenant_id: Uuid, month_key: &str) -> Result<(), sqlx::Error> {
        sqlx::query(
            r#"
            INSERT INTO usage_ledgers (tenant_id, month_key)
            VALUES ($1, $2)
            ON CONFLICT (tenant_id, month_key) DO NOTHING
            "#,
        )
        .bind(tenant_id)
        .bind(month_key)
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}

#[async_trait]
impl UsageStore for PgUsageStore {
    async fn get_for_month(
        &self,
        tenant_id: Uuid,
        month_key: &str,
    ) -> Result<UsageLedger, UsageError> {
        let ledger = sqlx::query_as::<_, UsageLedger>(
            r#"
            SELECT tenant_id, month_key, conversations_created, messages_sent,
                   m1_count, m2_count, m3_count
            FROM usage_ledgers
            WHERE tenant_id = $1 AND month_key = $2
            "#,
        )
        .bind(tenant_id)
        .bind(month_key)
        .fetch_optional(&self.pool)
        .await?;

        Ok(ledger.unwrap_or_else(|| UsageLedger::empty(tenant_id, month_key)))
    }

    async fn record(
        &self,
        tenant_id: Uuid,
        month_key: &str,
        metric: UsageMetric,
        amount: i64,
    ) -> Result<(), UsageError> {
        let column = metric.column();
        sqlx::query(&format!(
            r#"
            INSERT INTO usage_ledgers (tenant_id, month_key, {column})
            VALUES ($1, $2, $3)
            ON CONFLICT (tenant_id, month_key)
            DO UPDATE SET {column} = usage_ledgers.{column} + EXCLUDED.{column}
            "#,
        ))
        .bind(tenant_id)
        .bind(month_key)
        .bind(amount)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn try_increment_capped(
        &self,
        tenant_id: Uuid,
        month_key: &str,
        metric: UsageMetric,
        limit: i64,
    ) -> Result<bool, UsageError> {
        self.ensure_row(tenant_id, month_key).await?;

        let column = metric.column();
        let result = sqlx::query(&format!(
            r#"
            UPDATE usage_ledgers
            SET {column} = {column} + 1
            WHERE tenant_id = $1 AND month_key = $2 AND {column} < $3
            "#,
        ))
        .bind(tenant_id)
        .bind(month_key)
        .bind(limit)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    async fn clamp_overage(
        &self,
        tenant_id: Uuid,
        month_key: &str,
        metric: UsageMetric,
        limit: i64,
    ) -> Result<(), UsageError> {
        let column = metric.column();
        sqlx::query(&format!(
            r#"
            UPDATE usage_ledgers
            SET {column} = $3
            WHERE tenant_id = $1 AND month_key = $2 AND {column} > $3
            "#,
        ))
        .bind(tenant_id)
        .bind(month_key)
        .bind(limit)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn insert_visitor(
        &self,
        tenant_id: Uuid,
        period_key: &str,
        visitor_key: &str,
    ) -> Result<bool, UsageError> {
        let result = sqlx::query(
            r#"
            INSERT INTO usage_visitors (tenant_id, period_key, visitor_key, source)
            VALUES ($1, $2, $3, 'M3')
            ON CONFLICT (tenant_id, period_key, visitor_key, source) DO NOTHING
            "#,
        )
        .bind(tenant_id)
        .bind(period_key)
        .bind(visitor_key)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }
}

/// In-memory usage store for tests.
///
/// Honors the same discipline as the Postgres store: the capped increment is
/// a single compare-and-increment under one short critical section, and the
/// visitor dedupe is a set insertion.
#[derive(Default)]
pub struct MemoryUsageStore {
    rows: Mutex<HashMap<(Uuid, String), UsageLedger>>,
    visitors: Mutex<HashSet<(Uuid, String, String)>>,
}

impl MemoryUsageStore {
    /// Creates an empty store.
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl UsageStore for MemoryUsageStore {
    async fn get_for_month(
        &self,
        tenant_id: Uuid,
        month_key: &str,
    ) -> Result<UsageLedger, UsageError> {
        let rows = self.rows.lock().expect("ledger map poisoned");
        Ok(rows
            .get(&(tenant_id, month_key.to_string()))
            .cloned()
            .unwrap_or_else(|| UsageLedger::empty(tenant_id, month_key)))
    }

    async fn record(
        &self,
        tenant_id: Uuid,
        month_key: &str,
        metric: UsageMetric,
        amount: i64,
    ) -> Result<(), UsageError> {
        let mut rows = self.rows.lock().expect("ledger map poisoned");
        let ledger = rows
            .entry((tenant_id, month_key.to_string()))
            .or_insert_with(|| UsageLedger::empty(tenant_id, month_key));
        match metric {
            UsageMetric::ConversationsCreated => ledger.conversations_created += amount,
            UsageMetric::MessagesSent => ledger.messages_sent += amount,
            UsageMetric::M1 => ledger.m1_count += amount,
            UsageMetric::M2 => ledger.m2_count += amount,
            UsageMetric::M3 => ledger.m3_count += amount,
        }
        Ok(())
    }

    async fn try_increment_capped(
        &self,
        tenant_id: Uuid,
        month_key: &str,
        metric: UsageMetric,
        limit: i64,
    ) -> Result<bool, UsageError> {
        let mut rows = self.rows.lock().expect("ledger map poisoned");
        let ledger = rows
            .entry((tenant_id, month_key.to_string()))
            .or_insert_with(|| UsageLedger::empty(tenant_id, month_key));
        let current = ledger.count(metric);
        if current >= limit {
            return Ok(false);
        }
        match metric {
            UsageMetric::ConversationsCreated => ledger.conversations_created += 1,
            UsageMetric::MessagesSent => ledger.messages_sent += 1,
            UsageMetric::M1 => ledger.m1_count += 1,
            UsageMetric::M2 => ledger.m2_count += 1,
            UsageMetric::M3 => ledger.m3_count += 1,
        }
        Ok(true)
    }

    async fn clamp_overage(
        &self,
        tenant_id: Uuid,
        month_key: &str,
        metric: UsageMetric,
        limit: i64,
    ) -> Result<(), UsageError> {
        let mut rows = self.rows.lock().expect("ledger map poisoned");
        if let Some(ledger) = rows.get_mut(&(tenant_id, month_key.to_string())) {
            if ledger.count(metric) > limit {
                match metric {
                    UsageMetric::ConversationsCreated => ledger.conversations_created = limit,
                    UsageMetric::MessagesSent => ledger.messages_sent = limit,
                    UsageMetric::M1 => ledger.m1_count = limit,
                    UsageMetric::M2 => ledger.m2_count = limit,
                    UsageMetric::M3 => ledger.m3_count = limit,
                }
            }
        }
        Ok(())
    }

    async fn insert_visitor(
        &self,
        tenant_id: Uuid,
        period_key: &str,
        visitor_key: &str,
    ) -> Result<bool, UsageError> {
        let mut visitors = self.visitors.lock().expect("visitor set poisoned");
        Ok(visitors.insert((tenant_id, period_key.to_string(), visitor_key.to_string())))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_month_key() {
        let t = Utc.with_ymd_and_hms(2025, 3, 17, 9, 30, 0).unwrap();
        assert_eq!(month_key(t), "2025-03");

        let t = Utc.with_ymd_and_hms(2025, 11, 1, 0, 0, 0).unwrap();
        assert_eq!(month_key(t), "2025-11");
    }

    #[test]
    fn test_month_resets_at() {
        let t = Utc.with_ymd_and_hms(2025, 3, 17, 9, 30, 0).unwrap();
        assert_eq!(
            month_resets_at(t),
            Utc.with_ymd_and_hms(2025, 4, 1, 0, 0, 0).unwrap()
        );

        // December rolls into January of the next year.
        let t = Utc.with_ymd_and_hms(2025, 12, 31, 23, 59, 59).unwrap();
        assert_eq!(
            month_resets_at(t),
            Utc.with_ymd_and_hms(2026, 1, 1, 0, 0, 0).unwrap()
        );
    }

    #[tokio::test]
    async fn test_memory_record_and_read() {
        let store = MemoryUsageStore::new();
        let tenant = Uuid::new_v4();

        store
            .record(tenant, "2025-03", UsageMetric::MessagesSent, 3)
            .await
            .unwrap();
        store
            .record(tenant, "2025-03", UsageMetric::M1, 2)
            .await
            .unwrap();

        let ledger = store.get_for_month(tenant, "2025-03").await.unwrap();
        assert_eq!(ledger.messages_sent, 3);
        assert_eq!(ledger.m1_count, 2);
        assert_eq!(ledger.m2_count, 0);

        // A different month is a different row.
        let ledger = store.get_for_month(tenant, "2025-04").await.unwrap();
        assert_eq!(ledger.messages_sent, 0);
    }

    #[tokio::test]
    async fn test_capped_increment_stops_at_limit() {
        let store = MemoryUsageStore::new();
        let tenant = Uuid::new_v4();

        for _ in 0..5 {
            assert!(store
                .try_increment_capped(tenant, "2025-03", UsageMetric::M2, 5)
                .await
                .unwrap());
        }
        assert!(!store
            .try_increment_capped(tenant, "2025-03", UsageMetric::M2, 5)
            .await
            .unwrap());

        let ledger = store.get_for_month(tenant, "2025-03").await.unwrap();
        assert_eq!(ledger.m2_count, 5);
    }

    #[tokio::test]
    async fn test_clamp_overage() {
        let store = MemoryUsageStore::new();
        let tenant = Uuid::new_v4();

        // A non-capped writer pushed past the limit.
        store
            .record(tenant, "2025-03", UsageMetric::M2, 12)
            .await
            .unwrap();
        store
            .clamp_overage(tenant, "2025-03", UsageMetric::M2, 10)
            .await
            .unwrap();

        let ledger = store.get_for_month(tenant, "2025-03").await.unwrap();
        assert_eq!(ledger.m2_count, 10);
    }

    #[tokio::test]
    async fn test_visitor_dedupe() {
        let store = MemoryUsageStore::new();
        let tenant = Uuid::new_v4();

        assert!(store.insert_visitor(tenant, "2025-03", "v1").await.unwrap());
        assert!(!store.insert_visitor(tenant, "2025-03", "v1").await.unwrap());
        // Same visitor, next period: counted again.
        assert!(store.insert_visitor(tenant, "2025-04", "v1").await.unwrap());
    }

    #[tokio::test]
    async fn test_record_automation_visitor_exactly_once() {
        let store = MemoryUsageStore::new();
        let tenant = Uuid::new_v4();

        let first = record_automation_visitor(&store, tenant, "2025-03", "v1", Some(100))
            .await
            .unwrap();
        assert_eq!(first, VisitorOutcome::Counted);

        // The same visitor triggering the automation again is a no-op.
        for _ in 0..10 {
            let again = record_automation_visitor(&store, tenant, "2025-03", "v1", Some(100))
                .await
                .unwrap();
            assert_eq!(again, VisitorOutcome::AlreadyCounted);
        }

        let ledger = store.get_for_month(tenant, "2025-03").await.unwrap();
        assert_eq!(ledger.m3_count, 1);
    }

    #[tokio::test]
    async fn test_record_automation_visitor_cap() {
        let store = MemoryUsageStore::new();
        let tenant = Uuid::new_v4();

        for i in 0..2 {
            let outcome =
                record_automation_visitor(&store, tenant, "2025-03", &format!("v{}", i), Some(2))
                    .await
                    .unwrap();
            assert_eq!(outcome, VisitorOutcome::Counted);
        }

        let outcome = record_automation_visitor(&store, tenant, "2025-03", "v2", Some(2))
            .await
            .unwrap();
        assert_eq!(outcome, VisitorOutcome::CapReached);

        let ledger = store.get_for_month(tenant, "2025-03").await.unwrap();
        assert_eq!(ledger.m3_count, 2);
    }
}
