/// Plan model and limit resolution
///
/// Plans map a key ("free", "pro", "business") to per-metric monthly limits.
/// A `NULL` or non-positive limit means unlimited.
///
/// # Fail-closed resolution
///
/// If a tenant's plan key cannot be resolved (unknown key, table unreadable),
/// resolution falls back to the hard-coded free plan. A database lookup
/// failure must never grant free capacity, so the fallback is the most
/// restrictive tier, never "unlimited".
///
/// # Schema
///
/// ```sql
/// CREATE TABLE plans (
///     key VARCHAR(50) PRIMARY KEY,
///     max_ai_messages_per_month INTEGER,
///     max_automation_visitors_per_month INTEGER,
///     max_agents INTEGER,
///     max_conversations_per_month INTEGER,
///     max_messages_per_month INTEGER
/// );
/// ```

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use sqlx::PgPool;
use std::collections::HashMap;
use thiserror::Error;

use super::usage::UsageMetric;

/// Plan lookup errors
#[derive(Error, Debug)]
pub enum PlanError {
    /// Database error
    #[error("plan lookup failed: {0}")]
    Database(#[from] sqlx::Error),
}

/// A billing plan's limits.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct Plan {
    /// Plan key ("free", "pro", "business", ...)
    pub key: String,

    /// Monthly cap on AI-generated replies (M2)
    pub max_ai_messages_per_month: Option<i32>,

    /// Monthly cap on distinct visitors reached by automation (M3)
    pub max_automation_visitors_per_month: Option<i32>,

    /// Maximum seats
    pub max_agents: Option<i32>,

    /// Monthly conversation cap (unlimited on every current plan)
    pub max_conversations_per_month: Option<i32>,

    /// Monthly message cap (unlimited on every current plan)
    pub max_messages_per_month: Option<i32>,
}

/// Whether a stored limit value means "no cap".
pub fn is_unlimited(limit: Option<i32>) -> bool {
    match limit {
        None => true,
        Some(v) => v <= 0,
    }
}

impl Plan {
    /// The hard-coded free plan used whenever resolution fails.
    ///
    /// Must stay in sync with the seed row in the plans migration.
    pub fn free_fallback() -> Self {
        Plan {
            key: "free".to_string(),
            max_ai_messages_per_month: Some(10),
            max_automation_visitors_per_month: Some(100),
            max_agents: Some(2),
            max_conversations_per_month: None,
            max_messages_per_month: None,
        }
    }

    /// The limit applying to `metric`, `None` meaning unlimited.
    ///
    /// Conversations, messages, and M1 are unlimited by product rule on
    /// every current plan; the model still carries their columns so finite
    /// caps stay expressible.
    pub fn limit_for(&self, metric: UsageMetric) -> Option<i64> {
        let raw = match metric {
            UsageMetric::ConversationsCreated => self.max_conversations_per_month,
            UsageMetric::MessagesSent => self.max_messages_per_month,
            UsageMetric::M1 => None,
            UsageMetric::M2 => self.max_ai_messages_per_month,
            UsageMetric::M3 => self.max_automation_visitors_per_month,
        };
        if is_unlimited(raw) {
            None
        } else {
            raw.map(|v| v as i64)
        }
    }

    /// Finds a plan by key.
    pub async fn find_by_key(pool: &PgPool, key: &str) -> Result<Option<Self>, sqlx::Error> {
        sqlx::query_as::<_, Plan>(
            r#"
            SELECT key, max_ai_messages_per_month, max_automation_visitors_per_month,
                   max_agents, max_conversations_per_month, max_messages_per_month
            FROM plans
            WHERE key = $1
            "#,
        )
        .bind(key)
        .fetch_optional(pool)
        .await
    }
}

/// Source of plan definitions.
///
/// The quota evaluator consumes this seam; the fail-closed fallback lives in
/// the evaluator so every caller gets it.
#[async_trait]
pub trait PlanSource: Send + Sync {
    /// Looks up a plan by key.
    async fn find(&self, key: &str) -> Result<Option<Plan>, PlanError>;
}

/// Plan source backed by the plans table.
pub struct PgPlanSource {
    pool: PgPool,
}

impl PgPlanSource {
    /// Creates a plan source over a connection pool.
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl PlanSource for PgPlanSource {
    async fn find(&self, key: &str) -> Result<Option<Plan>, PlanError> {
        Ok(Plan::find_by_key(&self.pool, key).await?)
    }
}

/// Static in-memory plan source.
///
/// Used in tests and as a bootstrap source before the plans table is seeded.
pub struct StaticPlanSource {
    plans: HashMap<String, Plan>,
}

impl StaticPlanSource {
    /// Creates a source from explicit plans.
    pub fn new(plans: Vec<Plan>) -> Self {
        Self {
            plans: plans.into_iter().map(|p| (p.key.clone(), p)).collect(),
        }
    }

    /// The built-in free/pro/business tiers, mirroring the migration seed.
    pub fn builtin() -> Self {
        Self::new(vec![
            Plan::free_fallback(),
            Plan {
                key: "pro".to_string(),
                max_ai_messages_per_month: Some(1000),
                max_automation_visitors_per_month: Some(5000),
                max_agents: Some(10),
                max_conversations_per_month: None,
                max_messages_per_month: None,
            },
            Plan {
                key: "business".to_string(),
                max_ai_messages_per_month: Some(5000),
                max_automation_visitors_per_month: Some(25000),
                max_agents: Some(50),
                max_conversations_per_month: None,
                max_messages_per_month: None,
            },
        ])
    }
}

#[async_trait]
impl PlanSource for StaticPlanSource {
    async fn find(&self, key: &str) -> Result<Option<Plan>, PlanError> {
        Ok(self.plans.get(key).cloned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_is_unlimited() {
        assert!(is_unlimited(None));
        assert!(is_unlimited(Some(0)));
        assert!(is_unlimited(Some(-1)));
        assert!(!is_unlimited(Some(1)));
    }

    #[test]
    fn test_free_fallback_is_capped() {
        let plan = Plan::free_fallback();
        assert_eq!(plan.limit_for(UsageMetric::M2), Some(10));
        assert_eq!(plan.limit_for(UsageMetric::M3), Some(100));
        // Analytics metrics are unlimited everywhere.
        assert_eq!(plan.limit_for(UsageMetric::ConversationsCreated), None);
        assert_eq!(plan.limit_for(UsageMetric::MessagesSent), None);
        assert_eq!(plan.limit_for(UsageMetric::M1), None);
    }

    #[tokio::test]
    async fn test_static_source_builtin() {
        let source = StaticPlanSource::builtin();
        let pro = source.find("pro").await.unwrap().unwrap();
        assert_eq!(pro.limit_for(UsageMetric::M2), Some(1000));
        assert!(source.find("nonexistent").await.unwrap().is_none());
    }

    #[test]
    fn test_non_positive_limit_means_unlimited() {
        let plan = Plan {
            key: "custom".to_string(),
            max_ai_messages_per_month: Some(0),
            max_automation_visitors_per_month: Some(-5),
            max_agents: None,
            max_conversations_per_month: None,
            max_messages_per_month: None,
        };
        assert_eq!(plan.limit_for(UsageMetric::M2), None);
        assert_eq!(plan.limit_for(UsageMetric::M3), None);
    }
}
