//! Concurrency properties of the usage ledger.
//!
//! These drive the in-memory store, which honors the same conditional-update
//! discipline as the Postgres store: the capped increment is a single
//! compare-and-increment and the visitor dedupe is a set insertion. The
//! properties here are the ones the write path depends on: the capped
//! counter never exceeds its limit under concurrent writers, and a visitor
//! is counted at most once per period no matter how many automation runs
//! touch it.

use std::sync::Arc;

use proptest::prelude::*;
use supportline_shared::models::usage::{
    record_automation_visitor, MemoryUsageStore, UsageMetric, UsageStore, VisitorOutcome,
};
use uuid::Uuid;

#[tokio::test]
async fn concurrent_capped_increments_never_exceed_limit() {
    let store = Arc::new(MemoryUsageStore::new());
    let tenant = Uuid::new_v4();
    let limit = 50_i64;
    let writers = 200;

    let mut handles = Vec::with_capacity(writers);
    for _ in 0..writers {
        let store = store.clone();
        handles.push(tokio::spawn(async move {
            store
                .try_increment_capped(tenant, "2025-03", UsageMetric::M2, limit)
                .await
                .unwrap()
        }));
    }

    let mut accepted = 0;
    for handle in handles {
        if handle.await.unwrap() {
            accepted += 1;
        }
    }

    let ledger = store.get_for_month(tenant, "2025-03").await.unwrap();
    assert_eq!(ledger.m2_count, limit);
    assert_eq!(accepted, limit);
}

#[tokio::test]
async fn fewer_writers_than_limit_all_accepted() {
    let store = Arc::new(MemoryUsageStore::new());
    let tenant = Uuid::new_v4();

    let mut handles = Vec::new();
    for _ in 0..10 {
        let store = store.clone();
        handles.push(tokio::spawn(async move {
            store
                .try_increment_capped(tenant, "2025-03", UsageMetric::M2, 100)
                .await
                .unwrap()
        }));
    }
    for handle in handles {
        assert!(handle.await.unwrap());
    }

    let ledger = store.get_for_month(tenant, "2025-03").await.unwrap();
    assert_eq!(ledger.m2_count, 10);
}

#[tokio::test]
async fn concurrent_same_visitor_counted_once() {
    let store = Arc::new(MemoryUsageStore::new());
    let tenant = Uuid::new_v4();

    let mut handles = Vec::new();
    for _ in 0..50 {
        let store = store.clone();
        handles.push(tokio::spawn(async move {
            record_automation_visitor(store.as_ref(), tenant, "2025-03", "visitor-7", Some(1000))
                .await
                .unwrap()
        }));
    }

    let mut counted = 0;
    for handle in handles {
        if handle.await.unwrap() == VisitorOutcome::Counted {
            counted += 1;
        }
    }

    assert_eq!(counted, 1);
    let ledger = store.get_for_month(tenant, "2025-03").await.unwrap();
    assert_eq!(ledger.m3_count, 1);
}

proptest! {
    // The final counter value is min(distinct writers, limit) for any mix of
    // writer count and limit.
    #[test]
    fn capped_counter_is_min_of_writers_and_limit(
        writers in 0usize..120,
        limit in 1i64..80,
    ) {
        let rt = tokio::runtime::Builder::new_current_thread()
            .build()
            .unwrap();
        rt.block_on(async {
            let store = MemoryUsageStore::new();
            let tenant = Uuid::new_v4();
            for _ in 0..writers {
                let _ = store
                    .try_increment_capped(tenant, "2025-06", UsageMetric::M3, limit)
                    .await
                    .unwrap();
            }
            let ledger = store.get_for_month(tenant, "2025-06").await.unwrap();
            prop_assert_eq!(ledger.m3_count, (writers as i64).min(limit));
            Ok(())
        })?;
    }

    // Replaying any sequence of visitor touches yields one count per distinct
    // visitor key, capped at the limit.
    #[test]
    fn visitor_dedupe_counts_distinct_keys(
        touches in proptest::collection::vec(0u8..20, 0..200),
        limit in 1i64..15,
    ) {
        let rt = tokio::runtime::Builder::new_current_thread()
            .build()
            .unwrap();
        rt.block_on(async {
            let store = MemoryUsageStore::new();
            let tenant = Uuid::new_v4();
            let mut distinct = std::collections::HashSet::new();
            for visitor in &touches {
                distinct.insert(*visitor);
                record_automation_visitor(
                    &store,
                    tenant,
                    "2025-06",
                    &format!("v{}", visitor),
                    Some(limit),
                )
                .await
                .unwrap();
            }
            let ledger = store.get_for_month(tenant, "2025-06").await.unwrap();
            prop_assert_eq!(ledger.m3_count, (distinct.len() as i64).min(limit));
            Ok(())
        })?;
    }
}
