/// Shared counter store for fixed-window counting
///
/// The rate limiter only needs one primitive from its store: an atomic
/// increment-and-read where the first write of a key also assigns a TTL.
/// Stale windows then self-expire and memory stays bounded without any
/// sweeper for the distributed case.
///
/// Two implementations exist:
/// - `RedisCounterStore` (in `crate::redis::counter`) for production
/// - [`MemoryCounterStore`] for tests and as the login limiter's local
///   fallback when Redis is unreachable
///
/// # Example
///
/// ```
/// use supportline_shared::ratelimit::counter::{CounterStore, MemoryCounterStore};
///
/// # async fn example() -> anyhow::Result<()> {
/// let store = MemoryCounterStore::new(10_000);
/// let count = store.incr("rl:tenant:42", 60).await?;
/// assert_eq!(count, 1);
/// # Ok(())
/// # }
/// ```

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{Duration, Instant};
use thiserror::Error;

/// Counter store errors
#[derive(Error, Debug)]
pub enum CounterStoreError {
    /// Store unreachable (connection refused, timeout)
    #[error("counter store unavailable: {0}")]
    Unavailable(String),

    /// Store reachable but the command failed
    #[error("counter store command failed: {0}")]
    Command(String),
}

/// TTL-capable key -> integer store with atomic increment-and-read.
#[async_trait]
pub trait CounterStore: Send + Sync {
    /// Atomically increments `key` and returns the post-increment value.
    ///
    /// When the post-increment value is 1 (first write), the key's expiry is
    /// set to `ttl_secs`. Subsequent increments must not extend the TTL.
    async fn incr(&self, key: &str, ttl_secs: u64) -> Result<i64, CounterStoreError>;
}

struct MemoryEntry {
    count: i64,
    expires_at: Instant,
}

/// In-process counter store.
///
/// Used by tests and as the login limiter's degraded-mode fallback. Expired
/// entries are dropped lazily; when the map exceeds `max_entries` a sweep
/// removes everything already past its expiry.
pub struct MemoryCounterStore {
    entries: Mutex<HashMap<String, MemoryEntry>>,
    max_entries: usize,
}

impl MemoryCounterStore {
    /// Creates a store that sweeps once it holds more than `max_entries` keys.
    pub fn new(max_entries: usize) -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
            max_entries,
        }
    }

    /// Number of live (possibly expired, not yet swept) entries.
    pub fn len(&self) -> usize {
        self.entries.lock().expect("counter map poisoned").len()
    }

    /// Whether the store currently holds no entries.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl CounterStore for MemoryCounterStore {
    async fn incr(&self, key: &str, ttl_secs: u64) -> Result<i64, CounterStoreError> {
        let now = Instant::now();
        let mut entries = self.entries.lock().expect("counter map poisoned");

        if entries.len() > self.max_entries {
            entries.retain(|_, e| e.expires_at > now);
        }

        let entry = entries.entry(key.to_string()).or_insert(MemoryEntry {
            count: 0,
            expires_at: now + Duration::from_secs(ttl_secs),
        });

        // A key past its expiry behaves as absent: reset and re-arm the TTL.
        if entry.expires_at <= now {
            entry.count = 0;
            entry.expires_at = now + Duration::from_secs(ttl_secs);
        }

        entry.count += 1;
        Ok(entry.count)
    }
}

/// A counter store that always fails.
///
/// Exists so fail-open and degraded-mode behavior can be tested without
/// tearing down a real Redis.
pub struct UnavailableCounterStore;

#[async_trait]
impl CounterStore for UnavailableCounterStore {
    async fn incr(&self, _key: &str, _ttl_secs: u64) -> Result<i64, CounterStoreError> {
        Err(CounterStoreError::Unavailable(
            "store intentionally offline".to_string(),
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_incr_counts_up() {
        let store = MemoryCounterStore::new(100);
        assert_eq!(store.incr("k", 60).await.unwrap(), 1);
        assert_eq!(store.incr("k", 60).await.unwrap(), 2);
        assert_eq!(store.incr("k", 60).await.unwrap(), 3);
    }

    #[tokio::test]
    async fn test_independent_keys() {
        let store = MemoryCounterStore::new(100);
        assert_eq!(store.incr("a", 60).await.unwrap(), 1);
        assert_eq!(store.incr("b", 60).await.unwrap(), 1);
        assert_eq!(store.incr("a", 60).await.unwrap(), 2);
    }

    #[tokio::test]
    async fn test_expired_entry_resets() {
        let store = MemoryCounterStore::new(100);
        assert_eq!(store.incr("k", 0).await.unwrap(), 1);
        // TTL of zero expires immediately; next increment starts over.
        assert_eq!(store.incr("k", 60).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_sweep_drops_expired_entries() {
        let store = MemoryCounterStore::new(3);
        for i in 0..4 {
            store.incr(&format!("expired:{}", i), 0).await.unwrap();
        }
        assert_eq!(store.len(), 4);
        // Exceeding max_entries triggers the sweep before inserting.
        store.incr("fresh", 60).await.unwrap();
        assert_eq!(store.len(), 1);
    }

    #[tokio::test]
    async fn test_unavailable_store_errors() {
        let store = UnavailableCounterStore;
        let err = store.incr("k", 60).await.unwrap_err();
        assert!(matches!(err, CounterStoreError::Unavailable(_)));
    }
}
