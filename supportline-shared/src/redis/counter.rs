/// Redis-backed counter store
///
/// Implements [`CounterStore`] with INCR plus a first-write EXPIRE: when the
/// post-increment value is 1 the key just came into existence and gets a TTL
/// of one rate-limit window, so stale window counters self-expire and Redis
/// memory stays bounded.
///
/// Commands use raw `redis::cmd` calls with the client's bounded timeout;
/// callers (the rate limiter) decide what a store failure means.

use crate::ratelimit::counter::{CounterStore, CounterStoreError};
use crate::redis::client::RedisClient;
use async_trait::async_trait;

/// Counter store over the shared Redis client.
pub struct RedisCounterStore {
    client: RedisClient,
}

impl RedisCounterStore {
    /// Creates a counter store over an existing Redis client.
    pub fn new(client: RedisClient) -> Self {
        Self { client }
    }
}

#[async_trait]
impl CounterStore for RedisCounterStore {
    async fn incr(&self, key: &str, ttl_secs: u64) -> Result<i64, CounterStoreError> {
        let mut conn = self.client.get_connection();
        let timeout = self.client.command_timeout();

        let count: i64 = tokio::time::timeout(
            timeout,
            redis::cmd("INCR").arg(key).query_async(&mut conn),
        )
        .await
        .map_err(|_| CounterStoreError::Unavailable("INCR timed out".to_string()))?
        .map_err(|e: redis::RedisError| CounterStoreError::Command(e.to_string()))?;

        if count == 1 {
            // First write of this window: arm the TTL. A failure here is not
            // fatal to the decision; the key would merely outlive its window.
            let expire: Result<Result<i64, redis::RedisError>, _> = tokio::time::timeout(
                timeout,
                redis::cmd("EXPIRE")
                    .arg(key)
                    .arg(ttl_secs)
                    .query_async(&mut conn),
            )
            .await;

            if let Ok(Err(e)) = expire {
                tracing::warn!(error = %e, key = %key, "Failed to set TTL on rate-limit counter");
            }
        }

        Ok(count)
    }
}
