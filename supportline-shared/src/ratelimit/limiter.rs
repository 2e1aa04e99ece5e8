/// Fixed-window rate limiter
///
/// Turns a request into an admit/deny decision using fixed time windows
/// against a shared [`CounterStore`]. Time is divided into non-overlapping
/// intervals; each interval gets its own counter keyed
/// `rl:{key}:{window_index}` with a TTL of one window, so stale windows
/// self-expire.
///
/// # Failure semantics
///
/// Rate limiting is a protective layer, not a correctness guarantee. If the
/// counter store is unreachable the limiter **fails open**: the request is
/// admitted and a warning is logged. This is the opposite of the quota and
/// billing gates, which fail closed to the free tier; the asymmetry is
/// deliberate product behavior.
///
/// # Example
///
/// ```
/// use std::sync::Arc;
/// use std::time::Duration;
/// use supportline_shared::ratelimit::{FixedWindowLimiter, MemoryCounterStore};
///
/// # async fn example() {
/// let store = Arc::new(MemoryCounterStore::new(10_000));
/// let limiter = FixedWindowLimiter::new(store);
///
/// let decision = limiter.admit("tenant-42:203.0.113.9", 30, Duration::from_secs(60)).await;
/// assert!(decision.allowed);
/// assert_eq!(decision.remaining, 29);
/// # }
/// ```

use super::counter::CounterStore;
use chrono::Utc;
use std::sync::Arc;
use std::time::Duration;

/// Result of a rate-limit check
#[derive(Debug, Clone, Copy)]
pub struct RateLimitDecision {
    /// Whether the request is admitted
    pub allowed: bool,

    /// Effective limit for this window (after environment scaling)
    pub limit: u32,

    /// Requests left in the current window
    pub remaining: u32,

    /// Unix milliseconds at which the current window ends
    pub reset_at_ms: i64,

    /// Seconds until the window resets (`Retry-After` on deny)
    pub retry_after_secs: u64,
}

/// Fixed-window rate limiter over a shared counter store.
pub struct FixedWindowLimiter {
    store: Arc<dyn CounterStore>,
    multiplier: u32,
}

impl FixedWindowLimiter {
    /// Creates a limiter with no environment scaling.
    pub fn new(store: Arc<dyn CounterStore>) -> Self {
        Self {
            store,
            multiplier: 1,
        }
    }

    /// Scales every limit by `multiplier`.
    ///
    /// Non-production environments typically run with a multiplier of 3 so
    /// integration suites and manual testing do not trip limits tuned for
    /// production traffic. The algorithm is unchanged.
    pub fn with_multiplier(mut self, multiplier: u32) -> Self {
        self.multiplier = multiplier.max(1);
        self
    }

    /// Checks `key` against `limit` requests per `window`, using the wall clock.
    pub async fn admit(&self, key: &str, limit: u32, window: Duration) -> RateLimitDecision {
        self.admit_at(key, limit, window, Utc::now().timestamp_millis())
            .await
    }

    /// Checks `key` against `limit` requests per `window` at `now_ms`.
    ///
    /// Exposed separately so tests can pin the clock at window boundaries.
    pub async fn admit_at(
        &self,
        key: &str,
        limit: u32,
        window: Duration,
        now_ms: i64,
    ) -> RateLimitDecision {
        let limit = limit.saturating_mul(self.multiplier);
        let window_ms = window.as_millis().max(1) as i64;
        let window_index = now_ms.div_euclid(window_ms);
        let reset_at_ms = (window_index + 1) * window_ms;
        let retry_after_secs = ((reset_at_ms - now_ms).max(0) as u64).div_ceil(1000);

        let counter_key = format!("rl:{}:{}", key, window_index);
        let ttl_secs = (window_ms as u64).div_ceil(1000);

        match self.store.incr(&counter_key, ttl_secs).await {
            Ok(count) => {
                let allowed = count <= limit as i64;
                let remaining = (limit as i64 - count).max(0) as u32;
                RateLimitDecision {
                    allowed,
                    limit,
                    remaining,
                    reset_at_ms,
                    retry_after_secs: if allowed { 0 } else { retry_after_secs },
                }
            }
            Err(e) => {
                // Fail open: availability over strict enforcement.
                tracing::warn!(error = %e, key = %key, "Rate limit store unavailable, admitting request");
                RateLimitDecision {
                    allowed: true,
                    limit,
                    remaining: limit,
                    reset_at_ms,
                    retry_after_secs: 0,
                }
            }
        }
    }
}
