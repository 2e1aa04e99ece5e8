/// Login-attempt rate limiter with local fallback
///
/// Same fixed-window algorithm as [`FixedWindowLimiter`], keyed by caller IP,
/// but with different failure semantics: login throttling is
/// security-sensitive, so when the shared counter store is unavailable the
/// limiter degrades to a per-process in-memory map instead of failing open.
/// Local enforcement is weaker than distributed enforcement (each process
/// counts independently) but still bounds credential-stuffing attempts.
///
/// The fallback map is an explicitly constructed component owned by this
/// limiter, not module-level state; it is swept when it exceeds its size
/// threshold.
///
/// # Example
///
/// ```
/// use std::sync::Arc;
/// use std::time::Duration;
/// use supportline_shared::ratelimit::{LoginRateLimiter, MemoryCounterStore};
///
/// # async fn example() {
/// let store = Arc::new(MemoryCounterStore::new(10_000));
/// let limiter = LoginRateLimiter::new(store, 5, Duration::from_secs(300));
///
/// let decision = limiter.check("203.0.113.9").await;
/// assert!(decision.allowed);
/// # }
/// ```

use super::counter::{CounterStore, MemoryCounterStore};
use super::limiter::RateLimitDecision;
use chrono::Utc;
use std::sync::Arc;
use std::time::Duration;

/// Upper bound on fallback map entries before a sweep
const FALLBACK_MAX_ENTRIES: usize = 50_000;

/// Login-attempt limiter: distributed when possible, local when not.
pub struct LoginRateLimiter {
    store: Arc<dyn CounterStore>,
    fallback: MemoryCounterStore,
    limit: u32,
    window: Duration,
}

impl LoginRateLimiter {
    /// Creates a limiter allowing `limit` attempts per `window` per IP.
    pub fn new(store: Arc<dyn CounterStore>, limit: u32, window: Duration) -> Self {
        Self {
            store,
            fallback: MemoryCounterStore::new(FALLBACK_MAX_ENTRIES),
            limit,
            window,
        }
    }

    /// Checks a login attempt from `ip`, using the wall clock.
    pub async fn check(&self, ip: &str) -> RateLimitDecision {
        self.check_at(ip, Utc::now().timestamp_millis()).await
    }

    /// Checks a login attempt from `ip` at `now_ms`.
    pub async fn check_at(&self, ip: &str, now_ms: i64) -> RateLimitDecision {
        let window_ms = self.window.as_millis().max(1) as i64;
        let window_index = now_ms.div_euclid(window_ms);
        let reset_at_ms = (window_index + 1) * window_ms;
        let retry_after_secs = ((reset_at_ms - now_ms).max(0) as u64).div_ceil(1000);

        let key = format!("rl:login:{}:{}", ip, window_index);
        let ttl_secs = (window_ms as u64).div_ceil(1000);

        let count = match self.store.incr(&key, ttl_secs).await {
            Ok(count) => count,
            Err(e) => {
                tracing::warn!(error = %e, ip = %ip, "Login limiter store unavailable, using local fallback");
                match self.fallback.incr(&key, ttl_secs).await {
                    Ok(count) => count,
                    // The in-memory store cannot actually fail; admit if it
                    // somehow does rather than locking out all logins.
                    Err(_) => 0,
                }
            }
        };

        let allowed = count <= self.limit as i64;
        RateLimitDecision {
            allowed,
            limit: self.limit,
            remaining: (self.limit as i64 - count).max(0) as u32,
            reset_at_ms,
            retry_after_secs: if allowed { 0 } else { retry_after_secs },
        }
    }
}
