//! Fixed-window rate limiting over a shared counter store.
//!
//! - `counter`: the `CounterStore` abstraction plus an in-memory implementation
//! - `limiter`: the general fail-open fixed-window limiter
//! - `login`: the security-sensitive login-attempt limiter with local fallback

pub mod counter;
pub mod limiter;
pub mod login;

pub use counter::{CounterStore, CounterStoreError, MemoryCounterStore, UnavailableCounterStore};
pub use limiter::{FixedWindowLimiter, RateLimitDecision};
pub use login::LoginRateLimiter;
