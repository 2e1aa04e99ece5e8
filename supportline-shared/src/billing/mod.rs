//! Billing lock state machine.
//!
//! A tenant's billing posture resolves to one of four outcomes: free (never
//! locked), active, grace (writes denied with a softer message), or locked
//! (writes denied, lock timestamp stamped once per episode). The
//! grace deadline derives from one place, `grace::grace_end`, so the status
//! computation and the write gate can never disagree about when grace ends.

pub mod grace;
pub mod lock;

pub use grace::grace_end;
pub use lock::{compute_lock_status, is_write_blocked, BillingGuard, LockReason, LockStatus};
