//! HTTP middleware layers.
//!
//! - `admission`: runs the full admission gate chain on mutating routes
//! - `rate_limit`: standalone limiter layers (login throttling, header stamping)

pub mod admission;
pub mod rate_limit;
