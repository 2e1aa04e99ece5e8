//! Database models for admission control.

pub mod plan;
pub mod tenant;
pub mod usage;
