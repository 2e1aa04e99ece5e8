//! # Supportline Shared Library
//!
//! This crate contains the write-path admission-control core shared by the
//! Supportline API server: every mutating request (conversation creation,
//! message send, AI reply, automation touch) passes through the rate limiter,
//! the billing lock state machine, and the quota evaluator before it reaches
//! business data.
//!
//! ## Module Organization
//!
//! - `models`: Database models (tenants, plans, usage ledger)
//! - `billing`: Billing lock state machine and grace-period policy
//! - `quota`: Per-tenant entitlement checks against plan limits
//! - `ratelimit`: Fixed-window rate limiting over a shared counter store
//! - `redis`: Redis client and Redis-backed counter store
//! - `db`: Connection pool and migrations
//! - `context`: Caller authority, request context, and admission decisions
//! - `ai`: AI reply-generation capability interface

pub mod ai;
pub mod billing;
pub mod context;
pub mod db;
pub mod models;
pub mod quota;
pub mod ratelimit;
pub mod redis;

/// Current version of the Supportline shared library
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
