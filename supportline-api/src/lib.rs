//! # Supportline API Server
//!
//! HTTP surface for the Supportline write path. Every mutating endpoint runs
//! behind the admission gate chain: fixed-window rate limiter, per-tenant
//! kill switch, billing lock state machine, and the quota evaluator, in that
//! order. Denials carry stable machine-readable codes; the limiter's
//! metadata is stamped into `X-RateLimit-*` response headers.
//!
//! ## Module Organization
//!
//! - `admission`: The gate chain itself and post-write usage recording
//! - `app`: Application state and router builder
//! - `config`: Environment-driven configuration
//! - `error`: Unified HTTP error type and denial mapping
//! - `middleware`: Admission and login-throttle layers
//! - `routes`: Handlers

pub mod admission;
pub mod app;
pub mod config;
pub mod error;
pub mod middleware;
pub mod routes;
