//! Redis client and Redis-backed counter store.

pub mod client;
pub mod counter;

pub use client::{RedisClient, RedisClientError, RedisConfig};
pub use counter::RedisCounterStore;
