//! Gatehouse - admission control and response caching over a shared store
//!
//! Provides a distributed rate limiter (sliding window and token bucket), a
//! typed TTL cache with tag invalidation, and the axum middleware composing
//! them in front of an HTTP API. State lives in Redis, or in an in-process
//! store for single-node runs.

pub mod api;
pub mod cache;
pub mod catalog;
pub mod clock;
pub mod config;
pub mod error;
pub mod middleware;
pub mod models;
pub mod ratelimit;
pub mod store;
pub mod tasks;

pub use api::{create_router, AppState};
pub use cache::{Cache, CacheAside, CacheConfig};
pub use config::Config;
pub use ratelimit::{RateLimitConfig, RateLimitResult, RateLimiter};
pub use store::{KeyValueStore, MemoryStore, RedisStore};
pub use tasks::{spawn_cleanup_task, spawn_populate_workers};
