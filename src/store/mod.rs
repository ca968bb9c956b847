//! Store Module
//!
//! The shared key-value store both the cache and the rate limiter persist
//! into. Callers namespace their own keys; the store has no notion of cache
//! or quota semantics.
//!
//! Two backends implement [`KeyValueStore`]:
//! - [`RedisStore`] for deployments where several replicas share one Redis
//! - [`MemoryStore`] for single-process runs and tests

mod memory;
mod redis_store;
mod script;

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;

use crate::error::StoreResult;

pub use memory::MemoryStore;
pub use redis_store::RedisStore;
pub use script::{arg_at, key_at, NativeScript, ScriptOps, StoreScript};

// == Write Operations ==
/// A single write inside an all-or-nothing [`KeyValueStore::apply`] batch.
#[derive(Debug, Clone, PartialEq)]
pub enum WriteOp {
    Set {
        key: String,
        value: String,
        ttl: Option<Duration>,
    },
    Delete {
        key: String,
    },
    IncrBy {
        key: String,
        delta: i64,
    },
    HIncrBy {
        key: String,
        field: String,
        delta: i64,
    },
    /// Writes a string and bumps `counter[field]` by one only if `key` was
    /// absent, as a single step.
    SetCounted {
        key: String,
        value: String,
        ttl: Duration,
        counter: String,
        field: String,
    },
    ZAdd {
        key: String,
        score: f64,
        member: String,
    },
    /// Removes sorted-set members scored at or below `max`.
    ZRemRangeByScore {
        key: String,
        max: f64,
    },
    /// Raises the key's TTL to `ttl`, never shortening it.
    ExtendTtl {
        key: String,
        ttl: Duration,
    },
}

// == Key Value Store ==
/// Atomic, TTL-capable key-value store.
#[async_trait]
pub trait KeyValueStore: Send + Sync {
    async fn ping(&self) -> StoreResult<()>;

    async fn get(&self, key: &str) -> StoreResult<Option<String>>;

    /// Writes a string value, replacing whatever was there.
    async fn set(&self, key: &str, value: &str, ttl: Option<Duration>) -> StoreResult<()>;

    /// Removes the given keys and returns how many existed.
    async fn delete(&self, keys: &[String]) -> StoreResult<u64>;

    async fn exists(&self, key: &str) -> StoreResult<bool>;

    async fn incr_by(&self, key: &str, delta: i64) -> StoreResult<i64>;

    async fn hget_all(&self, key: &str) -> StoreResult<HashMap<String, String>>;

    /// Sorted-set members scored within `min..=max`, lowest first.
    async fn zrange_by_score(&self, key: &str, min: f64, max: f64) -> StoreResult<Vec<String>>;

    /// Lists keys matching a glob. Cost grows with the whole key space.
    async fn keys(&self, pattern: &str) -> StoreResult<Vec<String>>;

    /// Applies every write or none of them.
    async fn apply(&self, ops: &[WriteOp]) -> StoreResult<()>;

    /// Runs a multi-step script atomically against the store.
    async fn eval(&self, script: &StoreScript, keys: &[String], args: &[i64])
        -> StoreResult<Vec<i64>>;

    /// Memory used by the store, human readable (e.g. `1.04M`).
    async fn memory_usage(&self) -> StoreResult<String>;
}

/// Milliseconds of a TTL, never zero (a zero TTL is rejected by Redis).
pub(crate) fn ttl_millis(ttl: Duration) -> u64 {
    (ttl.as_millis() as u64).max(1)
}

/// Formats a byte count the way Redis reports `used_memory_human`.
pub(crate) fn human_bytes(bytes: u64) -> String {
    const UNITS: [(&str, f64); 3] = [("G", 1024.0 * 1024.0 * 1024.0), ("M", 1024.0 * 1024.0), ("K", 1024.0)];

    for (suffix, size) in UNITS {
        if bytes as f64 >= size {
            return format!("{:.2}{}", bytes as f64 / size, suffix);
        }
    }
    format!("{}B", bytes)
}
