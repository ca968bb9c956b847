//! Configuration Module
//!
//! Handles loading and managing server configuration from environment variables.

use std::env;
use std::str::FromStr;
use std::time::Duration;

/// Server configuration parameters.
///
/// All values can be configured via environment variables with sensible defaults.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    /// HTTP server port
    pub server_port: u16,
    /// Shared store URL; the in-memory store is used when unset
    pub redis_url: Option<String>,
    /// Deadline for a single store round-trip
    pub store_timeout: Duration,
    /// Deadline for a whole rate limit check
    pub rate_limit_timeout: Duration,
    /// Key bound of the in-memory store
    pub memory_max_keys: usize,
    /// In-memory store sweep interval in seconds
    pub cleanup_interval: u64,
    /// Concurrent cache write-backs
    pub populate_workers: usize,
    /// Pending cache write-backs before new ones are dropped
    pub populate_queue: usize,
    /// Lifetime of cached whole responses
    pub response_cache_ttl: Duration,
}

impl Config {
    /// Creates a new Config by loading values from environment variables.
    ///
    /// # Environment Variables
    /// - `SERVER_PORT` - HTTP server port (default: 8080)
    /// - `REDIS_URL` - Shared store URL (default: unset, in-memory store)
    /// - `STORE_TIMEOUT_MS` - Store operation timeout (default: 3000)
    /// - `RATE_LIMIT_TIMEOUT_MS` - Rate limit check timeout (default: 500)
    /// - `MEMORY_MAX_KEYS` - In-memory store key bound (default: 100000)
    /// - `CLEANUP_INTERVAL` - Sweep frequency in seconds (default: 1)
    /// - `POPULATE_WORKERS` - Cache write-back concurrency (default: 8)
    /// - `POPULATE_QUEUE` - Cache write-back queue capacity (default: 1024)
    /// - `RESPONSE_CACHE_TTL` - Response cache TTL in seconds (default: 600)
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            server_port: parse_var("SERVER_PORT").unwrap_or(defaults.server_port),
            redis_url: env::var("REDIS_URL").ok().filter(|url| !url.trim().is_empty()),
            store_timeout: parse_var("STORE_TIMEOUT_MS")
                .map(Duration::from_millis)
                .unwrap_or(defaults.store_timeout),
            rate_limit_timeout: parse_var("RATE_LIMIT_TIMEOUT_MS")
                .map(Duration::from_millis)
                .unwrap_or(defaults.rate_limit_timeout),
            memory_max_keys: parse_var("MEMORY_MAX_KEYS").unwrap_or(defaults.memory_max_keys),
            cleanup_interval: parse_var("CLEANUP_INTERVAL").unwrap_or(defaults.cleanup_interval),
            populate_workers: parse_var("POPULATE_WORKERS").unwrap_or(defaults.populate_workers),
            populate_queue: parse_var("POPULATE_QUEUE").unwrap_or(defaults.populate_queue),
            response_cache_ttl: parse_var("RESPONSE_CACHE_TTL")
                .map(Duration::from_secs)
                .unwrap_or(defaults.response_cache_ttl),
        }
    }
}

/// Unset or unparsable variables fall back to defaults.
fn parse_var<T: FromStr>(name: &str) -> Option<T> {
    env::var(name).ok().and_then(|v| v.trim().parse().ok())
}

impl Default for Config {
    fn default() -> Self {
        Self {
            server_port: 8080,
            redis_url: None,
            store_timeout: Duration::from_millis(3000),
            rate_limit_timeout: Duration::from_millis(500),
            memory_max_keys: 100_000,
            cleanup_interval: 1,
            populate_workers: 8,
            populate_queue: 1024,
            response_cache_ttl: Duration::from_secs(600),
        }
    }
}
