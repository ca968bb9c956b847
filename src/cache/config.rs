//! Cache Config Module
//!
//! Per-domain caching policy.

use std::time::Duration;

use serde::Serialize;

// == Cache Config ==
/// Immutable policy for one logical cache domain.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CacheConfig {
    pub ttl: Duration,
    /// Namespace prepended to every key of the domain
    pub key_prefix: String,
    /// Entry count above which writes log a warning
    pub max_size: u64,
}

impl CacheConfig {
    pub fn new(ttl: Duration, key_prefix: impl Into<String>, max_size: u64) -> Self {
        Self {
            ttl,
            key_prefix: key_prefix.into(),
            max_size,
        }
    }

    pub fn users() -> Self {
        Self::new(Duration::from_secs(30 * 60), "user", 1000)
    }

    pub fn sessions() -> Self {
        Self::new(Duration::from_secs(24 * 60 * 60), "session", 5000)
    }

    pub fn api_responses() -> Self {
        Self::new(Duration::from_secs(5 * 60), "api_response", 10000)
    }

    pub fn db_queries() -> Self {
        Self::new(Duration::from_secs(15 * 60), "db_query", 2000)
    }

    /// Built-in domain owning `key_prefix`, if any.
    pub fn for_prefix(key_prefix: &str) -> Option<Self> {
        [Self::users(), Self::sessions(), Self::api_responses(), Self::db_queries()]
            .into_iter()
            .find(|config| config.key_prefix == key_prefix)
    }

    /// Same domain with a different TTL.
    pub fn with_ttl(&self, ttl: Duration) -> Self {
        Self {
            ttl,
            ..self.clone()
        }
    }

    /// Namespaced store key, e.g. `user:id:42`.
    pub fn full_key(&self, key: &str) -> String {
        format!("{}:{}", self.key_prefix, key)
    }
}
