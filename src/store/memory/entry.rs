//! Stored Entry Module
//!
//! A single key's value plus its optional expiry inside the in-memory store.

use std::collections::HashMap;

use chrono::{DateTime, Utc};

use crate::error::{StoreError, StoreResult};

// == Stored Value ==
/// The Redis data types the in-memory store understands.
#[derive(Debug, Clone, PartialEq)]
pub enum StoredValue {
    Str(String),
    Hash(HashMap<String, String>),
    /// Kept sorted by `(score, member)`
    SortedSet(Vec<(f64, String)>),
}

impl StoredValue {
    pub fn type_name(&self) -> &'static str {
        match self {
            StoredValue::Str(_) => "string",
            StoredValue::Hash(_) => "hash",
            StoredValue::SortedSet(_) => "zset",
        }
    }

    /// Rough byte footprint, used for memory reporting.
    pub fn approx_size(&self) -> usize {
        match self {
            StoredValue::Str(s) => s.len(),
            StoredValue::Hash(map) => map.iter().map(|(k, v)| k.len() + v.len()).sum(),
            StoredValue::SortedSet(items) => items.iter().map(|(_, m)| m.len() + 8).sum(),
        }
    }
}

pub fn wrong_type(key: &str, found: &StoredValue, wanted: &str) -> StoreError {
    StoreError::Command(format!(
        "WRONGTYPE key '{}' holds a {}, not a {}",
        key,
        found.type_name(),
        wanted
    ))
}

// == Stored Entry ==
#[derive(Debug, Clone)]
pub struct StoredEntry {
    pub value: StoredValue,
    /// None = no expiration
    pub expires_at: Option<DateTime<Utc>>,
}

impl StoredEntry {
    pub fn new(value: StoredValue) -> Self {
        Self {
            value,
            expires_at: None,
        }
    }

    /// Expired once `now >= expires_at`.
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        match self.expires_at {
            Some(expires) => now >= expires,
            None => false,
        }
    }

    pub fn expire_in_ms(&mut self, now: DateTime<Utc>, ttl_ms: i64) {
        self.expires_at = Some(now + chrono::Duration::milliseconds(ttl_ms));
    }

    pub fn as_str(&self, key: &str) -> StoreResult<&str> {
        match &self.value {
            StoredValue::Str(s) => Ok(s),
            other => Err(wrong_type(key, other, "string")),
        }
    }

    pub fn as_hash_mut(&mut self, key: &str) -> StoreResult<&mut HashMap<String, String>> {
        match &mut self.value {
            StoredValue::Hash(map) => Ok(map),
            other => Err(wrong_type(key, other, "hash")),
        }
    }

    pub fn as_zset_mut(&mut self, key: &str) -> StoreResult<&mut Vec<(f64, String)>> {
        match &mut self.value {
            StoredValue::SortedSet(items) => Ok(items),
            other => Err(wrong_type(key, other, "zset")),
        }
    }
}
