//! Cache Entry Module
//!
//! The envelope every cached value is stored in.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Schema version written into new entries
pub const ENTRY_VERSION: u32 = 1;

// == Cache Entry ==
/// A cached value with its expiry and tags, stored as JSON.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CacheEntry<T> {
    pub data: T,
    pub expires_at: DateTime<Utc>,
    pub version: u32,
    #[serde(default)]
    pub tags: Vec<String>,
}

impl<T> CacheEntry<T> {
    pub fn new(data: T, expires_at: DateTime<Utc>, tags: Vec<String>) -> Self {
        Self {
            data,
            expires_at,
            version: ENTRY_VERSION,
            tags,
        }
    }

    // == Is Expired ==
    /// Expired once `now >= expires_at`, whether or not the store has
    /// evicted it yet.
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        now >= self.expires_at
    }
}

// == Unit Tests ==
#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_expiration_boundary_condition() {
        let now = Utc::now();
        let entry = CacheEntry::new("v", now + chrono::Duration::seconds(1), Vec::new());

        assert!(!entry.is_expired(now));
        assert!(!entry.is_expired(now + chrono::Duration::milliseconds(999)));
        assert!(entry.is_expired(now + chrono::Duration::seconds(1)));
    }

    #[test]
    fn test_json_shape() {
        let expires = DateTime::parse_from_rfc3339("2030-01-01T00:00:00Z")
            .unwrap()
            .with_timezone(&Utc);
        let entry = CacheEntry::new(vec![1, 2], expires, vec!["users".to_string()]);
        let json: serde_json::Value = serde_json::to_value(&entry).unwrap();

        assert_eq!(json["data"], serde_json::json!([1, 2]));
        assert_eq!(json["version"], 1);
        assert_eq!(json["tags"], serde_json::json!(["users"]));
        assert!(json["expires_at"].as_str().unwrap().starts_with("2030-01-01T00:00:00"));
    }

    #[test]
    fn test_missing_tags_default_to_empty() {
        let raw = r#"{"data":"x","expires_at":"2030-01-01T00:00:00Z","version":1}"#;
        let entry: CacheEntry<String> = serde_json::from_str(raw).unwrap();
        assert!(entry.tags.is_empty());
    }
}
