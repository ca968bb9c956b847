//! Cache Statistics Module
//!
//! Aggregate hit/miss/set counters. The counters live in the shared store
//! so every replica reports the same numbers.

use std::collections::HashMap;

use serde::Serialize;

pub(crate) const HITS_KEY: &str = "cache:stats:hits";
pub(crate) const MISSES_KEY: &str = "cache:stats:misses";
pub(crate) const SETS_KEY: &str = "cache:stats:sets";
/// Hash of domain prefix to tracked entry count
pub(crate) const SIZE_KEY: &str = "cache:stats:size";

// == Cache Stats ==
/// Snapshot of cache performance, global across domains.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    pub sets: u64,
    pub hit_rate: f64,
    /// Tracked entries across all domains
    pub size: u64,
    /// As reported by the store, e.g. `1.04M`
    pub memory_usage: String,
}

impl CacheStats {
    pub fn new(hits: u64, misses: u64, sets: u64, size: u64, memory_usage: String) -> Self {
        Self {
            hits,
            misses,
            sets,
            hit_rate: hit_rate(hits, misses),
            size,
            memory_usage,
        }
    }
}

// == Hit Rate ==
/// hits / (hits + misses), or 0.0 if nothing was read yet.
pub fn hit_rate(hits: u64, misses: u64) -> f64 {
    let total = hits + misses;
    if total == 0 {
        0.0
    } else {
        hits as f64 / total as f64
    }
}

/// Parses a stored counter; absent or garbled counters read as zero.
pub(crate) fn parse_counter(raw: Option<&str>) -> u64 {
    raw.and_then(|value| value.parse::<i64>().ok())
        .map(|value| value.max(0) as u64)
        .unwrap_or(0)
}

/// Sums per-domain size counters, ignoring domains that drifted negative.
pub(crate) fn total_size(sizes: &HashMap<String, String>) -> u64 {
    sizes.values().map(|value| parse_counter(Some(value))).sum()
}

// == Unit Tests ==
#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hit_rate_calculation() {
        assert_eq!(hit_rate(0, 0), 0.0);
        assert_eq!(hit_rate(3, 1), 0.75);
        assert_eq!(hit_rate(0, 5), 0.0);
    }

    #[test]
    fn test_stats_new_computes_rate() {
        let stats = CacheStats::new(1, 1, 4, 2, "1.00K".to_string());
        assert_eq!(stats.hit_rate, 0.5);
        assert_eq!(stats.sets, 4);
    }

    #[test]
    fn test_parse_counter() {
        assert_eq!(parse_counter(Some("12")), 12);
        assert_eq!(parse_counter(Some("-3")), 0);
        assert_eq!(parse_counter(Some("abc")), 0);
        assert_eq!(parse_counter(None), 0);
    }

    #[test]
    fn test_total_size_clamps_each_domain() {
        let sizes = HashMap::from([
            ("user".to_string(), "3".to_string()),
            ("session".to_string(), "-2".to_string()),
            ("db_query".to_string(), "4".to_string()),
        ]);
        assert_eq!(total_size(&sizes), 7);
    }
}
