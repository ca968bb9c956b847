//! Response DTOs for the gatehouse API
//!
//! Defines the structure of outgoing HTTP response bodies.

use serde::Serialize;

use crate::cache::CacheStats;
use crate::tasks::PopulateStats;

/// Response body for the stats endpoint (GET /stats)
#[derive(Debug, Clone, Serialize)]
pub struct StatsResponse {
    pub cache: CacheStats,
    /// Cache write-back queue outcomes
    pub population: PopulateStats,
}

impl StatsResponse {
    pub fn new(cache: CacheStats, population: PopulateStats) -> Self {
        Self { cache, population }
    }
}

/// Response body for the invalidation endpoints (DELETE /cache/...)
#[derive(Debug, Clone, Serialize)]
pub struct InvalidateResponse {
    /// Success message
    pub message: String,
    /// Number of cache entries removed
    pub removed: u64,
}

impl InvalidateResponse {
    pub fn new(target: impl AsRef<str>, removed: u64) -> Self {
        Self {
            message: format!("Invalidated {} entries for '{}'", removed, target.as_ref()),
            removed,
        }
    }
}

/// Response body for the health endpoint (GET /health)
#[derive(Debug, Clone, Serialize)]
pub struct HealthResponse {
    /// "healthy", or "degraded" while the store is unreachable
    pub status: String,
    /// Current timestamp in ISO 8601 format
    pub timestamp: String,
}

impl HealthResponse {
    pub fn new(store_reachable: bool) -> Self {
        let status = if store_reachable { "healthy" } else { "degraded" };
        Self {
            status: status.to_string(),
            timestamp: chrono::Utc::now().to_rfc3339(),
        }
    }
}
