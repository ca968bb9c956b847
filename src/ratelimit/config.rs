//! Rate limit policy and decision types.

use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;

/// Admission algorithm used by [`RateLimiter::check_rate_limit`](super::RateLimiter::check_rate_limit).
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Algorithm {
    #[default]
    SlidingWindow,
    TokenBucket,
}

// == Rate Limit Config ==
/// Quota policy for one endpoint class.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RateLimitConfig {
    /// Admissions allowed per `window` by the sliding window
    pub requests_per_minute: u32,
    pub requests_per_hour: u32,
    pub requests_per_day: u32,
    /// Token bucket capacity
    pub burst_size: u32,
    pub window: Duration,
    pub key_prefix: String,
    pub algorithm: Algorithm,
    /// Deadline for the whole check, store round-trip included
    pub check_timeout: Duration,
}

impl RateLimitConfig {
    /// Policy for ordinary API endpoints.
    pub fn default_api() -> Self {
        Self {
            requests_per_minute: 60,
            requests_per_hour: 1000,
            requests_per_day: 10000,
            burst_size: 10,
            window: Duration::from_secs(60),
            key_prefix: "rate_limit".to_string(),
            algorithm: Algorithm::SlidingWindow,
            check_timeout: Duration::from_millis(500),
        }
    }

    /// Stricter policy for authentication-sensitive endpoints.
    pub fn auth() -> Self {
        Self {
            requests_per_minute: 10,
            requests_per_hour: 100,
            requests_per_day: 500,
            burst_size: 3,
            key_prefix: "auth_rate_limit".to_string(),
            ..Self::default_api()
        }
    }

    pub fn with_algorithm(mut self, algorithm: Algorithm) -> Self {
        self.algorithm = algorithm;
        self
    }

    pub fn with_check_timeout(mut self, timeout: Duration) -> Self {
        self.check_timeout = timeout;
        self
    }

    /// Store key for an identifier's state, e.g. `rate_limit:ip:1.2.3.4:sliding`.
    pub fn storage_key(&self, identifier: &str, kind: &str) -> String {
        format!("{}:{}:{}", self.key_prefix, identifier, kind)
    }

    pub fn window_ms(&self) -> i64 {
        (self.window.as_millis() as i64).max(1)
    }

    /// Time for the token bucket to regain one token.
    pub fn refill_interval_ms(&self) -> i64 {
        (self.window_ms() / i64::from(self.requests_per_minute.max(1))).max(1)
    }

    /// Quota reported in `X-RateLimit-Limit` for the configured algorithm.
    pub fn limit(&self) -> u32 {
        match self.algorithm {
            Algorithm::SlidingWindow => self.requests_per_minute,
            Algorithm::TokenBucket => self.burst_size,
        }
    }
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self::default_api()
    }
}

// == Rate Limit Result ==
/// Outcome of one admission check. Computed per call, never stored.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RateLimitResult {
    pub allowed: bool,
    pub limit: u32,
    pub remaining: u32,
    pub reset_at: DateTime<Utc>,
    /// Zero when allowed
    pub retry_after: Duration,
}

impl RateLimitResult {
    pub(crate) fn new(
        allowed: bool,
        limit: u32,
        remaining: i64,
        reset_at: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> Self {
        let retry_after = if allowed {
            Duration::ZERO
        } else {
            (reset_at - now).to_std().unwrap_or(Duration::ZERO)
        };
        Self {
            allowed,
            limit,
            remaining: remaining.clamp(0, i64::from(u32::MAX)) as u32,
            reset_at,
            retry_after,
        }
    }

    /// Whole seconds a client should wait, rounded up.
    pub fn retry_after_secs(&self) -> u64 {
        let secs = self.retry_after.as_secs();
        if self.retry_after.subsec_nanos() > 0 {
            secs + 1
        } else {
            secs
        }
    }
}
