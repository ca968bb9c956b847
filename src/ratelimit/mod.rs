//! Rate Limiter Module
//!
//! Distributed admission control. Quota state lives in the shared store so
//! every replica pointed at the same store enforces one quota per client.
//!
//! Store failures never reject traffic: a check that errors or exceeds its
//! deadline is logged and answered with an admit.

mod config;
mod identifier;
mod scripts;


use std::sync::Arc;

use chrono::{DateTime, Utc};
use tracing::{debug, warn};

use crate::clock::Clock;
use crate::error::{StoreError, StoreResult};
use crate::store::KeyValueStore;

pub use config::{Algorithm, RateLimitConfig, RateLimitResult};
pub use identifier::{client_identifier, client_ip, AuthenticatedUser};
pub use scripts::{SLIDING_WINDOW, TOKEN_BUCKET};

// == Rate Limiter ==
#[derive(Clone)]
pub struct RateLimiter {
    store: Arc<dyn KeyValueStore>,
    clock: Arc<dyn Clock>,
}

impl RateLimiter {
    pub fn new(store: Arc<dyn KeyValueStore>, clock: Arc<dyn Clock>) -> Self {
        Self { store, clock }
    }

    /// Decides whether `identifier` may proceed under `config`.
    ///
    /// Never fails: store errors and timeouts produce an admit.
    pub async fn check_rate_limit(&self, identifier: &str, config: &RateLimitConfig) -> RateLimitResult {
        let check = async {
            match config.algorithm {
                Algorithm::SlidingWindow => self.sliding_window_check(identifier, config).await,
                Algorithm::TokenBucket => self.token_bucket_check(identifier, config).await,
            }
        };

        match tokio::time::timeout(config.check_timeout, check).await {
            Ok(Ok(result)) => {
                debug!(
                    identifier,
                    allowed = result.allowed,
                    remaining = result.remaining,
                    "rate limit checked"
                );
                result
            }
            Ok(Err(err)) => {
                warn!(identifier, error = %err, "rate limit check failed, admitting request");
                self.fail_open(config)
            }
            Err(_) => {
                warn!(
                    identifier,
                    timeout_ms = config.check_timeout.as_millis() as u64,
                    "rate limit check timed out, admitting request"
                );
                self.fail_open(config)
            }
        }
    }

    /// At most `requests_per_minute` admissions in any trailing `window`.
    pub async fn sliding_window_check(
        &self,
        identifier: &str,
        config: &RateLimitConfig,
    ) -> StoreResult<RateLimitResult> {
        let now = self.clock.now();
        let key = config.storage_key(identifier, "sliding");
        let limit = config.requests_per_minute;
        // Distinguishes same-millisecond admissions in the log
        let nonce = i64::from(rand::random::<u32>());

        let reply = self
            .store
            .eval(
                &SLIDING_WINDOW,
                &[key],
                &[config.window_ms(), i64::from(limit), now.timestamp_millis(), nonce],
            )
            .await?;
        decide(&reply, limit, now)
    }

    /// Bucket of `burst_size` tokens regaining one token per refill interval.
    pub async fn token_bucket_check(
        &self,
        identifier: &str,
        config: &RateLimitConfig,
    ) -> StoreResult<RateLimitResult> {
        let now = self.clock.now();
        let key = config.storage_key(identifier, "bucket");
        let capacity = config.burst_size;

        let reply = self
            .store
            .eval(
                &TOKEN_BUCKET,
                &[key],
                &[
                    i64::from(capacity),
                    1,
                    config.refill_interval_ms(),
                    now.timestamp_millis(),
                ],
            )
            .await?;
        decide(&reply, capacity, now)
    }

    fn fail_open(&self, config: &RateLimitConfig) -> RateLimitResult {
        let now = self.clock.now();
        let reset_in = match config.algorithm {
            Algorithm::SlidingWindow => config.window_ms(),
            Algorithm::TokenBucket => config.refill_interval_ms(),
        };
        let limit = config.limit();
        RateLimitResult::new(
            true,
            limit,
            i64::from(limit) - 1,
            now + chrono::Duration::milliseconds(reset_in),
            now,
        )
    }
}

/// Turns a `[allowed, remaining, reset_at_ms]` script reply into a result.
fn decide(reply: &[i64], limit: u32, now: DateTime<Utc>) -> StoreResult<RateLimitResult> {
    let [allowed, remaining, reset_ms] = reply else {
        return Err(StoreError::UnexpectedReply(format!(
            "expected 3 integers from rate limit script, got {:?}",
            reply
        )));
    };
    let reset_at = DateTime::from_timestamp_millis(*reset_ms).ok_or_else(|| {
        StoreError::UnexpectedReply(format!("reset time out of range: {}", reset_ms))
    })?;

    Ok(RateLimitResult::new(*allowed == 1, limit, *remaining, reset_at, now))
}
