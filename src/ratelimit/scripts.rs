//! Atomic admission scripts.
//!
//! Each check is one read-modify-write against the store, so concurrent
//! replicas sharing a Redis never double-admit. Replies are
//! `[allowed, remaining, reset_at_ms]`.

use crate::error::StoreResult;
use crate::store::{arg_at, key_at, ScriptOps, StoreScript};

// == Sliding Window ==
/// KEYS: `[log]`; ARGV: `[window_ms, limit, now_ms, nonce]`.
pub static SLIDING_WINDOW: StoreScript =
    StoreScript::new("sliding_window", SLIDING_WINDOW_LUA, sliding_window);

const SLIDING_WINDOW_LUA: &str = r#"
local key = KEYS[1]
local window = tonumber(ARGV[1])
local limit = tonumber(ARGV[2])
local now = tonumber(ARGV[3])

redis.call('ZREMRANGEBYSCORE', key, '-inf', now - window)
local current = redis.call('ZCARD', key)

if current < limit then
    redis.call('ZADD', key, now, ARGV[3] .. ':' .. ARGV[4])
    redis.call('PEXPIRE', key, window)
    return {1, limit - current - 1, now + window}
end

local oldest = redis.call('ZRANGE', key, 0, 0, 'WITHSCORES')
local reset_at = now + window
if #oldest > 0 then
    reset_at = tonumber(oldest[2]) + window
end
return {0, 0, reset_at}
"#;

fn sliding_window(ops: &mut dyn ScriptOps, keys: &[String], args: &[i64]) -> StoreResult<Vec<i64>> {
    let key = key_at(keys, 0)?;
    let window = arg_at(args, 0)?;
    let limit = arg_at(args, 1)?;
    let now = arg_at(args, 2)?;
    let nonce = arg_at(args, 3)?;

    ops.zrem_range_by_score(key, f64::NEG_INFINITY, (now - window) as f64)?;
    let current = ops.zcard(key)? as i64;

    if current < limit {
        ops.zadd(key, now as f64, &format!("{}:{}", now, nonce))?;
        ops.pexpire(key, window)?;
        return Ok(vec![1, limit - current - 1, now + window]);
    }

    let reset_at = ops
        .zrange_with_scores(key, 0, 0)?
        .first()
        .map(|(_, score)| *score as i64 + window)
        .unwrap_or(now + window);
    Ok(vec![0, 0, reset_at])
}

// == Token Bucket ==
/// KEYS: `[bucket]`; ARGV: `[capacity, refill, interval_ms, now_ms]`.
///
/// `last_refill` only advances by whole intervals so partial progress toward
/// the next token survives between calls. A full bucket restarts the clock.
pub static TOKEN_BUCKET: StoreScript =
    StoreScript::new("token_bucket", TOKEN_BUCKET_LUA, token_bucket);

const TOKEN_BUCKET_LUA: &str = r#"
local key = KEYS[1]
local capacity = tonumber(ARGV[1])
local refill = tonumber(ARGV[2])
local interval = math.max(1, tonumber(ARGV[3]))
local now = tonumber(ARGV[4])

local bucket = redis.call('HMGET', key, 'tokens', 'last_refill')
local tokens = tonumber(bucket[1]) or capacity
local last_refill = tonumber(bucket[2]) or now

local elapsed = math.max(0, now - last_refill)
local intervals = math.floor(elapsed / interval)
tokens = math.max(0, math.min(capacity, tokens + intervals * refill))
if tokens >= capacity then
    last_refill = now
else
    last_refill = last_refill + intervals * interval
end

local allowed = 0
if tokens >= 1 then
    tokens = tokens - 1
    allowed = 1
end

redis.call('HSET', key, 'tokens', tokens, 'last_refill', last_refill)
redis.call('PEXPIRE', key, interval * math.max(1, capacity))
return {allowed, math.floor(tokens), last_refill + interval}
"#;

fn token_bucket(ops: &mut dyn ScriptOps, keys: &[String], args: &[i64]) -> StoreResult<Vec<i64>> {
    let key = key_at(keys, 0)?;
    let capacity = arg_at(args, 0)?;
    let refill = arg_at(args, 1)?;
    let interval = arg_at(args, 2)?.max(1);
    let now = arg_at(args, 3)?;

    let state = ops.hmget(key, &["tokens", "last_refill"])?;
    let stored = |index: usize| -> Option<f64> {
        state
            .get(index)
            .and_then(|value| value.as_deref())
            .and_then(|value| value.parse::<f64>().ok())
    };
    let capacity_f = capacity as f64;
    let tokens = stored(0).unwrap_or(capacity_f);
    let last_refill = stored(1).map(|ms| ms as i64).unwrap_or(now);

    let intervals = (now - last_refill).max(0) / interval;
    let mut tokens = (tokens + (intervals * refill) as f64).min(capacity_f).max(0.0);
    let last_refill = if tokens >= capacity_f {
        now
    } else {
        last_refill + intervals * interval
    };

    let allowed = if tokens >= 1.0 {
        tokens -= 1.0;
        1
    } else {
        0
    };

    ops.hset(
        key,
        &[
            ("tokens", tokens.to_string()),
            ("last_refill", last_refill.to_string()),
        ],
    )?;
    ops.pexpire(key, interval * capacity.max(1))?;
    Ok(vec![allowed, tokens.floor() as i64, last_refill + interval])
}
