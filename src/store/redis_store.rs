//! Redis Store Module
//!
//! Shared-store backend over a multiplexed Redis connection. Every
//! round-trip is bounded by the configured operation timeout.

use std::collections::HashMap;
use std::future::Future;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use redis::aio::ConnectionManager;
use redis::{Client, Cmd, FromRedisValue, Pipeline, RedisResult, Script};
use tracing::{debug, info};

use crate::error::{StoreError, StoreResult};
use crate::store::{ttl_millis, KeyValueStore, StoreScript, WriteOp};

/// `SET key value PX ttl`, then `HINCRBY counter field 1` if the key was new.
const SET_COUNTED_LUA: &str = r#"
local created = redis.call('EXISTS', KEYS[1]) == 0
redis.call('SET', KEYS[1], ARGV[1], 'PX', ARGV[2])
if created then
    redis.call('HINCRBY', KEYS[2], ARGV[3], 1)
end
return created and 1 or 0
"#;

/// `PEXPIRE key ttl` unless the key already lives longer.
/// PTTL is -1 without expiry and -2 when absent, both below any TTL.
const EXTEND_TTL_LUA: &str = r#"
if redis.call('PTTL', KEYS[1]) < tonumber(ARGV[1]) then
    return redis.call('PEXPIRE', KEYS[1], ARGV[1])
end
return 0
"#;

// == Redis Store ==
pub struct RedisStore {
    conn: ConnectionManager,
    op_timeout: Duration,
    /// Compiled scripts by name, so the SHA1 is computed once
    scripts: Mutex<HashMap<&'static str, Script>>,
}

impl RedisStore {
    /// Connects to `url` (e.g. `redis://localhost:6379/1`).
    pub async fn connect(url: &str, op_timeout: Duration) -> StoreResult<Self> {
        let client = Client::open(url)?;
        let conn = match tokio::time::timeout(op_timeout, ConnectionManager::new(client)).await {
            Ok(conn) => conn?,
            Err(_) => return Err(StoreError::Timeout(op_timeout.as_millis() as u64)),
        };
        info!(url = %redact(url), "connected to redis");

        Ok(Self {
            conn,
            op_timeout,
            scripts: Mutex::new(HashMap::new()),
        })
    }

    /// Runs a store future under the operation deadline.
    async fn run<T>(&self, fut: impl Future<Output = RedisResult<T>>) -> StoreResult<T> {
        match tokio::time::timeout(self.op_timeout, fut).await {
            Ok(result) => result.map_err(StoreError::from),
            Err(_) => Err(StoreError::Timeout(self.op_timeout.as_millis() as u64)),
        }
    }

    async fn query<T: FromRedisValue>(&self, cmd: Cmd) -> StoreResult<T> {
        let mut conn = self.conn.clone();
        self.run(async move { cmd.query_async(&mut conn).await })
            .await
    }

    async fn query_pipeline<T: FromRedisValue>(&self, pipe: Pipeline) -> StoreResult<T> {
        let mut conn = self.conn.clone();
        self.run(async move { pipe.query_async(&mut conn).await })
            .await
    }

    fn compiled(&self, script: &StoreScript) -> Script {
        self.scripts
            .lock()
            .entry(script.name())
            .or_insert_with(|| Script::new(script.lua()))
            .clone()
    }
}

#[async_trait]
impl KeyValueStore for RedisStore {
    async fn ping(&self) -> StoreResult<()> {
        let _: String = self.query(redis::cmd("PING")).await?;
        Ok(())
    }

    async fn get(&self, key: &str) -> StoreResult<Option<String>> {
        let mut cmd = redis::cmd("GET");
        cmd.arg(key);
        self.query(cmd).await
    }

    async fn set(&self, key: &str, value: &str, ttl: Option<Duration>) -> StoreResult<()> {
        let mut cmd = redis::cmd("SET");
        cmd.arg(key).arg(value);
        if let Some(ttl) = ttl {
            cmd.arg("PX").arg(ttl_millis(ttl));
        }
        let _: () = self.query(cmd).await?;
        Ok(())
    }

    async fn delete(&self, keys: &[String]) -> StoreResult<u64> {
        if keys.is_empty() {
            return Ok(0);
        }
        let mut cmd = redis::cmd("DEL");
        for key in keys {
            cmd.arg(key);
        }
        self.query(cmd).await
    }

    async fn exists(&self, key: &str) -> StoreResult<bool> {
        let mut cmd = redis::cmd("EXISTS");
        cmd.arg(key);
        self.query(cmd).await
    }

    async fn incr_by(&self, key: &str, delta: i64) -> StoreResult<i64> {
        let mut cmd = redis::cmd("INCRBY");
        cmd.arg(key).arg(delta);
        self.query(cmd).await
    }

    async fn hget_all(&self, key: &str) -> StoreResult<HashMap<String, String>> {
        let mut cmd = redis::cmd("HGETALL");
        cmd.arg(key);
        self.query(cmd).await
    }

    async fn zrange_by_score(&self, key: &str, min: f64, max: f64) -> StoreResult<Vec<String>> {
        let mut cmd = redis::cmd("ZRANGEBYSCORE");
        cmd.arg(key).arg(score_arg(min)).arg(score_arg(max));
        self.query(cmd).await
    }

    async fn keys(&self, pattern: &str) -> StoreResult<Vec<String>> {
        let mut cmd = redis::cmd("KEYS");
        cmd.arg(pattern);
        self.query(cmd).await
    }

    async fn apply(&self, ops: &[WriteOp]) -> StoreResult<()> {
        if ops.is_empty() {
            return Ok(());
        }
        let mut pipe = redis::pipe();
        pipe.atomic();
        for op in ops {
            match op {
                WriteOp::Set { key, value, ttl } => {
                    pipe.cmd("SET").arg(key).arg(value);
                    if let Some(ttl) = ttl {
                        pipe.arg("PX").arg(ttl_millis(*ttl));
                    }
                }
                WriteOp::Delete { key } => {
                    pipe.cmd("DEL").arg(key);
                }
                WriteOp::IncrBy { key, delta } => {
                    pipe.cmd("INCRBY").arg(key).arg(*delta);
                }
                WriteOp::HIncrBy { key, field, delta } => {
                    pipe.cmd("HINCRBY").arg(key).arg(field).arg(*delta);
                }
                WriteOp::SetCounted {
                    key,
                    value,
                    ttl,
                    counter,
                    field,
                } => {
                    pipe.cmd("EVAL")
                        .arg(SET_COUNTED_LUA)
                        .arg(2)
                        .arg(key)
                        .arg(counter)
                        .arg(value)
                        .arg(ttl_millis(*ttl))
                        .arg(field);
                }
                WriteOp::ZAdd { key, score, member } => {
                    pipe.cmd("ZADD").arg(key).arg(score_arg(*score)).arg(member);
                }
                WriteOp::ZRemRangeByScore { key, max } => {
                    pipe.cmd("ZREMRANGEBYSCORE").arg(key).arg("-inf").arg(score_arg(*max));
                }
                WriteOp::ExtendTtl { key, ttl } => {
                    pipe.cmd("EVAL")
                        .arg(EXTEND_TTL_LUA)
                        .arg(1)
                        .arg(key)
                        .arg(ttl_millis(*ttl));
                }
            }
            pipe.ignore();
        }
        let _: () = self.query_pipeline(pipe).await?;
        Ok(())
    }

    async fn eval(
        &self,
        script: &StoreScript,
        keys: &[String],
        args: &[i64],
    ) -> StoreResult<Vec<i64>> {
        debug!(script = script.name(), keys = ?keys, "evaluating store script");
        let compiled = self.compiled(script);
        let mut conn = self.conn.clone();
        self.run(async move {
            let mut invocation = compiled.prepare_invoke();
            for key in keys {
                invocation.key(key);
            }
            for arg in args {
                invocation.arg(*arg);
            }
            invocation.invoke_async(&mut conn).await
        })
        .await
    }

    async fn memory_usage(&self) -> StoreResult<String> {
        let mut cmd = redis::cmd("INFO");
        cmd.arg("memory");
        let info: String = self.query(cmd).await?;
        Ok(parse_used_memory_human(&info).unwrap_or_else(|| "Unknown".to_string()))
    }
}

/// Sorted-set score bound in the form Redis parses, infinities included.
fn score_arg(score: f64) -> String {
    if score == f64::INFINITY {
        "+inf".to_string()
    } else if score == f64::NEG_INFINITY {
        "-inf".to_string()
    } else {
        score.to_string()
    }
}

/// Extracts `used_memory_human` from an `INFO memory` reply.
fn parse_used_memory_human(info: &str) -> Option<String> {
    info.lines()
        .find_map(|line| line.trim_end().strip_prefix("used_memory_human:"))
        .map(str::to_string)
}

/// Hides the password part of a redis URL for logging.
fn redact(url: &str) -> String {
    match (url.find("://"), url.rfind('@')) {
        (Some(scheme_end), Some(at)) if at > scheme_end => {
            format!("{}://***{}", &url[..scheme_end], &url[at..])
        }
        _ => url.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_used_memory_human() {
        let info = "# Memory\r\nused_memory:1080000\r\nused_memory_human:1.03M\r\nused_memory_rss:9000\r\n";
        assert_eq!(parse_used_memory_human(info), Some("1.03M".to_string()));
        assert_eq!(parse_used_memory_human("# Memory\r\n"), None);
    }

    #[test]
    fn test_score_arg() {
        assert_eq!(score_arg(f64::NEG_INFINITY), "-inf");
        assert_eq!(score_arg(f64::INFINITY), "+inf");
        assert_eq!(score_arg(1_700_000_000_000.0), "1700000000000");
    }

    #[test]
    fn test_redact_password() {
        assert_eq!(
            redact("redis://:secret@localhost:6379/1"),
            "redis://***@localhost:6379/1"
        );
        assert_eq!(redact("redis://localhost:6379"), "redis://localhost:6379");
    }
}
