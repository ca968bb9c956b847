//! Atomic store scripts.
//!
//! A [`StoreScript`] pairs a Lua body, executed server-side by Redis, with a
//! native body written against [`ScriptOps`], executed by the in-memory store
//! while it holds its state lock. Both bodies must implement the same steps;
//! the reply is always a flat list of integers.

use std::fmt;

use crate::error::{StoreError, StoreResult};

/// Synchronous primitives available to a native script body.
pub trait ScriptOps {
    /// Removes sorted-set members with `min <= score <= max`.
    fn zrem_range_by_score(&mut self, key: &str, min: f64, max: f64) -> StoreResult<u64>;

    fn zcard(&mut self, key: &str) -> StoreResult<u64>;

    fn zadd(&mut self, key: &str, score: f64, member: &str) -> StoreResult<()>;

    /// Members by ascending score, inclusive rank range, negative ranks count from the end.
    fn zrange_with_scores(&mut self, key: &str, start: i64, stop: i64)
        -> StoreResult<Vec<(String, f64)>>;

    fn hmget(&mut self, key: &str, fields: &[&str]) -> StoreResult<Vec<Option<String>>>;

    fn hset(&mut self, key: &str, pairs: &[(&str, String)]) -> StoreResult<()>;

    fn pexpire(&mut self, key: &str, ttl_ms: i64) -> StoreResult<bool>;
}

/// Native implementation of a script: `(ops, keys, args) -> reply`.
pub type NativeScript = fn(&mut dyn ScriptOps, &[String], &[i64]) -> StoreResult<Vec<i64>>;

/// A named atomic operation with a Lua and a native body.
pub struct StoreScript {
    name: &'static str,
    lua: &'static str,
    native: NativeScript,
}

impl StoreScript {
    pub const fn new(name: &'static str, lua: &'static str, native: NativeScript) -> Self {
        Self { name, lua, native }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn lua(&self) -> &'static str {
        self.lua
    }

    pub fn run_native(
        &self,
        ops: &mut dyn ScriptOps,
        keys: &[String],
        args: &[i64],
    ) -> StoreResult<Vec<i64>> {
        (self.native)(ops, keys, args)
    }
}

impl fmt::Debug for StoreScript {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StoreScript").field("name", &self.name).finish()
    }
}

/// Fetches `keys[index]` or fails the script call.
pub fn key_at<'a>(keys: &'a [String], index: usize) -> StoreResult<&'a str> {
    keys.get(index)
        .map(String::as_str)
        .ok_or_else(|| StoreError::Command(format!("script expects key #{}", index + 1)))
}

/// Fetches `args[index]` or fails the script call.
pub fn arg_at(args: &[i64], index: usize) -> StoreResult<i64> {
    args.get(index)
        .copied()
        .ok_or_else(|| StoreError::Command(format!("script expects argument #{}", index + 1)))
}
