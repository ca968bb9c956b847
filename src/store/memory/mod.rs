//! In-memory Store Module
//!
//! Single-process implementation of the shared store. Keys carry optional
//! expiry (checked on access and swept by a background task) and the total
//! key count is bounded with LRU eviction. Scripts run while the state lock
//! is held, which makes them atomic with respect to every other call.

mod entry;
mod lru;

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use regex::Regex;
use tracing::debug;

use crate::clock::Clock;
use crate::error::{StoreError, StoreResult};
use crate::store::{human_bytes, ttl_millis, KeyValueStore, ScriptOps, StoreScript, WriteOp};

use entry::{StoredEntry, StoredValue};
use lru::LruTracker;

// == Memory Store ==
pub struct MemoryStore {
    state: Mutex<MemoryState>,
    /// Cleared to simulate an unreachable store
    online: AtomicBool,
}

impl MemoryStore {
    /// Creates a store holding at most `max_keys` keys.
    pub fn new(max_keys: usize, clock: Arc<dyn Clock>) -> Self {
        Self {
            state: Mutex::new(MemoryState {
                entries: HashMap::new(),
                lru: LruTracker::new(),
                max_keys: max_keys.max(1),
                evictions: 0,
                clock,
            }),
            online: AtomicBool::new(true),
        }
    }

    /// Toggles reachability. While offline every call fails with
    /// [`StoreError::Unavailable`].
    pub fn set_online(&self, online: bool) {
        self.online.store(online, Ordering::SeqCst);
    }

    /// Removes every expired key and returns how many were dropped.
    pub fn cleanup_expired(&self) -> usize {
        let mut state = self.state.lock();
        let now = state.clock.now();
        let expired: Vec<String> = state
            .entries
            .iter()
            .filter(|(_, entry)| entry.is_expired(now))
            .map(|(key, _)| key.clone())
            .collect();

        for key in &expired {
            state.remove(key);
        }
        expired.len()
    }

    /// Number of keys currently held, including expired ones not yet swept.
    pub fn len(&self) -> usize {
        self.state.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Number of keys dropped to stay under the key bound.
    pub fn evictions(&self) -> u64 {
        self.state.lock().evictions
    }

    /// Returns true if the key exists and has not expired, without touching recency.
    pub fn contains_raw(&self, key: &str) -> bool {
        let state = self.state.lock();
        let now = state.clock.now();
        state
            .entries
            .get(key)
            .is_some_and(|entry| !entry.is_expired(now))
    }

    fn ensure_online(&self) -> StoreResult<()> {
        if self.online.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(StoreError::Unavailable("memory store is offline".to_string()))
        }
    }
}

// == Memory State ==
struct MemoryState {
    entries: HashMap<String, StoredEntry>,
    lru: LruTracker,
    max_keys: usize,
    evictions: u64,
    clock: Arc<dyn Clock>,
}

impl MemoryState {
    /// Live entry for `key`, dropping it first if it has expired.
    fn live(&mut self, key: &str) -> Option<&mut StoredEntry> {
        let now = self.clock.now();
        if self.entries.get(key).is_some_and(|e| e.is_expired(now)) {
            self.remove(key);
            return None;
        }
        if self.entries.contains_key(key) {
            self.lru.touch(key);
        }
        self.entries.get_mut(key)
    }

    /// Live entry for `key`, created from `init` when absent.
    fn live_or_insert(
        &mut self,
        key: &str,
        init: impl FnOnce() -> StoredValue,
    ) -> &mut StoredEntry {
        if self.live(key).is_none() {
            self.insert(key, StoredEntry::new(init()));
        }
        self.lru.touch(key);
        self.entries
            .entry(key.to_string())
            .or_insert_with(|| StoredEntry::new(StoredValue::Str(String::new())))
    }

    fn insert(&mut self, key: &str, entry: StoredEntry) {
        if !self.entries.contains_key(key) && self.entries.len() >= self.max_keys {
            if let Some(evicted) = self.lru.evict_oldest() {
                debug!(key = %evicted, "memory store evicted least recently used key");
                self.entries.remove(&evicted);
                self.evictions += 1;
            }
        }
        self.entries.insert(key.to_string(), entry);
        self.lru.touch(key);
    }

    fn remove(&mut self, key: &str) -> bool {
        self.lru.remove(key);
        self.entries.remove(key).is_some()
    }

    fn set_string(&mut self, key: &str, value: &str, ttl: Option<Duration>) {
        let now = self.clock.now();
        let mut entry = StoredEntry::new(StoredValue::Str(value.to_string()));
        if let Some(ttl) = ttl {
            entry.expire_in_ms(now, ttl_millis(ttl) as i64);
        }
        self.insert(key, entry);
    }

    fn incr_by(&mut self, key: &str, delta: i64) -> StoreResult<i64> {
        let entry = self.live_or_insert(key, || StoredValue::Str("0".to_string()));
        let current: i64 = entry.as_str(key)?.parse().map_err(|_| {
            StoreError::Command(format!("value at '{}' is not an integer", key))
        })?;
        let next = current + delta;
        // INCR keeps the existing TTL
        entry.value = StoredValue::Str(next.to_string());
        Ok(next)
    }

    fn hincr_by(&mut self, key: &str, field: &str, delta: i64) -> StoreResult<i64> {
        let entry = self.live_or_insert(key, || StoredValue::Hash(HashMap::new()));
        let map = entry.as_hash_mut(key)?;
        let current: i64 = match map.get(field) {
            Some(raw) => raw.parse().map_err(|_| {
                StoreError::Command(format!("hash field '{}' is not an integer", field))
            })?,
            None => 0,
        };
        let next = current + delta;
        map.insert(field.to_string(), next.to_string());
        Ok(next)
    }

    fn set_counted(
        &mut self,
        key: &str,
        value: &str,
        ttl: Duration,
        counter: &str,
        field: &str,
    ) -> StoreResult<()> {
        let created = self.live(key).is_none();
        self.set_string(key, value, Some(ttl));
        if created {
            self.hincr_by(counter, field, 1)?;
        }
        Ok(())
    }

    fn extend_ttl(&mut self, key: &str, ttl: Duration) {
        let now = self.clock.now();
        let wanted = now + chrono::Duration::milliseconds(ttl_millis(ttl) as i64);
        if let Some(entry) = self.live(key) {
            if entry.expires_at.map_or(true, |current| current < wanted) {
                entry.expires_at = Some(wanted);
            }
        }
    }

    /// Checks a write batch for type conflicts before anything is applied.
    fn validate(&mut self, op: &WriteOp) -> StoreResult<()> {
        let (key, wanted) = match op {
            WriteOp::Set { .. } | WriteOp::Delete { .. } | WriteOp::ExtendTtl { .. } => {
                return Ok(())
            }
            WriteOp::IncrBy { key, .. } => (key, "string"),
            WriteOp::HIncrBy { key, .. } => (key, "hash"),
            WriteOp::SetCounted { counter, .. } => (counter, "hash"),
            WriteOp::ZAdd { key, .. } | WriteOp::ZRemRangeByScore { key, .. } => (key, "zset"),
        };
        match self.live(key) {
            Some(existing) if existing.value.type_name() != wanted => {
                Err(entry::wrong_type(key, &existing.value, wanted))
            }
            _ => Ok(()),
        }
    }

    fn apply(&mut self, op: &WriteOp) -> StoreResult<()> {
        match op {
            WriteOp::Set { key, value, ttl } => self.set_string(key, value, *ttl),
            WriteOp::Delete { key } => {
                self.remove(key);
            }
            WriteOp::IncrBy { key, delta } => {
                self.incr_by(key, *delta)?;
            }
            WriteOp::HIncrBy { key, field, delta } => {
                self.hincr_by(key, field, *delta)?;
            }
            WriteOp::SetCounted {
                key,
                value,
                ttl,
                counter,
                field,
            } => self.set_counted(key, value, *ttl, counter, field)?,
            WriteOp::ZAdd { key, score, member } => self.zadd(key, *score, member)?,
            WriteOp::ZRemRangeByScore { key, max } => {
                self.zrem_range_by_score(key, f64::NEG_INFINITY, *max)?;
            }
            WriteOp::ExtendTtl { key, ttl } => self.extend_ttl(key, *ttl),
        }
        Ok(())
    }

    fn approx_bytes(&self) -> u64 {
        self.entries
            .iter()
            .map(|(key, entry)| (key.len() + entry.value.approx_size()) as u64)
            .sum()
    }
}

// == Script Primitives ==
impl ScriptOps for MemoryState {
    fn zrem_range_by_score(&mut self, key: &str, min: f64, max: f64) -> StoreResult<u64> {
        let Some(entry) = self.live(key) else {
            return Ok(0);
        };
        let items = entry.as_zset_mut(key)?;
        let before = items.len();
        items.retain(|(score, _)| *score < min || *score > max);
        let removed = (before - items.len()) as u64;
        if items.is_empty() {
            self.remove(key);
        }
        Ok(removed)
    }

    fn zcard(&mut self, key: &str) -> StoreResult<u64> {
        match self.live(key) {
            Some(entry) => Ok(entry.as_zset_mut(key)?.len() as u64),
            None => Ok(0),
        }
    }

    fn zadd(&mut self, key: &str, score: f64, member: &str) -> StoreResult<()> {
        let entry = self.live_or_insert(key, || StoredValue::SortedSet(Vec::new()));
        let items = entry.as_zset_mut(key)?;
        items.retain(|(_, existing)| existing != member);
        items.push((score, member.to_string()));
        items.sort_by(|a, b| a.0.total_cmp(&b.0).then_with(|| a.1.cmp(&b.1)));
        Ok(())
    }

    fn zrange_with_scores(
        &mut self,
        key: &str,
        start: i64,
        stop: i64,
    ) -> StoreResult<Vec<(String, f64)>> {
        let Some(entry) = self.live(key) else {
            return Ok(Vec::new());
        };
        let items = entry.as_zset_mut(key)?;
        let len = items.len() as i64;
        let resolve = |index: i64| if index < 0 { len + index } else { index };
        let (from, to) = (resolve(start).max(0), resolve(stop).min(len - 1));
        if from > to {
            return Ok(Vec::new());
        }
        Ok(items[from as usize..=to as usize]
            .iter()
            .map(|(score, member)| (member.clone(), *score))
            .collect())
    }

    fn hmget(&mut self, key: &str, fields: &[&str]) -> StoreResult<Vec<Option<String>>> {
        let Some(entry) = self.live(key) else {
            return Ok(vec![None; fields.len()]);
        };
        let map = entry.as_hash_mut(key)?;
        Ok(fields.iter().map(|field| map.get(*field).cloned()).collect())
    }

    fn hset(&mut self, key: &str, pairs: &[(&str, String)]) -> StoreResult<()> {
        let entry = self.live_or_insert(key, || StoredValue::Hash(HashMap::new()));
        let map = entry.as_hash_mut(key)?;
        for (field, value) in pairs {
            map.insert((*field).to_string(), value.clone());
        }
        Ok(())
    }

    fn pexpire(&mut self, key: &str, ttl_ms: i64) -> StoreResult<bool> {
        let now = self.clock.now();
        match self.live(key) {
            Some(entry) => {
                entry.expire_in_ms(now, ttl_ms);
                Ok(true)
            }
            None => Ok(false),
        }
    }
}

// == KeyValueStore Implementation ==
#[async_trait]
impl KeyValueStore for MemoryStore {
    async fn ping(&self) -> StoreResult<()> {
        self.ensure_online()
    }

    async fn get(&self, key: &str) -> StoreResult<Option<String>> {
        self.ensure_online()?;
        let mut state = self.state.lock();
        match state.live(key) {
            Some(entry) => Ok(Some(entry.as_str(key)?.to_string())),
            None => Ok(None),
        }
    }

    async fn set(&self, key: &str, value: &str, ttl: Option<Duration>) -> StoreResult<()> {
        self.ensure_online()?;
        self.state.lock().set_string(key, value, ttl);
        Ok(())
    }

    async fn delete(&self, keys: &[String]) -> StoreResult<u64> {
        self.ensure_online()?;
        let mut state = self.state.lock();
        let mut removed = 0;
        for key in keys {
            if state.live(key).is_some() && state.remove(key) {
                removed += 1;
            }
        }
        Ok(removed)
    }

    async fn exists(&self, key: &str) -> StoreResult<bool> {
        self.ensure_online()?;
        Ok(self.state.lock().live(key).is_some())
    }

    async fn incr_by(&self, key: &str, delta: i64) -> StoreResult<i64> {
        self.ensure_online()?;
        self.state.lock().incr_by(key, delta)
    }

    async fn hget_all(&self, key: &str) -> StoreResult<HashMap<String, String>> {
        self.ensure_online()?;
        let mut state = self.state.lock();
        match state.live(key) {
            Some(entry) => Ok(entry.as_hash_mut(key)?.clone()),
            None => Ok(HashMap::new()),
        }
    }

    async fn zrange_by_score(&self, key: &str, min: f64, max: f64) -> StoreResult<Vec<String>> {
        self.ensure_online()?;
        let mut state = self.state.lock();
        match state.live(key) {
            Some(entry) => Ok(entry
                .as_zset_mut(key)?
                .iter()
                .filter(|(score, _)| *score >= min && *score <= max)
                .map(|(_, member)| member.clone())
                .collect()),
            None => Ok(Vec::new()),
        }
    }

    async fn keys(&self, pattern: &str) -> StoreResult<Vec<String>> {
        self.ensure_online()?;
        let matcher = glob_to_regex(pattern)?;
        let state = self.state.lock();
        let now = state.clock.now();
        let mut keys: Vec<String> = state
            .entries
            .iter()
            .filter(|(key, entry)| !entry.is_expired(now) && matcher.is_match(key))
            .map(|(key, _)| key.clone())
            .collect();
        keys.sort();
        Ok(keys)
    }

    async fn apply(&self, ops: &[WriteOp]) -> StoreResult<()> {
        self.ensure_online()?;
        let mut state = self.state.lock();
        for op in ops {
            state.validate(op)?;
        }
        for op in ops {
            state.apply(op)?;
        }
        Ok(())
    }

    async fn eval(
        &self,
        script: &StoreScript,
        keys: &[String],
        args: &[i64],
    ) -> StoreResult<Vec<i64>> {
        self.ensure_online()?;
        let mut state = self.state.lock();
        script.run_native(&mut *state, keys, args)
    }

    async fn memory_usage(&self) -> StoreResult<String> {
        self.ensure_online()?;
        Ok(human_bytes(self.state.lock().approx_bytes()))
    }
}

/// Translates a Redis-style glob (`*`, `?`, `[...]`, `\` escapes) into an anchored regex.
fn glob_to_regex(pattern: &str) -> StoreResult<Regex> {
    let mut out = String::with_capacity(pattern.len() + 8);
    out.push('^');
    let mut chars = pattern.chars().peekable();
    while let Some(c) = chars.next() {
        match c {
            '*' => out.push_str(".*"),
            '?' => out.push('.'),
            '[' => {
                out.push('[');
                if chars.peek() == Some(&'^') || chars.peek() == Some(&'!') {
                    chars.next();
                    out.push('^');
                }
                for inner in chars.by_ref() {
                    if inner == ']' {
                        break;
                    }
                    if inner == '\\' || inner == '[' {
                        out.push('\\');
                    }
                    out.push(inner);
                }
                out.push(']');
            }
            '\\' => {
                if let Some(escaped) = chars.next() {
                    out.push_str(&regex::escape(&escaped.to_string()));
                }
            }
            other => out.push_str(&regex::escape(&other.to_string())),
        }
    }
    out.push('$');
    Regex::new(&out).map_err(|e| StoreError::Command(format!("invalid pattern '{}': {}", pattern, e)))
}
