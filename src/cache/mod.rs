//! Cache Module
//!
//! Typed, TTL-bound caching over the shared store, with per-domain
//! namespaces, tag-based invalidation and store-resident statistics.
//!
//! Read failures are treated as misses so an unreachable store degrades to
//! the uncached path instead of failing requests.

mod aside;
mod config;
mod domains;
mod entry;
mod keys;
mod stats;


use std::collections::BTreeMap;
use std::sync::Arc;

use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::{debug, warn};

use crate::clock::Clock;
use crate::error::CacheError;
use crate::store::{KeyValueStore, WriteOp};

pub use aside::CacheAside;
pub use config::CacheConfig;
pub use entry::{CacheEntry, ENTRY_VERSION};
pub use keys::{api_response_key, query_key, session_key, short_digest, user_key};
pub use stats::{hit_rate, CacheStats};

use stats::{parse_counter, total_size, HITS_KEY, MISSES_KEY, SETS_KEY, SIZE_KEY};

/// Namespace of the tag to keys index sets
const TAG_PREFIX: &str = "tag:";

// == Cache ==
#[derive(Clone)]
pub struct Cache {
    store: Arc<dyn KeyValueStore>,
    clock: Arc<dyn Clock>,
}

impl Cache {
    pub fn new(store: Arc<dyn KeyValueStore>, clock: Arc<dyn Clock>) -> Self {
        Self { store, clock }
    }

    pub fn store(&self) -> &Arc<dyn KeyValueStore> {
        &self.store
    }

    pub fn clock(&self) -> &Arc<dyn Clock> {
        &self.clock
    }

    // == Set ==
    /// Stores `value` under `key` for the domain's TTL.
    pub async fn set<T: Serialize + ?Sized>(
        &self,
        key: &str,
        value: &T,
        config: &CacheConfig,
    ) -> Result<(), CacheError> {
        self.set_tagged(key, value, config, &[]).await
    }

    /// Stores `value` and indexes it under each tag for later invalidation.
    ///
    /// Tag indexes are sorted sets scored by entry expiry. Each write drops
    /// members that have already expired and keeps the index alive at least
    /// as long as its newest member.
    pub async fn set_tagged<T: Serialize + ?Sized>(
        &self,
        key: &str,
        value: &T,
        config: &CacheConfig,
        tags: &[String],
    ) -> Result<(), CacheError> {
        let full_key = config.full_key(key);
        let now = self.clock.now();
        let expires_at = now + chrono::Duration::milliseconds(config.ttl.as_millis() as i64);
        let entry = CacheEntry::new(value, expires_at, tags.to_vec());
        let payload = serde_json::to_string(&entry).map_err(|e| CacheError::Encode {
            key: full_key.clone(),
            reason: e.to_string(),
        })?;

        let mut ops = vec![
            WriteOp::SetCounted {
                key: full_key.clone(),
                value: payload,
                ttl: config.ttl,
                counter: SIZE_KEY.to_string(),
                field: config.key_prefix.clone(),
            },
            WriteOp::IncrBy {
                key: SETS_KEY.to_string(),
                delta: 1,
            },
        ];
        for tag in tags {
            let index = tag_key(tag);
            ops.push(WriteOp::ZRemRangeByScore {
                key: index.clone(),
                max: now.timestamp_millis() as f64,
            });
            ops.push(WriteOp::ZAdd {
                key: index.clone(),
                score: expires_at.timestamp_millis() as f64,
                member: full_key.clone(),
            });
            ops.push(WriteOp::ExtendTtl {
                key: index,
                ttl: config.ttl,
            });
        }
        self.store.apply(&ops).await?;

        debug!(key = %full_key, tags = tags.len(), "cache set");
        self.warn_if_oversized(config).await;
        Ok(())
    }

    // == Get ==
    /// Returns the cached value, or `None` on a miss.
    ///
    /// Entries past `expires_at` are deleted and reported as misses even if
    /// the store still holds them.
    pub async fn get<T: DeserializeOwned>(
        &self,
        key: &str,
        config: &CacheConfig,
    ) -> Result<Option<T>, CacheError> {
        let full_key = config.full_key(key);
        let raw = match self.store.get(&full_key).await {
            Ok(raw) => raw,
            Err(err) => {
                warn!(key = %full_key, error = %err, "cache read failed, treating as miss");
                return Ok(None);
            }
        };

        let Some(raw) = raw else {
            self.record(MISSES_KEY).await;
            return Ok(None);
        };

        // Expiry is checked on the envelope so a stale entry of an older
        // shape still reads as a miss
        let entry: CacheEntry<serde_json::Value> =
            serde_json::from_str(&raw).map_err(|e| decode_error(&full_key, e))?;

        if entry.is_expired(self.clock.now()) {
            debug!(key = %full_key, "cache entry expired on read");
            if let Err(err) = self.remove(&full_key, config).await {
                warn!(key = %full_key, error = %err, "failed to drop expired cache entry");
            }
            self.record(MISSES_KEY).await;
            return Ok(None);
        }

        let data = serde_json::from_value(entry.data).map_err(|e| decode_error(&full_key, e))?;
        self.record(HITS_KEY).await;
        Ok(Some(data))
    }

    // == Delete ==
    /// Removes `key` if present, returning whether it was. Deleting a
    /// missing key is a no-op.
    pub async fn delete(&self, key: &str, config: &CacheConfig) -> Result<bool, CacheError> {
        let full_key = config.full_key(key);
        self.remove(&full_key, config).await
    }

    async fn remove(&self, full_key: &str, config: &CacheConfig) -> Result<bool, CacheError> {
        let removed = self.store.delete(&[full_key.to_string()]).await?;
        if removed > 0 {
            self.store
                .apply(&[WriteOp::HIncrBy {
                    key: SIZE_KEY.to_string(),
                    field: config.key_prefix.clone(),
                    delta: -1,
                }])
                .await?;
        }
        Ok(removed > 0)
    }

    // == Invalidation ==
    /// Deletes every key matching a glob, returning how many were removed.
    ///
    /// Enumerates the whole key space on Redis; keep off hot paths.
    pub async fn invalidate_by_pattern(&self, pattern: &str) -> Result<u64, CacheError> {
        let keys = self.store.keys(pattern).await?;
        if keys.is_empty() {
            return Ok(0);
        }
        let removed = self.store.delete(&keys).await?;
        let adjustments = size_adjustments(keys.iter().map(String::as_str));
        self.store.apply(&adjustments).await?;

        debug!(pattern, removed, "cache invalidated by pattern");
        Ok(removed)
    }

    /// Deletes every entry indexed under `tag` together with the index.
    pub async fn invalidate_by_tag(&self, tag: &str) -> Result<u64, CacheError> {
        let index = tag_key(tag);
        let members = self
            .store
            .zrange_by_score(&index, f64::NEG_INFINITY, f64::INFINITY)
            .await?;

        let mut live = Vec::with_capacity(members.len());
        for member in &members {
            if self.store.exists(member).await? {
                live.push(member.as_str());
            }
        }

        let mut ops: Vec<WriteOp> = members
            .iter()
            .map(|member| WriteOp::Delete { key: member.clone() })
            .collect();
        ops.push(WriteOp::Delete { key: index });
        ops.extend(size_adjustments(live.iter().copied()));
        self.store.apply(&ops).await?;

        debug!(tag, removed = live.len(), "cache invalidated by tag");
        Ok(live.len() as u64)
    }

    // == Stats ==
    pub async fn stats(&self) -> Result<CacheStats, CacheError> {
        let hits = parse_counter(self.store.get(HITS_KEY).await?.as_deref());
        let misses = parse_counter(self.store.get(MISSES_KEY).await?.as_deref());
        let sets = parse_counter(self.store.get(SETS_KEY).await?.as_deref());
        let size = total_size(&self.store.hget_all(SIZE_KEY).await?);
        let memory_usage = match self.store.memory_usage().await {
            Ok(usage) => usage,
            Err(err) => {
                debug!(error = %err, "memory usage unavailable");
                "Unknown".to_string()
            }
        };

        Ok(CacheStats::new(hits, misses, sets, size, memory_usage))
    }

    /// Counter bumps are best effort and never fail a read.
    async fn record(&self, counter: &str) {
        if let Err(err) = self.store.incr_by(counter, 1).await {
            debug!(counter, error = %err, "failed to record cache stat");
        }
    }

    async fn warn_if_oversized(&self, config: &CacheConfig) {
        let Ok(sizes) = self.store.hget_all(SIZE_KEY).await else {
            return;
        };
        let size = parse_counter(sizes.get(&config.key_prefix).map(String::as_str));
        if size > config.max_size {
            warn!(
                domain = %config.key_prefix,
                size,
                max_size = config.max_size,
                "cache domain above its size bound"
            );
        }
    }
}

fn decode_error(key: &str, err: serde_json::Error) -> CacheError {
    CacheError::Decode {
        key: key.to_string(),
        reason: err.to_string(),
    }
}

fn tag_key(tag: &str) -> String {
    format!("{}{}", TAG_PREFIX, tag)
}

/// Size counter decrements for removed keys, grouped by domain prefix.
fn size_adjustments<'a>(keys: impl Iterator<Item = &'a str>) -> Vec<WriteOp> {
    let mut per_domain: BTreeMap<&str, i64> = BTreeMap::new();
    for key in keys {
        if key.starts_with(TAG_PREFIX) || key.starts_with("cache:stats:") {
            continue;
        }
        if let Some((prefix, _)) = key.split_once(':') {
            *per_domain.entry(prefix).or_default() -= 1;
        }
    }
    per_domain
        .into_iter()
        .map(|(prefix, delta)| WriteOp::HIncrBy {
            key: SIZE_KEY.to_string(),
            field: prefix.to_string(),
            delta,
        })
        .collect()
}

// == Unit Tests ==
#[cfg(test)]
mod tests {
    use std::collections::HashMap;
    use std::time::Duration;

    use async_trait::async_trait;
    use serde::Deserialize;

    use super::*;
    use crate::clock::{system_clock, ManualClock};
    use crate::error::StoreResult;
    use crate::store::{MemoryStore, StoreScript};

    /// Yields before every call so concurrent writers interleave.
    struct YieldingStore {
        inner: Arc<MemoryStore>,
    }

    #[async_trait]
    impl KeyValueStore for YieldingStore {
        async fn ping(&self) -> StoreResult<()> {
            tokio::task::yield_now().await;
            self.inner.ping().await
        }

        async fn get(&self, key: &str) -> StoreResult<Option<String>> {
            tokio::task::yield_now().await;
            self.inner.get(key).await
        }

        async fn set(&self, key: &str, value: &str, ttl: Option<Duration>) -> StoreResult<()> {
            tokio::task::yield_now().await;
            self.inner.set(key, value, ttl).await
        }

        async fn delete(&self, keys: &[String]) -> StoreResult<u64> {
            tokio::task::yield_now().await;
            self.inner.delete(keys).await
        }

        async fn exists(&self, key: &str) -> StoreResult<bool> {
            tokio::task::yield_now().await;
            self.inner.exists(key).await
        }

        async fn incr_by(&self, key: &str, delta: i64) -> StoreResult<i64> {
            tokio::task::yield_now().await;
            self.inner.incr_by(key, delta).await
        }

        async fn hget_all(&self, key: &str) -> StoreResult<HashMap<String, String>> {
            tokio::task::yield_now().await;
            self.inner.hget_all(key).await
        }

        async fn zrange_by_score(&self, key: &str, min: f64, max: f64) -> StoreResult<Vec<String>> {
            tokio::task::yield_now().await;
            self.inner.zrange_by_score(key, min, max).await
        }

        async fn keys(&self, pattern: &str) -> StoreResult<Vec<String>> {
            tokio::task::yield_now().await;
            self.inner.keys(pattern).await
        }

        async fn apply(&self, ops: &[WriteOp]) -> StoreResult<()> {
            tokio::task::yield_now().await;
            self.inner.apply(ops).await
        }

        async fn eval(
            &self,
            script: &StoreScript,
            keys: &[String],
            args: &[i64],
        ) -> StoreResult<Vec<i64>> {
            tokio::task::yield_now().await;
            self.inner.eval(script, keys, args).await
        }

        async fn memory_usage(&self) -> StoreResult<String> {
            tokio::task::yield_now().await;
            self.inner.memory_usage().await
        }
    }

    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    struct Profile {
        id: i64,
        name: String,
    }

    fn cache() -> (Cache, Arc<MemoryStore>, Arc<ManualClock>) {
        let clock = Arc::new(ManualClock::starting_now());
        let store = Arc::new(MemoryStore::new(10_000, clock.clone()));
        (Cache::new(store.clone(), clock.clone()), store, clock)
    }

    fn profile(id: i64) -> Profile {
        Profile {
            id,
            name: format!("user-{}", id),
        }
    }

    #[tokio::test]
    async fn test_set_get_round_trip() {
        let (cache, _, _) = cache();
        let config = CacheConfig::users();

        cache.set("id:1", &profile(1), &config).await.unwrap();
        let cached: Option<Profile> = cache.get("id:1", &config).await.unwrap();

        assert_eq!(cached, Some(profile(1)));
    }

    #[tokio::test]
    async fn test_missing_key_is_miss() {
        let (cache, _, _) = cache();
        let cached: Option<Profile> = cache.get("id:404", &CacheConfig::users()).await.unwrap();

        assert_eq!(cached, None);
        let stats = cache.stats().await.unwrap();
        assert_eq!(stats.misses, 1);
        assert_eq!(stats.hits, 0);
    }

    #[tokio::test]
    async fn test_user_expires_after_thirty_minutes() {
        let (cache, _, clock) = cache();
        let config = CacheConfig::users();
        cache.set("id:42", &profile(42), &config).await.unwrap();

        clock.advance(Duration::from_secs(29 * 60));
        let fresh: Option<Profile> = cache.get("id:42", &config).await.unwrap();
        assert_eq!(fresh, Some(profile(42)));

        clock.advance(Duration::from_secs(2 * 60));
        let stale: Option<Profile> = cache.get("id:42", &config).await.unwrap();
        assert_eq!(stale, None);
    }

    #[tokio::test]
    async fn test_expired_entry_self_heals_before_store_eviction() {
        // The store keeps real time, so only the cache sees the entry as expired
        let store = Arc::new(MemoryStore::new(100, system_clock()));
        let clock = Arc::new(ManualClock::starting_now());
        let cache = Cache::new(store.clone(), clock.clone());
        let config = CacheConfig::users();

        cache.set("id:1", &profile(1), &config).await.unwrap();
        clock.advance(Duration::from_secs(31 * 60));

        assert!(store.contains_raw("user:id:1"));
        let cached: Option<Profile> = cache.get("id:1", &config).await.unwrap();
        assert_eq!(cached, None);
        assert!(!store.contains_raw("user:id:1"));
        assert_eq!(cache.stats().await.unwrap().size, 0);
    }

    #[tokio::test]
    async fn test_decode_error_is_surfaced() {
        let (cache, _, _) = cache();
        let config = CacheConfig::users();
        cache.set("id:1", &"not a profile", &config).await.unwrap();

        let err = cache.get::<Profile>("id:1", &config).await.unwrap_err();
        assert!(matches!(err, CacheError::Decode { .. }));
    }

    #[tokio::test]
    async fn test_expired_entry_of_old_shape_is_a_miss() {
        let store = Arc::new(MemoryStore::new(100, system_clock()));
        let clock = Arc::new(ManualClock::starting_now());
        let cache = Cache::new(store.clone(), clock.clone());
        let config = CacheConfig::users();

        cache.set("id:1", &"old shape", &config).await.unwrap();
        clock.advance(Duration::from_secs(31 * 60));

        let cached: Option<Profile> = cache.get("id:1", &config).await.unwrap();
        assert_eq!(cached, None);
        assert!(!store.contains_raw("user:id:1"));
    }

    #[tokio::test]
    async fn test_concurrent_writes_to_one_key_count_once() {
        let clock = Arc::new(ManualClock::starting_now());
        let inner = Arc::new(MemoryStore::new(100, clock.clone()));
        let cache = Cache::new(Arc::new(YieldingStore { inner }), clock);
        let config = CacheConfig::users();

        let (first, second) = tokio::join!(
            cache.set("id:1", &1, &config),
            cache.set("id:1", &2, &config)
        );
        first.unwrap();
        second.unwrap();

        let stats = cache.stats().await.unwrap();
        assert_eq!(stats.size, 1);
        assert_eq!(stats.sets, 2);
    }

    #[tokio::test]
    async fn test_unavailable_store_reads_as_miss_and_fails_writes() {
        let (cache, store, _) = cache();
        let config = CacheConfig::users();
        store.set_online(false);

        let cached: Option<Profile> = cache.get("id:1", &config).await.unwrap();
        assert_eq!(cached, None);
        let err = cache.set("id:1", &profile(1), &config).await.unwrap_err();
        assert!(matches!(err, CacheError::Store(_)));
    }

    #[tokio::test]
    async fn test_delete_is_idempotent_and_tracks_size() {
        let (cache, _, _) = cache();
        let config = CacheConfig::sessions();
        cache.set("id:1", &"a", &config).await.unwrap();
        cache.set("id:1", &"b", &config).await.unwrap();
        assert_eq!(cache.stats().await.unwrap().size, 1);

        assert!(cache.delete("id:1", &config).await.unwrap());
        assert!(!cache.delete("id:1", &config).await.unwrap());

        let stats = cache.stats().await.unwrap();
        assert_eq!(stats.size, 0);
        assert_eq!(stats.sets, 2);
    }

    #[tokio::test]
    async fn test_invalidate_by_tag_only_touches_tagged_keys() {
        let (cache, store, _) = cache();
        let config = CacheConfig::api_responses();
        let tags = vec!["products".to_string()];

        cache.set_tagged("a", &1, &config, &tags).await.unwrap();
        cache.set_tagged("b", &2, &config, &tags).await.unwrap();
        cache.set("c", &3, &config).await.unwrap();

        assert_eq!(cache.invalidate_by_tag("products").await.unwrap(), 2);
        assert_eq!(cache.get::<i32>("a", &config).await.unwrap(), None);
        assert_eq!(cache.get::<i32>("c", &config).await.unwrap(), Some(3));
        assert!(!store.contains_raw("tag:products"));
        assert_eq!(cache.stats().await.unwrap().size, 1);

        assert_eq!(cache.invalidate_by_tag("products").await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_tag_index_expires_with_its_entries() {
        let (cache, store, clock) = cache();
        let config = CacheConfig::api_responses();
        let tags = vec!["products".to_string()];

        for page in 0..500 {
            cache
                .set_tagged(&format!("page:{}", page), &page, &config, &tags)
                .await
                .unwrap();
        }
        clock.advance(Duration::from_secs(60 * 60));
        store.cleanup_expired();

        // Only the stats counters outlive the entries
        assert!(!store.contains_raw("tag:products"));
        assert_eq!(
            store.keys("*").await.unwrap(),
            vec![SETS_KEY.to_string(), SIZE_KEY.to_string()]
        );
    }

    #[tokio::test]
    async fn test_tag_index_drops_expired_members_on_write() {
        let (cache, store, clock) = cache();
        let config = CacheConfig::api_responses();
        let tags = vec!["products".to_string()];

        for page in 0..10 {
            cache
                .set_tagged(&format!("page:{}", page), &page, &config, &tags)
                .await
                .unwrap();
        }
        clock.advance(config.ttl);
        cache.set_tagged("fresh", &0, &config, &tags).await.unwrap();

        let members = store
            .zrange_by_score("tag:products", f64::NEG_INFINITY, f64::INFINITY)
            .await
            .unwrap();
        assert_eq!(members, vec!["api_response:fresh"]);
    }

    #[tokio::test]
    async fn test_tag_index_outlives_shorter_domains() {
        let (cache, store, clock) = cache();
        let tags = vec!["account".to_string()];

        cache.set_tagged("id:1", &1, &CacheConfig::users(), &tags).await.unwrap();
        cache
            .set_tagged("page", &2, &CacheConfig::api_responses(), &tags)
            .await
            .unwrap();
        clock.advance(Duration::from_secs(10 * 60));

        assert!(store.contains_raw("tag:account"));
        assert_eq!(cache.invalidate_by_tag("account").await.unwrap(), 1);
        assert_eq!(cache.get::<i32>("id:1", &CacheConfig::users()).await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_invalidate_by_pattern() {
        let (cache, _, _) = cache();
        let users = CacheConfig::users();
        let sessions = CacheConfig::sessions();

        cache.set("id:1", &1, &users).await.unwrap();
        cache.set("id:2", &2, &users).await.unwrap();
        cache.set("id:1", &3, &sessions).await.unwrap();

        assert_eq!(cache.invalidate_by_pattern("user:*").await.unwrap(), 2);
        assert_eq!(cache.get::<i32>("id:1", &users).await.unwrap(), None);
        assert_eq!(cache.get::<i32>("id:1", &sessions).await.unwrap(), Some(3));
        assert_eq!(cache.invalidate_by_pattern("nothing:*").await.unwrap(), 0);
        assert_eq!(cache.stats().await.unwrap().size, 1);
    }

    #[tokio::test]
    async fn test_stats_hit_rate() {
        let (cache, _, _) = cache();
        let config = CacheConfig::users();
        cache.set("id:1", &profile(1), &config).await.unwrap();

        for _ in 0..3 {
            cache.get::<Profile>("id:1", &config).await.unwrap();
        }
        cache.get::<Profile>("id:2", &config).await.unwrap();

        let stats = cache.stats().await.unwrap();
        assert_eq!(stats.hits, 3);
        assert_eq!(stats.misses, 1);
        assert_eq!(stats.hit_rate, 0.75);
        assert_eq!(stats.size, 1);
        assert!(stats.memory_usage.ends_with('B') || stats.memory_usage.ends_with('K'));
    }

    #[test]
    fn test_size_adjustments_group_by_domain() {
        let ops = size_adjustments(
            ["user:id:1", "user:id:2", "session:id:1", "tag:x", "cache:stats:hits"].into_iter(),
        );
        assert_eq!(
            ops,
            vec![
                WriteOp::HIncrBy {
                    key: SIZE_KEY.to_string(),
                    field: "session".to_string(),
                    delta: -1,
                },
                WriteOp::HIncrBy {
                    key: SIZE_KEY.to_string(),
                    field: "user".to_string(),
                    delta: -2,
                },
            ]
        );
    }
}
