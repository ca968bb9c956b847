//! Cache-aside reads.

use std::future::Future;

use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::{debug, warn};

use crate::cache::{Cache, CacheConfig};
use crate::error::CacheError;
use crate::tasks::{PopulateJob, PopulateQueue};

// == Cache Aside ==
/// Read-through over [`Cache`] with asynchronous write-back.
#[derive(Clone)]
pub struct CacheAside {
    cache: Cache,
    queue: PopulateQueue,
}

impl CacheAside {
    pub fn new(cache: Cache, queue: PopulateQueue) -> Self {
        Self { cache, queue }
    }

    pub fn cache(&self) -> &Cache {
        &self.cache
    }

    /// Returns the cached value, or runs `load` and schedules the result
    /// for caching. A loader answering `None` is not cached.
    pub async fn get_or_load<T, E, F, Fut>(
        &self,
        key: &str,
        config: &CacheConfig,
        load: F,
    ) -> Result<Option<T>, E>
    where
        T: Serialize + DeserializeOwned,
        E: From<CacheError>,
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<Option<T>, E>>,
    {
        self.get_or_load_tagged(key, config, &[], load).await
    }

    /// As [`get_or_load`](Self::get_or_load), indexing the write-back under `tags`.
    pub async fn get_or_load_tagged<T, E, F, Fut>(
        &self,
        key: &str,
        config: &CacheConfig,
        tags: &[String],
        load: F,
    ) -> Result<Option<T>, E>
    where
        T: Serialize + DeserializeOwned,
        E: From<CacheError>,
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<Option<T>, E>>,
    {
        if let Some(cached) = self.cache.get::<T>(key, config).await? {
            debug!(key, domain = %config.key_prefix, "cache-aside hit");
            return Ok(Some(cached));
        }

        let Some(value) = load().await? else {
            return Ok(None);
        };

        match serde_json::to_value(&value) {
            Ok(payload) => {
                let job = PopulateJob::new(key, payload, config.clone()).with_tags(tags.to_vec());
                self.queue.enqueue(job);
            }
            Err(err) => warn!(key, error = %err, "value not cacheable, skipping write-back"),
        }
        Ok(Some(value))
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use std::time::Duration;

    use super::*;
    use crate::clock::ManualClock;
    use crate::error::ApiError;
    use crate::store::MemoryStore;
    use crate::tasks::spawn_populate_workers;

    fn aside() -> (CacheAside, Arc<MemoryStore>, PopulateQueue) {
        let clock = Arc::new(ManualClock::starting_now());
        let store = Arc::new(MemoryStore::new(1000, clock.clone()));
        let cache = Cache::new(store.clone(), clock);
        let (queue, _handle) = spawn_populate_workers(cache.clone(), 2, 16);
        (CacheAside::new(cache, queue.clone()), store, queue)
    }

    #[tokio::test]
    async fn test_loads_once_then_serves_from_cache() {
        let (aside, _, queue) = aside();
        let config = CacheConfig::users();
        let calls = AtomicUsize::new(0);

        for _ in 0..3 {
            let value: Option<String> = aside
                .get_or_load("id:1", &config, || async {
                    calls.fetch_add(1, Ordering::SeqCst);
                    Ok::<_, ApiError>(Some("alice".to_string()))
                })
                .await
                .unwrap();
            assert_eq!(value.as_deref(), Some("alice"));
            assert!(queue.wait_idle(Duration::from_secs(2)).await);
        }

        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_absent_values_are_not_cached() {
        let (aside, _, queue) = aside();
        let config = CacheConfig::users();

        let value: Option<String> = aside
            .get_or_load("id:9", &config, || async { Ok::<_, ApiError>(None) })
            .await
            .unwrap();

        assert_eq!(value, None);
        assert_eq!(queue.stats().scheduled, 0);
    }

    #[tokio::test]
    async fn test_loader_runs_when_store_is_down() {
        let (aside, store, _) = aside();
        store.set_online(false);

        let value: Option<u32> = aside
            .get_or_load("id:1", &CacheConfig::users(), || async { Ok::<_, ApiError>(Some(7)) })
            .await
            .unwrap();
        assert_eq!(value, Some(7));
    }

    #[tokio::test]
    async fn test_loader_errors_propagate() {
        let (aside, _, _) = aside();

        let result: Result<Option<u32>, ApiError> = aside
            .get_or_load("id:1", &CacheConfig::users(), || async {
                Err(ApiError::Internal("database down".to_string()))
            })
            .await;
        assert!(matches!(result, Err(ApiError::Internal(_))));
    }
}
