//! Shortcuts for the built-in cache domains.

use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::cache::{api_response_key, query_key, session_key, user_key, Cache, CacheConfig};
use crate::error::CacheError;

impl Cache {
    pub async fn cache_user<T: Serialize>(&self, user_id: i64, user: &T) -> Result<(), CacheError> {
        self.set(&user_key(user_id), user, &CacheConfig::users()).await
    }

    pub async fn get_cached_user<T: DeserializeOwned>(&self, user_id: i64) -> Result<Option<T>, CacheError> {
        self.get(&user_key(user_id), &CacheConfig::users()).await
    }

    pub async fn cache_session<T: Serialize>(&self, session_id: i64, session: &T) -> Result<(), CacheError> {
        self.set(&session_key(session_id), session, &CacheConfig::sessions()).await
    }

    pub async fn get_cached_session<T: DeserializeOwned>(
        &self,
        session_id: i64,
    ) -> Result<Option<T>, CacheError> {
        self.get(&session_key(session_id), &CacheConfig::sessions()).await
    }

    /// Caches a response keyed by endpoint and its raw parameters.
    pub async fn cache_api_response<T: Serialize>(
        &self,
        endpoint: &str,
        params: &str,
        response: &T,
    ) -> Result<(), CacheError> {
        let key = api_response_key(endpoint, params);
        self.set(&key, response, &CacheConfig::api_responses()).await
    }

    pub async fn get_cached_api_response<T: DeserializeOwned>(
        &self,
        endpoint: &str,
        params: &str,
    ) -> Result<Option<T>, CacheError> {
        let key = api_response_key(endpoint, params);
        self.get(&key, &CacheConfig::api_responses()).await
    }

    /// Caches a query result keyed by SQL text and positional arguments.
    pub async fn cache_query<T: Serialize>(
        &self,
        sql: &str,
        args: &[serde_json::Value],
        result: &T,
    ) -> Result<(), CacheError> {
        self.set(&query_key(sql, args), result, &CacheConfig::db_queries()).await
    }

    pub async fn get_cached_query<T: DeserializeOwned>(
        &self,
        sql: &str,
        args: &[serde_json::Value],
    ) -> Result<Option<T>, CacheError> {
        self.get(&query_key(sql, args), &CacheConfig::db_queries()).await
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use serde_json::json;

    use super::*;
    use crate::clock::ManualClock;
    use crate::store::MemoryStore;

    fn cache() -> (Cache, Arc<MemoryStore>) {
        let clock = Arc::new(ManualClock::starting_now());
        let store = Arc::new(MemoryStore::new(1000, clock.clone()));
        (Cache::new(store.clone(), clock), store)
    }

    #[tokio::test]
    async fn test_user_and_session_share_ids_without_colliding() {
        let (cache, store) = cache();
        cache.cache_user(1, &"alice").await.unwrap();
        cache.cache_session(1, &"token-abc").await.unwrap();

        assert!(store.contains_raw("user:id:1"));
        assert!(store.contains_raw("session:id:1"));
        assert_eq!(cache.get_cached_user::<String>(1).await.unwrap().as_deref(), Some("alice"));
        assert_eq!(
            cache.get_cached_session::<String>(1).await.unwrap().as_deref(),
            Some("token-abc")
        );
    }

    #[tokio::test]
    async fn test_api_response_round_trip() {
        let (cache, _) = cache();
        cache
            .cache_api_response("/products", "page=1", &json!({"items": [1, 2]}))
            .await
            .unwrap();

        let hit: Option<serde_json::Value> = cache.get_cached_api_response("/products", "page=1").await.unwrap();
        assert_eq!(hit, Some(json!({"items": [1, 2]})));
        let miss: Option<serde_json::Value> = cache.get_cached_api_response("/products", "page=2").await.unwrap();
        assert_eq!(miss, None);
    }

    #[tokio::test]
    async fn test_query_cache_keys_on_arguments() {
        let (cache, _) = cache();
        let sql = "SELECT name FROM users WHERE id = $1";
        cache.cache_query(sql, &[json!(1)], &vec!["alice"]).await.unwrap();

        let hit: Option<Vec<String>> = cache.get_cached_query(sql, &[json!(1)]).await.unwrap();
        assert_eq!(hit, Some(vec!["alice".to_string()]));
        let other: Option<Vec<String>> = cache.get_cached_query(sql, &[json!("1")]).await.unwrap();
        assert_eq!(other, None);
    }
}
