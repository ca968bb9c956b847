//! API Handlers
//!
//! HTTP request handlers for each gatehouse endpoint.

use std::sync::Arc;

use axum::{
    extract::{Path, Query, State},
    Json,
};
use serde_json::json;
use tokio::task::JoinHandle;

use crate::cache::{query_key, user_key, Cache, CacheAside, CacheConfig};
use crate::catalog::{Catalog, Product, User};
use crate::clock::Clock;
use crate::config::Config;
use crate::error::{ApiError, Result};
use crate::models::{
    HealthResponse, InvalidateResponse, PatternQuery, ProductsQuery, StatsResponse,
};
use crate::ratelimit::{RateLimitConfig, RateLimiter};
use crate::store::KeyValueStore;
use crate::tasks::{spawn_populate_workers, PopulateQueue};

/// Tag every cached product page is indexed under
pub const PRODUCTS_TAG: &str = "products";

const PRODUCTS_SQL: &str = "SELECT * FROM products ORDER BY id LIMIT $1 OFFSET $2";

/// Application state shared across all handlers and middleware.
#[derive(Clone)]
pub struct AppState {
    pub store: Arc<dyn KeyValueStore>,
    pub cache: Cache,
    pub aside: CacheAside,
    pub limiter: RateLimiter,
    pub queue: PopulateQueue,
    pub catalog: Arc<dyn Catalog>,
    pub config: Config,
}

impl AppState {
    pub fn new(
        store: Arc<dyn KeyValueStore>,
        clock: Arc<dyn Clock>,
        catalog: Arc<dyn Catalog>,
        queue: PopulateQueue,
        config: Config,
    ) -> Self {
        let cache = Cache::new(store.clone(), clock.clone());
        Self {
            aside: CacheAside::new(cache.clone(), queue.clone()),
            limiter: RateLimiter::new(store.clone(), clock),
            store,
            cache,
            queue,
            catalog,
            config,
        }
    }

    /// Creates the state and starts the cache population workers it writes
    /// back through. The handle is aborted on shutdown.
    pub fn start(
        store: Arc<dyn KeyValueStore>,
        clock: Arc<dyn Clock>,
        catalog: Arc<dyn Catalog>,
        config: Config,
    ) -> (Self, JoinHandle<()>) {
        let cache = Cache::new(store.clone(), clock.clone());
        let (queue, handle) =
            spawn_populate_workers(cache, config.populate_workers, config.populate_queue);
        (Self::new(store, clock, catalog, queue, config), handle)
    }

    /// Quota for ordinary endpoints.
    pub fn default_limit(&self) -> RateLimitConfig {
        RateLimitConfig::default_api().with_check_timeout(self.config.rate_limit_timeout)
    }

    /// Quota for endpoints exposing account data.
    pub fn auth_limit(&self) -> RateLimitConfig {
        RateLimitConfig::auth().with_check_timeout(self.config.rate_limit_timeout)
    }

    /// Policy for whole cached responses.
    pub fn response_cache_config(&self) -> CacheConfig {
        CacheConfig::api_responses().with_ttl(self.config.response_cache_ttl)
    }
}

/// Handler for GET /health
pub async fn health_handler(State(state): State<AppState>) -> Json<HealthResponse> {
    let reachable = state.store.ping().await.is_ok();
    Json(HealthResponse::new(reachable))
}

/// Handler for GET /stats
pub async fn stats_handler(State(state): State<AppState>) -> Result<Json<StatsResponse>> {
    let cache = state.cache.stats().await?;
    Ok(Json(StatsResponse::new(cache, state.queue.stats())))
}

/// Handler for GET /products
///
/// Pages are read through the query cache and tagged for bulk invalidation.
pub async fn products_handler(
    State(state): State<AppState>,
    Query(query): Query<ProductsQuery>,
) -> Result<Json<Vec<Product>>> {
    if let Some(error_msg) = query.validate() {
        return Err(ApiError::InvalidRequest(error_msg));
    }

    let key = query_key(PRODUCTS_SQL, &[json!(query.limit), json!(query.offset)]);
    let catalog = state.catalog.clone();
    let products = state
        .aside
        .get_or_load_tagged(&key, &CacheConfig::db_queries(), &[PRODUCTS_TAG.to_string()], || async move {
            catalog.products(query.limit, query.offset).await.map(Some)
        })
        .await?
        .unwrap_or_default();

    Ok(Json(products))
}

/// Handler for GET /users/:id
pub async fn user_handler(State(state): State<AppState>, Path(id): Path<i64>) -> Result<Json<User>> {
    let catalog = state.catalog.clone();
    state
        .aside
        .get_or_load(&user_key(id), &CacheConfig::users(), || async move { catalog.user(id).await })
        .await?
        .map(Json)
        .ok_or_else(|| ApiError::NotFound(format!("user {}", id)))
}

/// Handler for DELETE /cache/tags/:tag
pub async fn invalidate_tag_handler(
    State(state): State<AppState>,
    Path(tag): Path<String>,
) -> Result<Json<InvalidateResponse>> {
    let removed = state.cache.invalidate_by_tag(&tag).await?;
    Ok(Json(InvalidateResponse::new(tag, removed)))
}

/// Handler for DELETE /cache/keys?pattern=<glob>
pub async fn invalidate_pattern_handler(
    State(state): State<AppState>,
    Query(query): Query<PatternQuery>,
) -> Result<Json<InvalidateResponse>> {
    if let Some(error_msg) = query.validate() {
        return Err(ApiError::InvalidRequest(error_msg));
    }

    let removed = state.cache.invalidate_by_pattern(&query.pattern).await?;
    Ok(Json(InvalidateResponse::new(query.pattern, removed)))
}

/// Handler for DELETE /cache/entries/:prefix/:key
pub async fn delete_entry_handler(
    State(state): State<AppState>,
    Path((prefix, key)): Path<(String, String)>,
) -> Result<Json<InvalidateResponse>> {
    let config = CacheConfig::for_prefix(&prefix)
        .ok_or_else(|| ApiError::InvalidRequest(format!("unknown cache domain '{}'", prefix)))?;

    let removed = state.cache.delete(&key, &config).await?;
    Ok(Json(InvalidateResponse::new(config.full_key(&key), u64::from(removed))))
}
