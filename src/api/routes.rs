//! API Routes
//!
//! Configures the Axum router with all gatehouse endpoints and their
//! admission and caching layers.

use axum::{
    middleware::from_fn_with_state,
    routing::{delete, get},
    Router,
};
use tower_http::{
    cors::{Any, CorsLayer},
    trace::TraceLayer,
};

use super::handlers::{
    delete_entry_handler, health_handler, invalidate_pattern_handler, invalidate_tag_handler,
    products_handler, stats_handler, user_handler, AppState, PRODUCTS_TAG,
};
use crate::middleware::{
    rate_limit_middleware, response_cache_middleware, RateLimitLayerState, ResponseCacheState,
};

/// Creates the main router with all endpoints configured.
///
/// # Endpoints
/// - `GET /health` - Health check, unlimited
/// - `GET /products` - Product pages; default quota, response cache
/// - `GET /users/:id` - User lookup; auth quota
/// - `GET /stats` - Cache and population statistics; default quota
/// - `DELETE /cache/tags/:tag`, `DELETE /cache/keys?pattern=`,
///   `DELETE /cache/entries/:prefix/:key` - Invalidation; default quota
///
/// # Middleware
/// Rate limiting runs before the response cache, so cached responses still
/// count against the caller's quota.
pub fn create_router(state: AppState) -> Router {
    // Configure CORS middleware
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let default_limit = RateLimitLayerState::new(state.limiter.clone(), state.default_limit());
    let auth_limit = RateLimitLayerState::new(state.limiter.clone(), state.auth_limit());
    let response_cache = ResponseCacheState::new(
        state.cache.clone(),
        state.queue.clone(),
        state.response_cache_config(),
    )
    .with_tags(vec![PRODUCTS_TAG.to_string()]);

    let products = Router::new()
        .route("/products", get(products_handler))
        .layer(from_fn_with_state(response_cache, response_cache_middleware))
        .layer(from_fn_with_state(default_limit.clone(), rate_limit_middleware));

    let users = Router::new()
        .route("/users/:id", get(user_handler))
        .layer(from_fn_with_state(auth_limit, rate_limit_middleware));

    let admin = Router::new()
        .route("/stats", get(stats_handler))
        .route("/cache/tags/:tag", delete(invalidate_tag_handler))
        .route("/cache/keys", delete(invalidate_pattern_handler))
        .route("/cache/entries/:prefix/:key", delete(delete_entry_handler))
        .layer(from_fn_with_state(default_limit, rate_limit_middleware));

    Router::new()
        .route("/health", get(health_handler))
        .merge(products)
        .merge(users)
        .merge(admin)
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
