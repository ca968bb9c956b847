//! HTTP Middleware Module
//!
//! axum layers applied ahead of the handlers, in order: rate limit admission,
//! then response caching.

mod rate_limit;
mod response_cache;

pub use rate_limit::{rate_limit_middleware, RateLimitLayerState};
pub use response_cache::{
    response_cache_key, response_cache_middleware, CachedResponse, ResponseCacheState,
};
