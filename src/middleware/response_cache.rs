//! Whole-response caching middleware.
//!
//! Anonymous GET responses are memoized under a key derived from the path,
//! query and content-negotiation headers. Misses are served by the handler
//! and written back through the population queue, off the request path.

use axum::body::{to_bytes, Body, Bytes, HttpBody};
use axum::extract::{Request, State};
use axum::http::{header, HeaderMap, HeaderName, HeaderValue, Method, StatusCode};
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::cache::{short_digest, Cache, CacheConfig};
use crate::error::CacheError;
use crate::tasks::{PopulateJob, PopulateQueue};

const X_CACHE: &str = "x-cache";
const X_CACHE_DATE: &str = "x-cache-date";

/// State for [`response_cache_middleware`].
#[derive(Clone)]
pub struct ResponseCacheState {
    pub cache: Cache,
    pub queue: PopulateQueue,
    pub config: CacheConfig,
    /// Larger responses are served but never cached
    pub max_body_bytes: usize,
    /// Tags indexed on every cached response, for bulk invalidation
    pub tags: Vec<String>,
}

impl ResponseCacheState {
    pub fn new(cache: Cache, queue: PopulateQueue, config: CacheConfig) -> Self {
        Self {
            cache,
            queue,
            config,
            max_body_bytes: 1024 * 1024,
            tags: Vec::new(),
        }
    }

    pub fn with_max_body_bytes(mut self, max_body_bytes: usize) -> Self {
        self.max_body_bytes = max_body_bytes;
        self
    }

    pub fn with_tags(mut self, tags: Vec<String>) -> Self {
        self.tags = tags;
        self
    }
}

// == Cached Response ==
/// A response as stored in the cache. The body is base64 so arbitrary bytes
/// survive the JSON envelope.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CachedResponse {
    pub status: u16,
    pub headers: Vec<(String, String)>,
    pub body: String,
    pub cached_at: DateTime<Utc>,
}

impl CachedResponse {
    /// Snapshots a response, leaving out cache bookkeeping headers.
    pub fn capture(status: StatusCode, headers: &HeaderMap, body: &[u8], cached_at: DateTime<Utc>) -> Self {
        let headers = headers
            .iter()
            .filter(|(name, _)| !is_cache_header(name))
            .filter_map(|(name, value)| {
                value
                    .to_str()
                    .ok()
                    .map(|value| (name.as_str().to_string(), value.to_string()))
            })
            .collect();

        Self {
            status: status.as_u16(),
            headers,
            body: BASE64.encode(body),
            cached_at,
        }
    }

    /// Rebuilds the response, marked as a cache hit.
    pub fn replay(self, key: &str) -> Result<Response, CacheError> {
        let decode_err = |reason: String| CacheError::Decode {
            key: key.to_string(),
            reason,
        };

        let status = StatusCode::from_u16(self.status).map_err(|e| decode_err(e.to_string()))?;
        let body = BASE64.decode(self.body.as_bytes()).map_err(|e| decode_err(e.to_string()))?;

        let mut response = Response::new(Body::from(body));
        *response.status_mut() = status;
        let headers = response.headers_mut();
        for (name, value) in &self.headers {
            let name = HeaderName::from_bytes(name.as_bytes()).map_err(|e| decode_err(e.to_string()))?;
            let value = HeaderValue::from_str(value).map_err(|e| decode_err(e.to_string()))?;
            headers.append(name, value);
        }
        headers.insert(X_CACHE, HeaderValue::from_static("HIT"));
        let cached_at = HeaderValue::from_str(&self.cached_at.to_rfc3339())
            .map_err(|e| decode_err(e.to_string()))?;
        headers.insert(X_CACHE_DATE, cached_at);
        Ok(response)
    }
}

fn is_cache_header(name: &HeaderName) -> bool {
    name.as_str().starts_with(X_CACHE)
}

/// Only anonymous GETs are shared between callers.
fn is_cacheable(request: &Request) -> bool {
    request.method() == Method::GET && !request.headers().contains_key(header::AUTHORIZATION)
}

/// Cache key over the path, query and content-negotiation headers.
pub fn response_cache_key(request: &Request) -> String {
    let header_text = |name: HeaderName| {
        request
            .headers()
            .get(name)
            .and_then(|value| value.to_str().ok())
            .unwrap_or("")
    };

    short_digest(&[
        request.uri().path(),
        request.uri().query().unwrap_or(""),
        header_text(header::ACCEPT),
        header_text(header::ACCEPT_LANGUAGE),
        header_text(header::ACCEPT_ENCODING),
    ])
}

pub async fn response_cache_middleware(
    State(state): State<ResponseCacheState>,
    request: Request,
    next: Next,
) -> Response {
    if !is_cacheable(&request) {
        return next.run(request).await;
    }

    let key = response_cache_key(&request);
    match state.cache.get::<CachedResponse>(&key, &state.config).await {
        Ok(Some(cached)) => match cached.replay(&key) {
            Ok(response) => {
                debug!(key = %key, path = %request.uri().path(), "response cache hit");
                return response;
            }
            Err(err) => warn!(key = %key, error = %err, "cached response unusable, bypassing"),
        },
        Ok(None) => {}
        Err(err) => warn!(key = %key, error = %err, "cached response unreadable, bypassing"),
    }

    let mut response = next.run(request).await;
    response.headers_mut().insert(X_CACHE, HeaderValue::from_static("MISS"));
    if !response.status().is_success() {
        return response;
    }

    // Only bodies known to fit are buffered; the rest stream through uncached
    let fits = response
        .body()
        .size_hint()
        .upper()
        .is_some_and(|len| len <= state.max_body_bytes as u64);
    if !fits {
        debug!(key = %key, "response body too large or unsized, not cached");
        return response;
    }

    let (parts, body) = response.into_parts();
    let bytes: Bytes = match to_bytes(body, state.max_body_bytes).await {
        Ok(bytes) => bytes,
        Err(err) => {
            // The handler's own body failed and is consumed by now
            warn!(key = %key, error = %err, "failed to buffer response body");
            return StatusCode::INTERNAL_SERVER_ERROR.into_response();
        }
    };

    let cached = CachedResponse::capture(parts.status, &parts.headers, &bytes, state.cache.clock().now());
    match serde_json::to_value(&cached) {
        Ok(payload) => {
            let job = PopulateJob::new(key, payload, state.config.clone()).with_tags(state.tags.clone());
            state.queue.enqueue(job);
        }
        Err(err) => warn!(error = %err, "response not cacheable"),
    }

    Response::from_parts(parts, Body::from(bytes))
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::time::Duration;

    use axum::middleware::from_fn_with_state;
    use axum::routing::get;
    use axum::Router;
    use tower::util::ServiceExt;

    use super::*;
    use crate::clock::ManualClock;
    use crate::store::MemoryStore;
    use crate::tasks::spawn_populate_workers;

    fn request(uri: &str) -> axum::http::request::Builder {
        axum::http::Request::builder().uri(uri)
    }

    fn app(max_body_bytes: usize) -> (Router, PopulateQueue) {
        let clock = Arc::new(ManualClock::starting_now());
        let store = Arc::new(MemoryStore::new(100, clock.clone()));
        let cache = Cache::new(store, clock);
        let (queue, _workers) = spawn_populate_workers(cache.clone(), 2, 16);
        let state = ResponseCacheState::new(cache, queue.clone(), CacheConfig::api_responses())
            .with_max_body_bytes(max_body_bytes);

        let router = Router::new()
            .route("/small", get(|| async { "ok" }))
            .route("/large", get(|| async { "x".repeat(64) }))
            .layer(from_fn_with_state(state, response_cache_middleware));
        (router, queue)
    }

    async fn send(router: &Router, uri: &str) -> Response {
        router
            .clone()
            .oneshot(request(uri).body(Body::empty()).unwrap())
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn test_small_response_is_cached() {
        let (router, queue) = app(16);

        let first = send(&router, "/small").await;
        assert_eq!(first.headers()[X_CACHE], "MISS");
        assert!(queue.wait_idle(Duration::from_secs(1)).await);

        let second = send(&router, "/small").await;
        assert_eq!(second.headers()[X_CACHE], "HIT");
        let body = to_bytes(second.into_body(), usize::MAX).await.unwrap();
        assert_eq!(&body[..], b"ok");
    }

    #[tokio::test]
    async fn test_oversized_response_passes_through_uncached() {
        let (router, queue) = app(16);

        let first = send(&router, "/large").await;
        assert_eq!(first.status(), StatusCode::OK);
        assert_eq!(first.headers()[X_CACHE], "MISS");
        let body = to_bytes(first.into_body(), usize::MAX).await.unwrap();
        assert_eq!(body.len(), 64);

        assert_eq!(queue.stats().scheduled, 0);
        let second = send(&router, "/large").await;
        assert_eq!(second.headers()[X_CACHE], "MISS");
    }

    #[test]
    fn test_key_varies_with_query_and_negotiation() {
        let plain = request("/products?page=1").body(Body::empty()).unwrap();
        let other_page = request("/products?page=2").body(Body::empty()).unwrap();
        let french = request("/products?page=1")
            .header(header::ACCEPT_LANGUAGE, "fr")
            .body(Body::empty())
            .unwrap();
        let same = request("/products?page=1").body(Body::empty()).unwrap();

        let key = response_cache_key(&plain);
        assert_eq!(key.len(), 16);
        assert_eq!(key, response_cache_key(&same));
        assert_ne!(key, response_cache_key(&other_page));
        assert_ne!(key, response_cache_key(&french));
    }

    #[test]
    fn test_only_anonymous_gets_are_cacheable() {
        let get = request("/").body(Body::empty()).unwrap();
        let post = request("/").method(Method::POST).body(Body::empty()).unwrap();
        let authed = request("/")
            .header(header::AUTHORIZATION, "Bearer t")
            .body(Body::empty())
            .unwrap();

        assert!(is_cacheable(&get));
        assert!(!is_cacheable(&post));
        assert!(!is_cacheable(&authed));
    }

    #[tokio::test]
    async fn test_capture_and_replay() {
        let mut headers = HeaderMap::new();
        headers.insert(header::CONTENT_TYPE, HeaderValue::from_static("application/json"));
        headers.insert(X_CACHE, HeaderValue::from_static("MISS"));
        let cached_at = Utc::now();

        let cached = CachedResponse::capture(StatusCode::OK, &headers, b"[1,2,3]", cached_at);
        assert_eq!(cached.headers, vec![("content-type".to_string(), "application/json".to_string())]);

        let response = cached.replay("k").unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(response.headers()[X_CACHE], "HIT");
        assert_eq!(response.headers()[header::CONTENT_TYPE], "application/json");
        assert_eq!(
            response.headers()[X_CACHE_DATE].to_str().unwrap(),
            cached_at.to_rfc3339()
        );
        let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        assert_eq!(&body[..], b"[1,2,3]");
    }

    #[test]
    fn test_corrupt_entry_fails_replay() {
        let cached = CachedResponse {
            status: 200,
            headers: Vec::new(),
            body: "%%% not base64".to_string(),
            cached_at: Utc::now(),
        };
        assert!(matches!(cached.replay("k"), Err(CacheError::Decode { .. })));
    }
}
