//! Rate limit admission middleware.

use std::net::SocketAddr;

use axum::extract::{ConnectInfo, Request, State};
use axum::http::{header, HeaderMap, HeaderValue, StatusCode};
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;
use tracing::debug;

use crate::ratelimit::{
    client_identifier, client_ip, AuthenticatedUser, RateLimitConfig, RateLimitResult, RateLimiter,
};

/// State for [`rate_limit_middleware`]; one per endpoint class.
#[derive(Clone)]
pub struct RateLimitLayerState {
    pub limiter: RateLimiter,
    pub config: RateLimitConfig,
}

impl RateLimitLayerState {
    pub fn new(limiter: RateLimiter, config: RateLimitConfig) -> Self {
        Self { limiter, config }
    }
}

/// Admits or rejects a request under the layer's quota, annotating the
/// response with the quota headers either way.
pub async fn rate_limit_middleware(
    State(state): State<RateLimitLayerState>,
    request: Request,
    next: Next,
) -> Response {
    let identifier = request_identifier(&request);
    let result = state.limiter.check_rate_limit(&identifier, &state.config).await;

    if !result.allowed {
        debug!(identifier = %identifier, path = %request.uri().path(), "request rate limited");
        return too_many_requests(&result);
    }

    let mut response = next.run(request).await;
    insert_quota_headers(response.headers_mut(), &result);
    response
}

fn request_identifier(request: &Request) -> String {
    let peer = request
        .extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|info| info.0);
    let ip = client_ip(request.headers(), peer);
    let user_agent = request
        .headers()
        .get(header::USER_AGENT)
        .and_then(|value| value.to_str().ok());
    let user = request.extensions().get::<AuthenticatedUser>();

    client_identifier(user, &ip, user_agent)
}

fn too_many_requests(result: &RateLimitResult) -> Response {
    let retry_after = result.retry_after_secs();
    let body = Json(json!({
        "error": "Too Many Requests",
        "message": format!("Rate limit exceeded. Try again in {} seconds", retry_after),
    }));

    let mut response = (StatusCode::TOO_MANY_REQUESTS, body).into_response();
    let headers = response.headers_mut();
    insert_quota_headers(headers, result);
    headers.insert(header::RETRY_AFTER, HeaderValue::from(retry_after));
    response
}

fn insert_quota_headers(headers: &mut HeaderMap, result: &RateLimitResult) {
    headers.insert("x-ratelimit-limit", HeaderValue::from(result.limit));
    headers.insert("x-ratelimit-remaining", HeaderValue::from(result.remaining));
    headers.insert("x-ratelimit-reset", HeaderValue::from(result.reset_at.timestamp()));
}
