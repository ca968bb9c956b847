//! Client identification for quota keys.

use std::net::{IpAddr, SocketAddr};

use axum::http::HeaderMap;
use sha2::{Digest, Sha256};

/// Authenticated principal, inserted into request extensions by whatever
/// authenticates the caller. Its presence takes priority over network identity.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthenticatedUser(pub String);

const UNKNOWN_IP: &str = "unknown";

/// Derives the quota identity of a caller.
///
/// - `user:<id>` for authenticated callers
/// - `ip:<ip>:ua:<hash>` when a user agent is present
/// - `ip:<ip>` otherwise
pub fn client_identifier(
    user: Option<&AuthenticatedUser>,
    ip: &str,
    user_agent: Option<&str>,
) -> String {
    if let Some(AuthenticatedUser(id)) = user {
        return format!("user:{}", id);
    }
    match user_agent.filter(|ua| !ua.is_empty()) {
        Some(ua) => format!("ip:{}:ua:{}", ip, user_agent_hash(ua)),
        None => format!("ip:{}", ip),
    }
}

/// First 8 bytes of SHA-256, hex encoded.
fn user_agent_hash(user_agent: &str) -> String {
    let digest = Sha256::digest(user_agent.as_bytes());
    hex::encode(&digest[..8])
}

/// Resolves the caller's IP from proxy headers, then the socket peer.
///
/// `X-Forwarded-For` and `X-Real-IP` are taken as-is, so this assumes a
/// trusted reverse proxy in front that overwrites them. Exposed directly,
/// a client can pick a new address per request and escape its quota.
pub fn client_ip(headers: &HeaderMap, peer: Option<SocketAddr>) -> String {
    let forwarded = headers
        .get("x-forwarded-for")
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.split(',').find_map(parse_ip));
    if let Some(ip) = forwarded {
        return ip.to_string();
    }

    let real_ip = headers
        .get("x-real-ip")
        .and_then(|value| value.to_str().ok())
        .and_then(parse_ip);
    if let Some(ip) = real_ip {
        return ip.to_string();
    }

    peer.map(|addr| addr.ip().to_string())
        .unwrap_or_else(|| UNKNOWN_IP.to_string())
}

fn parse_ip(raw: &str) -> Option<IpAddr> {
    raw.trim().parse().ok()
}
