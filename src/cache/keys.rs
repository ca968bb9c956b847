//! Content-derived cache keys.

use sha2::{Digest, Sha256};

/// Hex characters kept from truncated digests
const SHORT_KEY_LEN: usize = 16;

/// Key of a user entry under the users domain.
pub fn user_key(user_id: i64) -> String {
    format!("id:{}", user_id)
}

/// Key of a session entry under the sessions domain.
pub fn session_key(session_id: i64) -> String {
    format!("id:{}", session_id)
}

/// Full SHA-256 hex of endpoint followed by its parameters.
pub fn api_response_key(endpoint: &str, params: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(endpoint.as_bytes());
    hasher.update(params.as_bytes());
    hex::encode(hasher.finalize())
}

/// Truncated SHA-256 over the canonical JSON of `[sql, args]`, so `1` and
/// `"1"` as arguments produce different keys.
pub fn query_key(sql: &str, args: &[serde_json::Value]) -> String {
    let canonical = serde_json::json!([sql, args]).to_string();
    short_digest(&[canonical.as_str()])
}

/// Truncated SHA-256 over newline-terminated parts.
pub fn short_digest(parts: &[&str]) -> String {
    let mut hasher = Sha256::new();
    for part in parts {
        hasher.update(part.as_bytes());
        hasher.update(b"\n");
    }
    let mut digest = hex::encode(hasher.finalize());
    digest.truncate(SHORT_KEY_LEN);
    digest
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_api_response_key_is_full_digest() {
        let key = api_response_key("/products", "page=1");
        assert_eq!(key.len(), 64);
        assert_eq!(key, api_response_key("/products", "page=1"));
        assert_ne!(key, api_response_key("/products", "page=2"));
    }

    #[test]
    fn test_query_key_distinguishes_argument_types() {
        let sql = "SELECT * FROM users WHERE id = $1";
        let numeric = query_key(sql, &[json!(1)]);
        let textual = query_key(sql, &[json!("1")]);

        assert_eq!(numeric.len(), 16);
        assert_ne!(numeric, textual);
        assert_eq!(numeric, query_key(sql, &[json!(1)]));
    }

    #[test]
    fn test_short_digest_separates_parts() {
        assert_ne!(short_digest(&["ab", "c"]), short_digest(&["a", "bc"]));
        assert_eq!(short_digest(&["x"]).len(), 16);
    }

    #[test]
    fn test_domain_keys() {
        assert_eq!(user_key(42), "id:42");
        assert_eq!(session_key(7), "id:7");
    }
}
