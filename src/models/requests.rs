//! Request DTOs for the gatehouse API
//!
//! Query strings accepted by the HTTP endpoints.

use serde::Deserialize;

/// Largest page `GET /products` serves
pub const MAX_PAGE_SIZE: usize = 100;

/// Query string of `GET /products`
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct ProductsQuery {
    #[serde(default = "default_limit")]
    pub limit: usize,
    #[serde(default)]
    pub offset: usize,
}

fn default_limit() -> usize {
    20
}

impl Default for ProductsQuery {
    fn default() -> Self {
        Self {
            limit: default_limit(),
            offset: 0,
        }
    }
}

impl ProductsQuery {
    /// Validates the request data
    ///
    /// Returns an error message if validation fails, None if valid.
    pub fn validate(&self) -> Option<String> {
        if self.limit == 0 || self.limit > MAX_PAGE_SIZE {
            return Some(format!("limit must be between 1 and {}", MAX_PAGE_SIZE));
        }
        None
    }
}

/// Query string of `DELETE /cache/keys`
#[derive(Debug, Clone, Deserialize)]
pub struct PatternQuery {
    pub pattern: String,
}

impl PatternQuery {
    /// Rejects empty patterns and the bare wildcard, which would also wipe
    /// statistics and rate limit state.
    pub fn validate(&self) -> Option<String> {
        let pattern = self.pattern.trim();
        if pattern.is_empty() {
            return Some("Pattern cannot be empty".to_string());
        }
        if pattern.chars().all(|c| c == '*') {
            return Some("Pattern must name a key prefix".to_string());
        }
        None
    }
}
