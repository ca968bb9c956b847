//! Request and Response models for the gatehouse API
//!
//! This module defines the DTOs (Data Transfer Objects) used for
//! serializing/deserializing HTTP query strings and response bodies.

pub mod requests;
pub mod responses;

// Re-export commonly used types
pub use requests::{PatternQuery, ProductsQuery, MAX_PAGE_SIZE};
pub use responses::{HealthResponse, InvalidateResponse, StatsResponse};
