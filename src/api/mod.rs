//! API Module
//!
//! HTTP handlers and routing for the gatehouse REST API.
//!
//! # Endpoints
//! - `GET /health` - Health check endpoint
//! - `GET /stats` - Cache and population statistics
//! - `GET /products` - Product listing, response- and query-cached
//! - `GET /users/:id` - User lookup through the user cache
//! - `DELETE /cache/tags/:tag` - Invalidate by tag
//! - `DELETE /cache/keys?pattern=` - Invalidate by key glob
//! - `DELETE /cache/entries/:prefix/:key` - Delete one entry

pub mod handlers;
pub mod routes;

pub use handlers::*;
pub use routes::create_router;
