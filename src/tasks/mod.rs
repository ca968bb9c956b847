//! Background Tasks Module
//!
//! Long-running tasks spawned at startup.
//!
//! # Tasks
//! - TTL Cleanup: sweeps expired keys out of the in-memory store
//! - Cache Population: drains write-backs scheduled on cache misses

mod cleanup;
mod populate;

pub use cleanup::spawn_cleanup_task;
pub use populate::{spawn_populate_workers, PopulateJob, PopulateQueue, PopulateStats};
