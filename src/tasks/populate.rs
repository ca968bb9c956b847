//! Cache Population Queue
//!
//! Write-backs scheduled on cache misses run here, detached from the
//! request that triggered them. The queue is bounded: when it is full new
//! jobs are dropped and counted, never awaited. Jobs run concurrently up to
//! the worker count, each under its own deadline.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use tokio::sync::mpsc::{self, error::TrySendError};
use tokio::sync::{Notify, Semaphore};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::cache::{Cache, CacheConfig};

/// Upper bound on a single write-back
const JOB_TIMEOUT: Duration = Duration::from_secs(5);

// == Populate Job ==
#[derive(Debug, Clone)]
pub struct PopulateJob {
    /// Key relative to `config.key_prefix`
    pub key: String,
    pub payload: serde_json::Value,
    pub config: CacheConfig,
    pub tags: Vec<String>,
}

impl PopulateJob {
    pub fn new(key: impl Into<String>, payload: serde_json::Value, config: CacheConfig) -> Self {
        Self {
            key: key.into(),
            payload,
            config,
            tags: Vec::new(),
        }
    }

    pub fn with_tags(mut self, tags: Vec<String>) -> Self {
        self.tags = tags;
        self
    }
}

// == Populate Stats ==
/// Queue outcome counters since startup.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct PopulateStats {
    pub scheduled: u64,
    pub completed: u64,
    pub failed: u64,
    pub dropped: u64,
}

#[derive(Debug, Default)]
struct Counters {
    scheduled: AtomicU64,
    completed: AtomicU64,
    failed: AtomicU64,
    dropped: AtomicU64,
    /// Signalled whenever a job finishes
    finished: Notify,
}

impl Counters {
    fn finish(&self, outcome: &AtomicU64) {
        outcome.fetch_add(1, Ordering::Relaxed);
        self.finished.notify_waiters();
    }
}

// == Populate Queue ==
/// Producer side of the population queue. Cheap to clone.
#[derive(Clone)]
pub struct PopulateQueue {
    sender: mpsc::Sender<PopulateJob>,
    counters: Arc<Counters>,
}

impl PopulateQueue {
    /// Schedules a job without waiting. Returns false if it was dropped.
    pub fn enqueue(&self, job: PopulateJob) -> bool {
        match self.sender.try_send(job) {
            Ok(()) => {
                self.counters.scheduled.fetch_add(1, Ordering::Relaxed);
                true
            }
            Err(TrySendError::Full(job)) => {
                self.counters.dropped.fetch_add(1, Ordering::Relaxed);
                warn!(key = %job.key, "population queue full, dropping job");
                false
            }
            Err(TrySendError::Closed(job)) => {
                self.counters.dropped.fetch_add(1, Ordering::Relaxed);
                warn!(key = %job.key, "population queue closed, dropping job");
                false
            }
        }
    }

    pub fn stats(&self) -> PopulateStats {
        PopulateStats {
            scheduled: self.counters.scheduled.load(Ordering::Relaxed),
            completed: self.counters.completed.load(Ordering::Relaxed),
            failed: self.counters.failed.load(Ordering::Relaxed),
            dropped: self.counters.dropped.load(Ordering::Relaxed),
        }
    }

    /// Waits until every scheduled job has finished, or `timeout` passes.
    /// Returns true if the queue drained.
    pub async fn wait_idle(&self, timeout: Duration) -> bool {
        let drained = async {
            loop {
                // Registered before the check so a finish in between is not missed
                let finished = self.counters.finished.notified();
                let stats = self.stats();
                if stats.completed + stats.failed >= stats.scheduled {
                    return;
                }
                finished.await;
            }
        };
        tokio::time::timeout(timeout, drained).await.is_ok()
    }
}

/// Starts the dispatcher draining the queue into `cache`.
///
/// At most `workers` jobs run at once and at most `capacity` wait.
pub fn spawn_populate_workers(
    cache: Cache,
    workers: usize,
    capacity: usize,
) -> (PopulateQueue, JoinHandle<()>) {
    let (sender, mut receiver) = mpsc::channel::<PopulateJob>(capacity.max(1));
    let counters = Arc::new(Counters::default());
    let queue = PopulateQueue {
        sender,
        counters: counters.clone(),
    };
    let permits = Arc::new(Semaphore::new(workers.max(1)));

    let handle = tokio::spawn(async move {
        info!(workers, capacity, "Starting cache population workers");

        while let Some(job) = receiver.recv().await {
            let Ok(permit) = permits.clone().acquire_owned().await else {
                break;
            };
            let cache = cache.clone();
            let counters = counters.clone();

            tokio::spawn(async move {
                let _permit = permit;
                let write = cache.set_tagged(&job.key, &job.payload, &job.config, &job.tags);

                match tokio::time::timeout(JOB_TIMEOUT, write).await {
                    Ok(Ok(())) => {
                        counters.finish(&counters.completed);
                        debug!(key = %job.key, "cache populated");
                    }
                    Ok(Err(err)) => {
                        counters.finish(&counters.failed);
                        warn!(key = %job.key, error = %err, "cache population failed");
                    }
                    Err(_) => {
                        counters.finish(&counters.failed);
                        warn!(key = %job.key, "cache population timed out");
                    }
                }
            });
        }

        debug!("population queue closed");
    });

    (queue, handle)
}
