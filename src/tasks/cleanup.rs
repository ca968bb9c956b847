//! TTL Cleanup Task
//!
//! Background sweep of expired keys in the in-memory store. Reads already
//! skip expired keys; the sweep reclaims their memory.

use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tracing::{debug, info};

use crate::store::MemoryStore;

/// Spawns a task that drops expired keys from `store` every
/// `cleanup_interval_secs` seconds.
///
/// The returned handle is aborted during graceful shutdown.
pub fn spawn_cleanup_task(store: Arc<MemoryStore>, cleanup_interval_secs: u64) -> JoinHandle<()> {
    let interval = Duration::from_secs(cleanup_interval_secs.max(1));

    tokio::spawn(async move {
        info!(
            "Starting TTL cleanup task with interval of {} seconds",
            interval.as_secs()
        );

        loop {
            tokio::time::sleep(interval).await;

            let removed = store.cleanup_expired();
            if removed > 0 {
                info!(removed, "TTL cleanup: removed expired keys");
            } else {
                debug!("TTL cleanup: no expired keys found");
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::{system_clock, Clock, ManualClock};
    use crate::store::KeyValueStore;

    #[tokio::test]
    async fn test_cleanup_task_removes_expired_entries() {
        let clock = Arc::new(ManualClock::starting_now());
        let store = Arc::new(MemoryStore::new(100, clock.clone()));
        store
            .set("expire_soon", "value", Some(Duration::from_secs(1)))
            .await
            .unwrap();
        store.set("keep", "value", None).await.unwrap();
        clock.set(clock.now() + chrono::Duration::seconds(2));

        let handle = spawn_cleanup_task(store.clone(), 1);
        tokio::time::sleep(Duration::from_millis(1500)).await;

        assert_eq!(store.len(), 1, "expired key should have been swept");
        assert!(store.contains_raw("keep"));
        handle.abort();
    }

    #[tokio::test]
    async fn test_cleanup_task_preserves_valid_entries() {
        let store = Arc::new(MemoryStore::new(100, system_clock()));
        store
            .set("long_lived", "value", Some(Duration::from_secs(3600)))
            .await
            .unwrap();

        let handle = spawn_cleanup_task(store.clone(), 1);
        tokio::time::sleep(Duration::from_millis(1200)).await;

        assert_eq!(store.get("long_lived").await.unwrap(), Some("value".to_string()));
        handle.abort();
    }

    #[tokio::test]
    async fn test_cleanup_task_can_be_aborted() {
        let store = Arc::new(MemoryStore::new(100, system_clock()));
        let handle = spawn_cleanup_task(store, 1);

        handle.abort();
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert!(handle.is_finished(), "Task should be finished after abort");
    }
}
