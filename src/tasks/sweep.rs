//! Eviction Sweep Task
//!
//! Background task that periodically removes cache rows past their eviction
//! instant, together with their secondary index entries.

use std::time::Duration;

use tokio::task::JoinHandle;
use tracing::{debug, info};

use crate::cache::CacheController;

/// Spawns a background task that periodically evicts expired rows.
///
/// The task runs in an infinite loop, sleeping for the specified interval
/// between sweeps. Each sweep removes every primary row past `evict_at` and
/// its index rows in one transactional batch.
///
/// # Arguments
/// * `cache` - The controller to sweep (cloned, shares state with the caller)
/// * `interval` - Time between sweep runs
///
/// # Returns
/// A JoinHandle for the spawned task, which can be used to abort the task
/// during graceful shutdown.
pub fn spawn_sweep_task(cache: CacheController, interval: Duration) -> JoinHandle<()> {
    tokio::spawn(async move {
        info!(
            interval_ms = interval.as_millis() as u64,
            "Starting eviction sweep task"
        );

        loop {
            tokio::time::sleep(interval).await;

            let removed = cache.sweep_evicted().await;

            if removed > 0 {
                info!("Eviction sweep: removed {} expired entries", removed);
            } else {
                debug!("Eviction sweep: no evictable entries found");
            }
        }
    })
}
