//! Expiration Sweeper Task
//!
//! Background task that periodically removes expired entries from a store.
//!
//! Shutdown and sweep results travel on separate paths: a oneshot channel
//! stops the loop, while deletion counts accumulate in an atomic counter and
//! are reported through tracing.

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{oneshot, RwLock};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

use crate::cache::Store;

// == Sweeper ==
/// Handle to a running sweep loop.
///
/// Dropping the handle closes the stop channel, which also ends the loop.
#[derive(Debug)]
pub struct Sweeper {
    stop: Option<oneshot::Sender<()>>,
    handle: JoinHandle<()>,
    swept: Arc<AtomicU64>,
}

impl Sweeper {
    /// Total entries removed by this sweeper so far.
    pub fn total_swept(&self) -> u64 {
        self.swept.load(Ordering::Relaxed)
    }

    /// Shared view of the sweep counter.
    pub fn counter(&self) -> Arc<AtomicU64> {
        self.swept.clone()
    }

    pub fn is_finished(&self) -> bool {
        self.handle.is_finished()
    }

    /// Signals the loop to stop and waits for it to exit.
    pub async fn stop(mut self) {
        if let Some(stop) = self.stop.take() {
            let _ = stop.send(());
        }
        if let Err(err) = (&mut self.handle).await {
            warn!("Sweeper task ended abnormally: {}", err);
        }
    }
}

/// Runs one sweep pass, swallowing any panic so the loop keeps going.
pub fn sweep_once(store: &mut Store, batch: usize) -> usize {
    match catch_unwind(AssertUnwindSafe(|| store.sweep(batch, &mut rand::thread_rng()))) {
        Ok(removed) => removed,
        Err(_) => {
            warn!("Sweep pass failed; skipping until next tick");
            0
        }
    }
}

/// Spawns a background task that periodically sweeps expired entries.
///
/// The first pass runs immediately, then once per `interval`, until the
/// returned [`Sweeper`] is stopped or dropped. Must be called from within a
/// tokio runtime.
pub fn spawn_sweeper(store: Arc<RwLock<Store>>, interval: Duration, batch: usize) -> Sweeper {
    let (stop_tx, mut stop_rx) = oneshot::channel::<()>();
    let swept = Arc::new(AtomicU64::new(0));
    let counter = swept.clone();

    let handle = tokio::spawn(async move {
        info!(
            "Starting expiration sweeper with interval of {:?}, batch {}",
            interval, batch
        );

        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = &mut stop_rx => {
                    info!("Expiration sweeper stopped");
                    break;
                }
                _ = ticker.tick() => {
                    let removed = {
                        let mut store = store.write().await;
                        sweep_once(&mut store, batch)
                    };

                    if removed > 0 {
                        counter.fetch_add(removed as u64, Ordering::Relaxed);
                        info!("Sweep: removed {} expired entries", removed);
                    } else {
                        debug!("Sweep: no expired entries found");
                    }
                }
            }
        }
    });

    Sweeper {
        stop: Some(stop_tx),
        handle,
        swept,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_sweeper_removes_expired_entries() {
        let store = Arc::new(RwLock::new(Store::new(0)));
        store
            .write()
            .await
            .set("expire_soon", Duration::from_millis(50), "value".to_string())
            .unwrap();

        let sweeper = spawn_sweeper(store.clone(), Duration::from_millis(100), 10);

        tokio::time::sleep(Duration::from_millis(350)).await;

        assert_eq!(store.read().await.count(), 0, "Expired entry should have been swept");
        assert_eq!(sweeper.total_swept(), 1);

        sweeper.stop().await;
    }

    #[tokio::test]
    async fn test_sweeper_preserves_valid_entries() {
        let store = Arc::new(RwLock::new(Store::new(0)));
        store
            .write()
            .await
            .set("long_lived", Duration::from_secs(3600), "value".to_string())
            .unwrap();

        let sweeper = spawn_sweeper(store.clone(), Duration::from_millis(50), 10);

        tokio::time::sleep(Duration::from_millis(200)).await;

        assert!(store.write().await.exists("long_lived"), "Valid entry should not be removed");
        assert_eq!(sweeper.total_swept(), 0);

        sweeper.stop().await;
    }

    #[tokio::test]
    async fn test_sweeper_stops_promptly() {
        let store = Arc::new(RwLock::new(Store::new(0)));
        let sweeper = spawn_sweeper(store, Duration::from_secs(3600), 10);

        tokio::time::timeout(Duration::from_secs(1), sweeper.stop())
            .await
            .expect("stop should not wait for the next tick");
    }

    #[tokio::test]
    async fn test_sweeper_ends_when_dropped() {
        let store = Arc::new(RwLock::new(Store::new(0)));
        let sweeper = spawn_sweeper(store.clone(), Duration::from_secs(3600), 10);

        drop(sweeper);
        tokio::time::sleep(Duration::from_millis(100)).await;

        // The loop held the only other reference to the store.
        assert_eq!(Arc::strong_count(&store), 1);
    }

    #[test]
    fn test_sweep_once_counts_removals() {
        let mut store = Store::new(0);
        store.set("a", Duration::from_millis(10), 1u8).unwrap();
        std::thread::sleep(Duration::from_millis(30));

        assert_eq!(sweep_once(&mut store, 10), 1);
        assert_eq!(sweep_once(&mut store, 10), 0);
    }
}
