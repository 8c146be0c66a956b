//! # Shutdown Tracker
//!
//! Each run pushes its start time onto a stored marker list and removes it
//! again on a clean stop. Markers found at startup belong to runs that
//! never stopped cleanly. While running, the newest marker is refreshed so
//! it approximates when the crash happened.

use parking_lot::Mutex;
use shared_types::{KeyValueStore, TimeSource};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::errors::LightClientError;

const MARKERS_KEY: &[u8] = b"runtime:shutdown_markers";

/// Markers kept; older crashes are forgotten.
pub const MAX_MARKERS: usize = 10;

pub struct ShutdownTracker {
    kv: Arc<dyn KeyValueStore>,
    time: Arc<dyn TimeSource>,
    refresh_interval: Duration,
    unclean: Mutex<Vec<u64>>,
}

impl ShutdownTracker {
    pub fn new(
        kv: Arc<dyn KeyValueStore>,
        time: Arc<dyn TimeSource>,
        refresh_interval: Duration,
    ) -> Self {
        Self {
            kv,
            time,
            refresh_interval,
            unclean: Mutex::new(Vec::new()),
        }
    }

    /// Report previous unclean shutdowns and push this run's marker.
    pub fn mark_startup(&self) -> Result<Vec<u64>, LightClientError> {
        let mut markers = self.markers()?;
        for timestamp in &markers {
            warn!(timestamp, "[runtime] Unclean shutdown detected");
        }
        *self.unclean.lock() = markers.clone();
        let unclean = markers.clone();

        markers.push(self.time.now());
        if markers.len() > MAX_MARKERS {
            let excess = markers.len() - MAX_MARKERS;
            markers.drain(..excess);
        }
        self.store(&markers)?;
        Ok(unclean)
    }

    /// Unclean shutdowns found by [`ShutdownTracker::mark_startup`].
    pub fn unclean_shutdowns(&self) -> Vec<u64> {
        self.unclean.lock().clone()
    }

    /// Refresh this run's marker every interval until `shutdown`.
    pub async fn run(self: Arc<Self>, shutdown: CancellationToken) {
        let mut ticker = tokio::time::interval(self.refresh_interval);
        ticker.tick().await;
        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = ticker.tick() => {
                    if let Err(e) = self.refresh() {
                        warn!("[runtime] Failed to refresh shutdown marker: {}", e);
                    }
                }
            }
        }
    }

    /// Remove this run's marker.
    pub fn mark_clean(&self) -> Result<(), LightClientError> {
        let mut markers = self.markers()?;
        if markers.pop().is_some() {
            self.store(&markers)?;
        }
        info!("[runtime] Shutdown marker cleared");
        Ok(())
    }

    fn refresh(&self) -> Result<(), LightClientError> {
        let mut markers = self.markers()?;
        let Some(latest) = markers.last_mut() else {
            return Ok(());
        };
        *latest = self.time.now();
        debug!(timestamp = *latest, "[runtime] Shutdown marker refreshed");
        self.store(&markers)
    }

    fn markers(&self) -> Result<Vec<u64>, LightClientError> {
        match self.kv.get(MARKERS_KEY)? {
            None => Ok(Vec::new()),
            Some(bytes) => Ok(bincode::deserialize(&bytes)?),
        }
    }

    fn store(&self, markers: &[u64]) -> Result<(), LightClientError> {
        self.kv.put(MARKERS_KEY, &bincode::serialize(markers)?)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use shared_types::{FixedTimeSource, InMemoryKVStore};

    fn tracker(kv: &Arc<InMemoryKVStore>, time: &FixedTimeSource) -> Arc<ShutdownTracker> {
        Arc::new(ShutdownTracker::new(
            kv.clone(),
            Arc::new(time.clone()),
            Duration::from_secs(60),
        ))
    }

    #[test]
    fn test_clean_stop_leaves_no_marker() {
        let kv = Arc::new(InMemoryKVStore::new());
        let time = FixedTimeSource::new(1_000);

        let first = tracker(&kv, &time);
        assert!(first.mark_startup().unwrap().is_empty());
        first.mark_clean().unwrap();

        let second = tracker(&kv, &time);
        assert!(second.mark_startup().unwrap().is_empty());
    }

    #[test]
    fn test_crash_reported_on_next_start() {
        let kv = Arc::new(InMemoryKVStore::new());
        let time = FixedTimeSource::new(1_000);

        tracker(&kv, &time).mark_startup().unwrap();

        time.set(2_000);
        let second = tracker(&kv, &time);
        assert_eq!(second.mark_startup().unwrap(), vec![1_000]);
        assert_eq!(second.unclean_shutdowns(), vec![1_000]);

        // The older crash stays recorded after this run stops cleanly
        second.mark_clean().unwrap();
        let third = tracker(&kv, &time);
        assert_eq!(third.mark_startup().unwrap(), vec![1_000]);
    }

    #[test]
    fn test_marker_list_is_bounded() {
        let kv = Arc::new(InMemoryKVStore::new());
        let time = FixedTimeSource::new(0);
        for run in 0..(MAX_MARKERS as u64 + 5) {
            time.set(run);
            tracker(&kv, &time).mark_startup().unwrap();
        }
        let unclean = tracker(&kv, &time).mark_startup().unwrap();
        assert_eq!(unclean.len(), MAX_MARKERS);
        assert_eq!(unclean.last(), Some(&(MAX_MARKERS as u64 + 4)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_run_refreshes_latest_marker() {
        let kv = Arc::new(InMemoryKVStore::new());
        let time = FixedTimeSource::new(1_000);
        let running = tracker(&kv, &time);
        running.mark_startup().unwrap();

        let shutdown = CancellationToken::new();
        let task = tokio::spawn(running.clone().run(shutdown.clone()));

        time.set(1_500);
        tokio::time::sleep(Duration::from_secs(61)).await;
        shutdown.cancel();
        task.await.unwrap();

        // Crash without mark_clean: the refreshed time is what is reported
        assert_eq!(tracker(&kv, &time).mark_startup().unwrap(), vec![1_500]);
    }
}
