//! Lock-free server pool metrics.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

/// Gauges and counters updated by the pool.
///
/// Float gauges are stored as `f64` bit patterns.
#[derive(Debug, Default)]
pub struct PoolMetrics {
    suggested_timeout_ms: AtomicU64,
    total_value: AtomicU64,
    selectable: AtomicU64,
    connected: AtomicU64,
    dialed: AtomicU64,
    session_value: AtomicU64,
}

/// Point-in-time copy of [`PoolMetrics`].
#[derive(Clone, Debug, Default, PartialEq)]
pub struct PoolMetricsSnapshot {
    pub suggested_timeout: Duration,
    pub total_value: f64,
    pub selectable: u64,
    pub connected: u64,
    pub dialed: u64,
    pub session_value: f64,
}

impl PoolMetrics {
    pub fn set_suggested_timeout(&self, timeout: Duration) {
        self.suggested_timeout_ms
            .store(timeout.as_millis() as u64, Ordering::Relaxed);
    }

    pub fn set_total_value(&self, value: f64) {
        self.total_value.store(value.to_bits(), Ordering::Relaxed);
    }

    pub fn set_selectable(&self, count: u64) {
        self.selectable.store(count, Ordering::Relaxed);
    }

    pub fn set_connected(&self, count: u64) {
        self.connected.store(count, Ordering::Relaxed);
    }

    pub fn inc_dialed(&self) {
        self.dialed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn add_session_value(&self, value: f64) {
        let _ = self
            .session_value
            .fetch_update(Ordering::Relaxed, Ordering::Relaxed, |bits| {
                Some((f64::from_bits(bits) + value).to_bits())
            });
    }

    pub fn snapshot(&self) -> PoolMetricsSnapshot {
        PoolMetricsSnapshot {
            suggested_timeout: Duration::from_millis(
                self.suggested_timeout_ms.load(Ordering::Relaxed),
            ),
            total_value: f64::from_bits(self.total_value.load(Ordering::Relaxed)),
            selectable: self.selectable.load(Ordering::Relaxed),
            connected: self.connected.load(Ordering::Relaxed),
            dialed: self.dialed.load(Ordering::Relaxed),
            session_value: f64::from_bits(self.session_value.load(Ordering::Relaxed)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_session_value_accumulates() {
        let metrics = PoolMetrics::default();
        metrics.add_session_value(1.5);
        metrics.add_session_value(2.0);
        metrics.inc_dialed();
        let snap = metrics.snapshot();
        assert_eq!(snap.session_value, 3.5);
        assert_eq!(snap.dialed, 1);
    }
}
