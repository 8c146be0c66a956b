//! # Cross-Subsystem Ports
//!
//! `ServerFeedback` connects the request distributor to the server pool
//! without a crate dependency between them; `TimeSource` keeps wall-clock
//! reads testable.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use crate::entities::NodeId;

/// Outcome of one request served (or not) by a peer.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RequestOutcome {
    /// Valid answer after `response_time`.
    Success { response_time: Duration },
    /// Timeout or invalid answer.
    Failure,
    /// The peer dropped while holding the request.
    Disconnect,
}

/// Scores and timeouts the distributor consults for each peer.
///
/// Implemented by the server pool.
pub trait ServerFeedback: Send + Sync {
    /// Timeout for one request to `peer`.
    fn suggested_timeout(&self, peer: &NodeId) -> Duration;

    /// Relative worth of `peer`; higher is better.
    fn peer_value(&self, peer: &NodeId) -> f64;

    /// Record how `peer` handled a request.
    fn record_outcome(&self, peer: &NodeId, outcome: RequestOutcome);
}

/// Neutral feedback: fixed timeout, every peer equal, outcomes ignored.
#[derive(Clone, Debug)]
pub struct StaticFeedback {
    pub timeout: Duration,
}

impl Default for StaticFeedback {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(5),
        }
    }
}

impl ServerFeedback for StaticFeedback {
    fn suggested_timeout(&self, _peer: &NodeId) -> Duration {
        self.timeout
    }

    fn peer_value(&self, _peer: &NodeId) -> f64 {
        0.0
    }

    fn record_outcome(&self, _peer: &NodeId, _outcome: RequestOutcome) {}
}

/// Abstract interface for time operations (for testability).
pub trait TimeSource: Send + Sync {
    /// Seconds since the Unix epoch.
    fn now(&self) -> u64;
}

/// Wall clock.
#[derive(Default, Clone, Copy, Debug)]
pub struct SystemTimeSource;

impl TimeSource for SystemTimeSource {
    fn now(&self) -> u64 {
        std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .map(|d| d.as_secs())
            .unwrap_or(0)
    }
}

/// Manually advanced clock shared between clones.
#[derive(Default, Clone, Debug)]
pub struct FixedTimeSource {
    now: Arc<AtomicU64>,
}

impl FixedTimeSource {
    pub fn new(now: u64) -> Self {
        Self {
            now: Arc::new(AtomicU64::new(now)),
        }
    }

    pub fn set(&self, now: u64) {
        self.now.store(now, Ordering::SeqCst);
    }

    pub fn advance(&self, secs: u64) {
        self.now.fetch_add(secs, Ordering::SeqCst);
    }
}

impl TimeSource for FixedTimeSource {
    fn now(&self) -> u64 {
        self.now.load(Ordering::SeqCst)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fixed_time_source_shared_between_clones() {
        let clock = FixedTimeSource::new(100);
        let other = clock.clone();
        other.advance(5);
        assert_eq!(clock.now(), 105);
        clock.set(7);
        assert_eq!(other.now(), 7);
    }
}
