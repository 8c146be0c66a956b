//! Distributor counters.

use std::sync::atomic::{AtomicU64, Ordering};

#[derive(Debug, Default)]
pub struct DistributorMetrics {
    queued: AtomicU64,
    assigned: AtomicU64,
    answered: AtomicU64,
    rejected: AtomicU64,
    timed_out: AtomicU64,
    peer_lost: AtomicU64,
    exhausted: AtomicU64,
    cancelled: AtomicU64,
    late_responses: AtomicU64,
}

/// Point-in-time copy of [`DistributorMetrics`].
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct DistributorMetricsSnapshot {
    pub queued: u64,
    pub assigned: u64,
    pub answered: u64,
    pub rejected: u64,
    pub timed_out: u64,
    pub peer_lost: u64,
    pub exhausted: u64,
    pub cancelled: u64,
    pub late_responses: u64,
}

macro_rules! counter {
    ($inc:ident, $field:ident) => {
        pub fn $inc(&self) {
            self.$field.fetch_add(1, Ordering::Relaxed);
        }
    };
}

impl DistributorMetrics {
    counter!(inc_queued, queued);
    counter!(inc_assigned, assigned);
    counter!(inc_answered, answered);
    counter!(inc_rejected, rejected);
    counter!(inc_timed_out, timed_out);
    counter!(inc_peer_lost, peer_lost);
    counter!(inc_exhausted, exhausted);
    counter!(inc_cancelled, cancelled);
    counter!(inc_late_responses, late_responses);

    pub fn snapshot(&self) -> DistributorMetricsSnapshot {
        DistributorMetricsSnapshot {
            queued: self.queued.load(Ordering::Relaxed),
            assigned: self.assigned.load(Ordering::Relaxed),
            answered: self.answered.load(Ordering::Relaxed),
            rejected: self.rejected.load(Ordering::Relaxed),
            timed_out: self.timed_out.load(Ordering::Relaxed),
            peer_lost: self.peer_lost.load(Ordering::Relaxed),
            exhausted: self.exhausted.load(Ordering::Relaxed),
            cancelled: self.cancelled.load(Ordering::Relaxed),
            late_responses: self.late_responses.load(Ordering::Relaxed),
        }
    }
}
