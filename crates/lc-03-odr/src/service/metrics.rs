//! ODR counters.

use std::sync::atomic::{AtomicU64, Ordering};

#[derive(Debug, Default)]
pub struct OdrMetrics {
    local_hits: AtomicU64,
    remote_answers: AtomicU64,
    failures: AtomicU64,
    cache_write_errors: AtomicU64,
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct OdrMetricsSnapshot {
    /// Answered from local data without a network request.
    pub local_hits: u64,
    /// Verified answers from servers.
    pub remote_answers: u64,
    pub failures: u64,
    pub cache_write_errors: u64,
}

impl OdrMetrics {
    pub fn inc_local_hits(&self) {
        self.local_hits.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_remote_answers(&self) {
        self.remote_answers.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_failures(&self) {
        self.failures.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_cache_write_errors(&self) {
        self.cache_write_errors.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> OdrMetricsSnapshot {
        OdrMetricsSnapshot {
            local_hits: self.local_hits.load(Ordering::Relaxed),
            remote_answers: self.remote_answers.load(Ordering::Relaxed),
            failures: self.failures.load(Ordering::Relaxed),
            cache_write_errors: self.cache_write_errors.load(Ordering::Relaxed),
        }
    }
}
