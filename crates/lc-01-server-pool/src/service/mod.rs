//! # Service Layer
//!
//! The capacity negotiator and the server pool built on it.

pub mod metrics;
pub mod negotiator;
pub mod pool;

#[cfg(test)]
mod tests;

pub use metrics::{PoolMetrics, PoolMetricsSnapshot};
pub use negotiator::{CapacityNegotiator, NegotiatorStats};
pub use pool::{CandidateSnapshot, DialIterator, ServerPool, POOL_KEY_PREFIX};
