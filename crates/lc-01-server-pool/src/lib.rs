//! # LC-01 Server Pool
//!
//! Chooses which light servers are worth connecting to.
//!
//! ## Purpose
//!
//! - **Capacity negotiation**: a cheap datagram query asks a candidate
//!   whether it has a free slot before a full connection is attempted.
//! - **Server pool**: a bounded, persisted table of candidates scored by
//!   latency, decaying earned value and failure penalties; drives dialing
//!   and suggests per-peer request timeouts.
//!
//! ## Module Structure
//!
//! ```text
//! lc-01-server-pool/
//! ├── domain/      # Candidate scoring, negotiation results, wire format
//! ├── ports/       # DatagramChannel, DiscoveryFeed
//! ├── service/     # CapacityNegotiator, ServerPool, metrics
//! ├── adapters/    # Scripted test doubles (feature: test-utils)
//! └── config.rs    # NegotiatorConfig, ServerPoolConfig
//! ```

pub mod config;
pub mod domain;
pub mod ports;
pub mod service;

#[cfg(any(test, feature = "test-utils"))]
pub mod adapters;

pub use config::{NegotiatorConfig, ServerPoolConfig};
pub use domain::{
    Candidate, CandidateRecord, CapabilityRecord, NegotiationError, NegotiationResult,
    ServerPoolError,
};
pub use ports::{DatagramChannel, DiscoveryFeed};
pub use service::{
    CandidateSnapshot, CapacityNegotiator, DialIterator, PoolMetricsSnapshot, ServerPool,
};
