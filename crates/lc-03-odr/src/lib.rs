//! # LC-03 On-Demand Retrieval
//!
//! Fetches chain data the light client does not store and proves it
//! against roots the client already trusts.
//!
//! ## Purpose
//!
//! - **Typed requests**: state trie entries, receipts, CHT-anchored header
//!   ranges, bloom bits and transaction status. Each request carries its
//!   own verifier; a response that fails it is rejected and retried on
//!   another server.
//! - **Local first**: cached receipts and locally indexed bloom bits
//!   answer without the network; verified remote answers are cached.
//! - **Live roots**: section roots a retrieval verifies against are pinned
//!   until it finishes so the pruner leaves them alone.
//! - **Bloom bits service**: a bounded queue of bloom lookups served by a
//!   fixed worker pool.
//!
//! ## Module Structure
//!
//! ```text
//! lc-03-odr/
//! ├── domain/      # OdrRequest + request types, LiveRoots, LocalData, errors
//! ├── service/     # Odr, BloomBitsService, metrics
//! ├── adapters/    # Fake light server (feature: test-utils)
//! └── config.rs    # OdrConfig
//! ```

pub mod config;
pub mod domain;
pub mod service;

#[cfg(any(test, feature = "test-utils"))]
pub mod adapters;

pub use config::OdrConfig;
pub use domain::{
    BloomRequest, HeaderRangeRequest, LiveRoots, LocalData, OdrError, OdrRequest,
    ReceiptsRequest, RootGuard, TrieRequest, TxStatusRequest, VerificationError,
};
pub use service::{BloomBitsService, Odr, OdrMetricsSnapshot};
