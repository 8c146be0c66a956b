//! # LC-02 Request Distribution
//!
//! Routes on-demand requests to connected light servers.
//!
//! ## Purpose
//!
//! - **Peer registry**: the connected servers, their protocol version and
//!   capacity, ordered by the value the server pool assigns them.
//! - **Distributor**: assigns queued requests to peers with spare
//!   capacity, enforces per-assignment deadlines and fails work over when
//!   a peer times out or disconnects.
//! - **Retrieval manager**: validates each answer and retries on other
//!   peers until one answer passes or every eligible peer was tried.
//!
//! ## Module Structure
//!
//! ```text
//! lc-02-request-distribution/
//! ├── domain/      # ServerPeer, request states, errors
//! ├── ports/       # PeerTransport, PeerSetListener
//! ├── service/     # PeerRegistry, Distributor, RetrieveManager
//! ├── adapters/    # Channel transport + scripted responder (feature: test-utils)
//! └── config.rs    # DistributorConfig
//! ```

pub mod config;
pub mod domain;
pub mod ports;
pub mod service;

#[cfg(any(test, feature = "test-utils"))]
pub mod adapters;

pub use config::{ConfigError, DistributorConfig, TimeoutMultipliers, MAX_TIMEOUT_MULTIPLIER};
pub use domain::{
    DistributionEvent, PeerState, RequestId, RequestState, RetrieveError, ServerPeer,
    TransportError,
};
pub use ports::{PeerSetListener, PeerTransport};
pub use service::{
    Distributor, DistributorMetricsSnapshot, PeerRegistry, RequestTicket, RetrieveManager,
};
