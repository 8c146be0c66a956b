//! # Domain Errors
//!
//! Only `Exhausted`, `Cancelled` and `Closed` ever reach a retrieval
//! caller. Timeouts, lost peers and invalid answers are retried inside.

use thiserror::Error;

/// Peer transport errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum TransportError {
    /// The connection is gone.
    #[error("Peer connection closed")]
    Closed,

    /// The outbound queue of the connection is full.
    #[error("Peer send queue full")]
    QueueFull,
}

/// Errors surfaced by the distributor and the retrieval manager.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum RetrieveError {
    /// Every eligible peer was tried without a valid answer.
    #[error("Request exhausted after trying {tried} peers")]
    Exhausted {
        /// Distinct peers that were tried.
        tried: usize,
    },

    /// Cancelled by the caller or its deadline passed.
    #[error("Request cancelled")]
    Cancelled,

    /// The distributor has shut down.
    #[error("Request distributor closed")]
    Closed,
}
