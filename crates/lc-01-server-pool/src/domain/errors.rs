//! # Domain Errors
//!
//! Error types for capacity negotiation and the server pool.
//!
//! Negotiation never surfaces these to its caller: a failed query resolves
//! to `Unsupported`. They exist for the datagram port and for logging.

use shared_types::KVStoreError;
use thiserror::Error;

/// Errors raised while sending or decoding a capacity query.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum NegotiationError {
    /// The datagram channel refused the packet.
    #[error("Datagram transport error: {0}")]
    Transport(String),

    /// Request or reply could not be (de)serialized.
    #[error("Wire encoding error: {0}")]
    Encoding(String),
}

/// Server pool errors.
#[derive(Debug, Error)]
pub enum ServerPoolError {
    /// Candidate persistence failed.
    #[error("Candidate storage error: {0}")]
    Storage(#[from] KVStoreError),

    /// A persisted candidate could not be (de)serialized.
    #[error("Candidate encoding error: {0}")]
    Encoding(String),

    /// `start()` was called twice.
    #[error("Server pool already started")]
    AlreadyStarted,

    /// The pool has been stopped.
    #[error("Server pool stopped")]
    Stopped,
}

impl From<bincode::Error> for ServerPoolError {
    fn from(err: bincode::Error) -> Self {
        ServerPoolError::Encoding(err.to_string())
    }
}

impl From<bincode::Error> for NegotiationError {
    fn from(err: bincode::Error) -> Self {
        NegotiationError::Encoding(err.to_string())
    }
}
