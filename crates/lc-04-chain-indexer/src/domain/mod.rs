//! # Domain Layer

pub mod errors;
pub mod events;
pub mod keys;

pub use errors::IndexerError;
pub use events::{ChainEvent, ChainEventBus};

/// Processing state of one indexer.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum IndexerStatus {
    Idle,
    Processing { section: u64 },
    /// The last attempt at `section` failed; retried on the next head.
    Halted { section: u64, error: String },
}
