//! # Indexer Errors

use shared_types::KVStoreError;
use thiserror::Error;

/// Errors raised by indexers, the header chain and the pruner.
///
/// An error halts the indexer that raised it; no section is ever skipped.
#[derive(Debug, Error)]
pub enum IndexerError {
    #[error("Storage error: {0}")]
    Storage(#[from] KVStoreError),

    #[error("Encoding error: {0}")]
    Encoding(String),

    #[error("Header {0} is not available")]
    MissingHeader(u64),

    #[error("Header {number} does not link to its predecessor")]
    BrokenLink { number: u64 },

    #[error("Parent of header {0} is unknown")]
    UnknownParent(u64),

    #[error("Chain reorganised while processing section {0}")]
    Reorged(u64),

    #[error("Section {section} cannot be committed, next expected is {expected}")]
    OutOfOrder { section: u64, expected: u64 },

    #[error("Corrupt section data: {0}")]
    Corrupt(String),

    #[error("Invalid configuration: {0}")]
    Config(String),
}

impl From<bincode::Error> for IndexerError {
    fn from(e: bincode::Error) -> Self {
        IndexerError::Encoding(e.to_string())
    }
}
