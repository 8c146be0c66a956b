//! # ODR Errors

use lc_02_request_distribution::RetrieveError;
use lc_04_chain_indexer::IndexerError;
use shared_types::KVStoreError;
use thiserror::Error;

/// Why a response failed verification. Never surfaced to callers; the
/// peer is scored down and the request retried elsewhere.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum VerificationError {
    #[error("Unexpected {0} message")]
    Unexpected(&'static str),

    #[error("Expected {expected} items, got {got}")]
    CountMismatch { expected: usize, got: usize },

    #[error("Proof {index} does not verify")]
    InvalidProof { index: usize },

    #[error("Block {index} has {expected} transactions, got {got} receipts")]
    ReceiptCount {
        index: usize,
        expected: u64,
        got: usize,
    },

    #[error("Receipts {index} do not match the receipts root")]
    ReceiptsRootMismatch { index: usize },

    #[error("Header {number} breaks the requested range")]
    BrokenRange { number: u64 },

    #[error("Bloom vector {index} has {got} bytes, expected {expected}")]
    VectorLength {
        index: usize,
        expected: usize,
        got: usize,
    },

    #[error("Inclusion of transaction {index} does not verify")]
    InvalidInclusion { index: usize },
}

/// Errors surfaced by the ODR layer.
#[derive(Debug, Error)]
pub enum OdrError {
    #[error("Retrieval failed: {0}")]
    Retrieve(#[from] RetrieveError),

    #[error("Section {section} of the {index} index is not committed")]
    UnknownSection { index: &'static str, section: u64 },

    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    #[error("Indexer error: {0}")]
    Indexer(#[from] IndexerError),

    #[error("Storage error: {0}")]
    Storage(#[from] KVStoreError),

    #[error("Encoding error: {0}")]
    Encoding(String),

    #[error("Bloom bits service stopped")]
    ServiceStopped,
}

impl From<bincode::Error> for OdrError {
    fn from(e: bincode::Error) -> Self {
        OdrError::Encoding(e.to_string())
    }
}
