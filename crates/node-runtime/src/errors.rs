//! # Runtime Errors

use lc_01_server_pool::ServerPoolError;
use lc_04_chain_indexer::IndexerError;
use lc_03_odr::OdrError;
use shared_types::{KVStoreError, NodeId};
use thiserror::Error;

use crate::container::ConfigError;

/// Errors raised while wiring, starting or stopping the light client.
#[derive(Debug, Error)]
pub enum LightClientError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Storage error: {0}")]
    Storage(#[from] KVStoreError),

    #[error("Server pool error: {0}")]
    Pool(#[from] ServerPoolError),

    #[error("Indexer error: {0}")]
    Indexer(#[from] IndexerError),

    #[error("Retrieval error: {0}")]
    Odr(#[from] OdrError),

    #[error("Encoding error: {0}")]
    Encoding(String),

    #[error("Peer limit of {max} reached, refusing {peer}")]
    TooManyPeers { peer: NodeId, max: usize },

    #[error("Peer {peer} speaks unsupported protocol version {version}")]
    UnsupportedProtocol { peer: NodeId, version: u32 },

    #[error("Light client already started")]
    AlreadyStarted,

    #[error("Light client stopped")]
    Stopped,
}

impl From<bincode::Error> for LightClientError {
    fn from(e: bincode::Error) -> Self {
        LightClientError::Encoding(e.to_string())
    }
}
