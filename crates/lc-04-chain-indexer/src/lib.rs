//! # LC-04 Chain Indexer
//!
//! Builds the auxiliary structures the light client verifies against.
//!
//! ## Purpose
//!
//! - **Chain indexers**: headers are processed in order into fixed-size
//!   sections; each committed section gets a root. Backends: canonical
//!   hash trie (CHT), bloom bits and the bloom trie (child of bloom bits).
//! - **Header chain + events**: canonical headers imported by the client
//!   and the `ChainEvent::{Head, Reorg}` bus the indexers follow.
//! - **Pruner**: deletes superseded section data, skipping sections a
//!   live retrieval still verifies against.
//!
//! ## Module Structure
//!
//! ```text
//! lc-04-chain-indexer/
//! ├── domain/      # ChainEvent, key layout, errors, status
//! ├── ports/       # HeaderSource, SectionProgress, LiveRootCheck
//! ├── backends/    # CHT, bloom bits, bloom trie
//! ├── service/     # ChainIndexer, SectionStore, HeaderChain, Pruner
//! ├── adapters/    # In-memory header chains (feature: test-utils)
//! └── config.rs    # IndexerConfig, PrunerConfig
//! ```

pub mod backends;
pub mod config;
pub mod domain;
pub mod ports;
pub mod service;

#[cfg(any(test, feature = "test-utils"))]
pub mod adapters;

pub use backends::{
    bloom_bit_key, cht_key, cht_value, decode_cht_value, vector_bit, BloomBitsBackend,
    BloomTrieBackend, ChtBackend, IndexerBackend, BLOOM_BITS_INDEXER, BLOOM_TRIE_INDEXER,
    CHT_INDEXER,
};
pub use config::{IndexerConfig, PrunerConfig, BLOOM_SECTION_SIZE, CHT_SECTION_SIZE};
pub use domain::{ChainEvent, ChainEventBus, IndexerError, IndexerStatus};
pub use ports::{HeaderSource, LiveRootCheck, NoLiveRoots, SectionProgress};
pub use service::{ChainIndexer, HeaderChain, Pruner, SectionCommit, SectionStore};
