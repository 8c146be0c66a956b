//! # Indexer Backends
//!
//! A backend turns the headers of one section into a [`SectionCommit`].
//! The indexer owns ordering, confirmations, linkage and persistence.

pub mod bloom_bits;
pub mod bloom_trie;
pub mod cht;

pub use bloom_bits::{bloom_bit_key, vector_bit, BloomBitsBackend, BLOOM_BITS_INDEXER};
pub use bloom_trie::{BloomTrieBackend, BLOOM_TRIE_INDEXER};
pub use cht::{cht_key, cht_value, decode_cht_value, ChtBackend, CHT_INDEXER};

use shared_types::BlockHeader;

use crate::domain::IndexerError;
use crate::service::{SectionCommit, SectionStore};

/// Per-section processing hooks.
pub trait IndexerBackend: Send {
    /// Start `section` from scratch. `store` holds this indexer's commits.
    fn reset(&mut self, section: u64, store: &SectionStore) -> Result<(), IndexerError>;

    /// Feed the next header of the section.
    fn process(&mut self, header: &BlockHeader) -> Result<(), IndexerError>;

    /// Finish the section.
    fn commit(&mut self, section: u64) -> Result<SectionCommit, IndexerError>;
}
