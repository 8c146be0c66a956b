//! Bloom trie: per section, bloom bit -> committed bloom-bits vector.
//!
//! Child of the bloom-bits indexer with the same section size; section N
//! reads bloom-bits section N, which must be committed first.

use shared_types::{BlockHeader, MerkleMap, BLOOM_BITS};

use super::bloom_bits::bloom_bit_key;
use super::IndexerBackend;
use crate::domain::IndexerError;
use crate::service::{SectionCommit, SectionStore};

pub const BLOOM_TRIE_INDEXER: &str = "bloomtrie";

pub struct BloomTrieBackend {
    bloom_bits: SectionStore,
}

impl BloomTrieBackend {
    /// `bloom_bits` is the store of the upstream bloom-bits indexer.
    pub fn new(bloom_bits: SectionStore) -> Self {
        Self { bloom_bits }
    }
}

impl IndexerBackend for BloomTrieBackend {
    fn reset(&mut self, _section: u64, _store: &SectionStore) -> Result<(), IndexerError> {
        Ok(())
    }

    fn process(&mut self, _header: &BlockHeader) -> Result<(), IndexerError> {
        Ok(())
    }

    fn commit(&mut self, section: u64) -> Result<SectionCommit, IndexerError> {
        let mut map = MerkleMap::new();
        for bit in 0..BLOOM_BITS as u16 {
            let key = bloom_bit_key(bit);
            let vector = self.bloom_bits.data(section, &key)?.ok_or_else(|| {
                IndexerError::Corrupt(format!(
                    "bloom bits section {} has no vector for bit {}",
                    section, bit
                ))
            })?;
            map.insert(key.to_vec(), vector);
        }
        Ok(SectionCommit {
            root: map.root(),
            data: Vec::new(),
            meta: None,
        })
    }
}
