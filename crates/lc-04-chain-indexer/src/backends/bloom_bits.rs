//! Rotated bloom filters: per section and bloom bit, one vector with a bit
//! per block saying whether that block's bloom has the bit set.
//!
//! Vector bit `i` is block `section_start + i`, most significant bit first.

use shared_types::{BlockHeader, BLOOM_BITS};

use super::IndexerBackend;
use crate::domain::IndexerError;
use crate::service::{SectionCommit, SectionStore};

pub const BLOOM_BITS_INDEXER: &str = "bloombits";

/// Data suffix of bloom bit `bit`.
pub fn bloom_bit_key(bit: u16) -> [u8; 2] {
    bit.to_be_bytes()
}

/// Read bit `offset` of a section vector.
pub fn vector_bit(vector: &[u8], offset: usize) -> bool {
    vector
        .get(offset / 8)
        .map(|byte| byte & (0x80 >> (offset % 8)) != 0)
        .unwrap_or(false)
}

/// Rotates header blooms of one section into per-bit vectors.
///
/// The section root is the hash of its last header.
pub struct BloomBitsBackend {
    section_size: u64,
    section_start: u64,
    vectors: Vec<Vec<u8>>,
    section_head: Option<shared_types::Hash>,
}

impl BloomBitsBackend {
    pub fn new(section_size: u64) -> Self {
        Self {
            section_size,
            section_start: 0,
            vectors: Vec::new(),
            section_head: None,
        }
    }
}

impl IndexerBackend for BloomBitsBackend {
    fn reset(&mut self, section: u64, _store: &SectionStore) -> Result<(), IndexerError> {
        let bytes = (self.section_size / 8) as usize;
        self.section_start = section * self.section_size;
        self.vectors = vec![vec![0u8; bytes]; BLOOM_BITS];
        self.section_head = None;
        Ok(())
    }

    fn process(&mut self, header: &BlockHeader) -> Result<(), IndexerError> {
        let offset = header
            .number
            .checked_sub(self.section_start)
            .filter(|o| *o < self.section_size)
            .ok_or(IndexerError::MissingHeader(header.number))? as usize;

        for bit in 0..BLOOM_BITS {
            if header.bloom.bit(bit) {
                self.vectors[bit][offset / 8] |= 0x80 >> (offset % 8);
            }
        }
        self.section_head = Some(header.hash());
        Ok(())
    }

    fn commit(&mut self, section: u64) -> Result<SectionCommit, IndexerError> {
        let root = self
            .section_head
            .take()
            .ok_or_else(|| IndexerError::Corrupt(format!("bloom bits section {} is empty", section)))?;
        let data = std::mem::take(&mut self.vectors)
            .into_iter()
            .enumerate()
            .map(|(bit, vector)| (bloom_bit_key(bit as u16).to_vec(), vector))
            .collect();
        Ok(SectionCommit {
            root,
            data,
            meta: None,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use shared_types::{Bloom, InMemoryKVStore};
    use std::sync::Arc;

    #[test]
    fn test_rotation_sets_the_right_offsets() {
        let store = SectionStore::new(BLOOM_BITS_INDEXER, Arc::new(InMemoryKVStore::new()));
        let mut backend = BloomBitsBackend::new(8);
        backend.reset(1, &store).unwrap();

        for number in 8..16 {
            let mut bloom = Bloom::default();
            if number == 10 || number == 15 {
                bloom.set_bit(42);
            }
            let header = BlockHeader {
                number,
                bloom,
                ..Default::default()
            };
            backend.process(&header).unwrap();
        }

        let commit = backend.commit(1).unwrap();
        assert_eq!(commit.data.len(), BLOOM_BITS);
        let (key, vector) = &commit.data[42];
        assert_eq!(key, &bloom_bit_key(42).to_vec());
        assert_eq!(vector, &vec![0b0010_0001]);
        assert!(vector_bit(vector, 2));
        assert!(!vector_bit(vector, 3));
        assert!(commit.data[41].1.iter().all(|b| *b == 0));
    }

    #[test]
    fn test_header_outside_section_is_rejected() {
        let store = SectionStore::new(BLOOM_BITS_INDEXER, Arc::new(InMemoryKVStore::new()));
        let mut backend = BloomBitsBackend::new(8);
        backend.reset(1, &store).unwrap();
        let header = BlockHeader {
            number: 3,
            ..Default::default()
        };
        assert!(backend.process(&header).is_err());
    }
}
