//! Canonical hash trie: per section, block number -> (hash, total difficulty).

use shared_types::{BlockHeader, Hash, MerkleMap};

use super::IndexerBackend;
use crate::domain::keys::decode_u64;
use crate::domain::IndexerError;
use crate::service::{SectionCommit, SectionStore};

pub const CHT_INDEXER: &str = "cht";

/// Map key of block `number`.
pub fn cht_key(number: u64) -> [u8; 8] {
    number.to_be_bytes()
}

/// Map value: header hash followed by the total difficulty (u64 BE).
pub fn cht_value(hash: &Hash, total_difficulty: u64) -> Vec<u8> {
    let mut value = Vec::with_capacity(40);
    value.extend_from_slice(hash);
    value.extend_from_slice(&total_difficulty.to_be_bytes());
    value
}

pub fn decode_cht_value(value: &[u8]) -> Option<(Hash, u64)> {
    if value.len() != 40 {
        return None;
    }
    let hash: Hash = value[..32].try_into().ok()?;
    Some((hash, decode_u64(&value[32..])?))
}

/// Builds one CHT per section. Section metadata is the total difficulty
/// at the section's last block.
#[derive(Default)]
pub struct ChtBackend {
    map: MerkleMap,
    total_difficulty: u64,
}

impl ChtBackend {
    pub fn new() -> Self {
        Self::default()
    }
}

impl IndexerBackend for ChtBackend {
    fn reset(&mut self, section: u64, store: &SectionStore) -> Result<(), IndexerError> {
        self.map = MerkleMap::new();
        self.total_difficulty = if section == 0 {
            0
        } else {
            let meta = store.meta(section - 1)?.ok_or_else(|| {
                IndexerError::Corrupt(format!("missing total difficulty of section {}", section - 1))
            })?;
            decode_u64(&meta)
                .ok_or_else(|| IndexerError::Corrupt("malformed total difficulty".into()))?
        };
        Ok(())
    }

    fn process(&mut self, header: &BlockHeader) -> Result<(), IndexerError> {
        self.total_difficulty = self.total_difficulty.saturating_add(header.difficulty);
        self.map.insert(
            cht_key(header.number),
            cht_value(&header.hash(), self.total_difficulty),
        );
        Ok(())
    }

    fn commit(&mut self, _section: u64) -> Result<SectionCommit, IndexerError> {
        let map = std::mem::take(&mut self.map);
        Ok(SectionCommit {
            root: map.root(),
            data: map.iter().map(|(k, v)| (k.clone(), v.clone())).collect(),
            meta: Some(self.total_difficulty.to_be_bytes().to_vec()),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use shared_types::{verify_keyed_proof, InMemoryKVStore};
    use std::sync::Arc;

    fn header(number: u64) -> BlockHeader {
        BlockHeader {
            number,
            difficulty: 10,
            ..Default::default()
        }
    }

    #[test]
    fn test_cht_value_roundtrip() {
        let value = cht_value(&[7; 32], 1234);
        assert_eq!(decode_cht_value(&value), Some(([7; 32], 1234)));
        assert_eq!(decode_cht_value(&value[..39]), None);
    }

    #[test]
    fn test_commit_proves_every_block() {
        let store = SectionStore::new(CHT_INDEXER, Arc::new(InMemoryKVStore::new()));
        let mut backend = ChtBackend::new();
        backend.reset(0, &store).unwrap();
        for n in 0..8 {
            backend.process(&header(n)).unwrap();
        }
        let commit = backend.commit(0).unwrap();
        assert_eq!(commit.data.len(), 8);
        assert_eq!(commit.meta, Some(80u64.to_be_bytes().to_vec()));

        // Rebuild the map to prove block 5 against the committed root.
        let mut map = MerkleMap::new();
        for (k, v) in &commit.data {
            map.insert(k.clone(), v.clone());
        }
        let proof = map.prove(&cht_key(5)).unwrap();
        assert!(verify_keyed_proof(&commit.root, &cht_key(5), &proof));
        assert_eq!(decode_cht_value(&proof.value), Some((header(5).hash(), 60)));
    }

    #[test]
    fn test_total_difficulty_carries_across_sections() {
        let store = SectionStore::new(CHT_INDEXER, Arc::new(InMemoryKVStore::new()));
        let mut backend = ChtBackend::new();
        backend.reset(0, &store).unwrap();
        for n in 0..8 {
            backend.process(&header(n)).unwrap();
        }
        store.commit_section(0, backend.commit(0).unwrap()).unwrap();

        backend.reset(1, &store).unwrap();
        backend.process(&header(8)).unwrap();
        let (_, td) = decode_cht_value(backend.map.get(&cht_key(8)).unwrap()).unwrap();
        assert_eq!(td, 90);
    }
}
