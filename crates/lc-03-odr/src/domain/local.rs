//! Local data consulted before going to the network.
//!
//! ```text
//! odr:receipts:<block hash>        -> bincode Vec<Receipt>
//! odr:bloom:<bit BE><section BE>   -> verified remote bloom vector
//! ```

use lc_04_chain_indexer::{bloom_bit_key, SectionStore};
use shared_types::{Hash, KeyValueStore, Receipt};
use std::sync::Arc;

use super::errors::OdrError;

fn receipts_key(block_hash: &Hash) -> Vec<u8> {
    let mut key = b"odr:receipts:".to_vec();
    key.extend_from_slice(block_hash);
    key
}

fn bloom_key(bit: u16, section: u64) -> Vec<u8> {
    let mut key = b"odr:bloom:".to_vec();
    key.extend_from_slice(&bit.to_be_bytes());
    key.extend_from_slice(&section.to_be_bytes());
    key
}

/// Cached results plus the locally indexed bloom bits.
#[derive(Clone)]
pub struct LocalData {
    kv: Arc<dyn KeyValueStore>,
    bloom_bits: SectionStore,
}

impl LocalData {
    pub fn new(kv: Arc<dyn KeyValueStore>, bloom_bits: SectionStore) -> Self {
        Self { kv, bloom_bits }
    }

    pub fn receipts(&self, block_hash: &Hash) -> Result<Option<Vec<Receipt>>, OdrError> {
        match self.kv.get(&receipts_key(block_hash))? {
            None => Ok(None),
            Some(bytes) => Ok(Some(bincode::deserialize(&bytes)?)),
        }
    }

    pub fn store_receipts(&self, block_hash: &Hash, receipts: &[Receipt]) -> Result<(), OdrError> {
        self.kv
            .put(&receipts_key(block_hash), &bincode::serialize(receipts)?)?;
        Ok(())
    }

    /// Bloom vector from the local index, else from the cache.
    pub fn bloom_vector(&self, bit: u16, section: u64) -> Result<Option<Vec<u8>>, OdrError> {
        if let Some(vector) = self.bloom_bits.data(section, &bloom_bit_key(bit))? {
            return Ok(Some(vector));
        }
        Ok(self.kv.get(&bloom_key(bit, section))?)
    }

    pub fn store_bloom_vector(&self, bit: u16, section: u64, vector: &[u8]) -> Result<(), OdrError> {
        self.kv.put(&bloom_key(bit, section), vector)?;
        Ok(())
    }
}
