//! # Core Chain Entities
//!
//! The minimal chain data a light client handles: headers, log blooms,
//! receipts and transaction lookups.
//!
//! Every entity has a deterministic byte encoding (`encode`) used for
//! hashing. Hashes are Keccak-256.

use serde::{Deserialize, Serialize};
use serde_big_array::BigArray;
use sha3::{Digest, Keccak256};
use std::fmt;

/// A 32-byte Keccak-256 hash.
pub type Hash = [u8; 32];

/// The all-zero hash.
pub const ZERO_HASH: Hash = [0u8; 32];

/// Size of a log bloom in bytes (2048 bits).
pub const BLOOM_BYTES: usize = 256;

/// Number of bits in a log bloom.
pub const BLOOM_BITS: usize = BLOOM_BYTES * 8;

/// Keccak-256 of `data`.
pub fn keccak256(data: &[u8]) -> Hash {
    let mut hasher = Keccak256::new();
    hasher.update(data);
    hasher.finalize().into()
}

/// Stable identifier of a remote node.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, Default)]
pub struct NodeId(pub [u8; 32]);

impl NodeId {
    /// Build an id from its raw bytes.
    pub const fn new(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }

    /// Raw bytes of the id.
    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", hex::encode(&self.0[..8]))
    }
}

impl fmt::Debug for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "NodeId({})", hex::encode(&self.0[..8]))
    }
}

/// 2048-bit log bloom carried by every header and receipt.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Bloom(#[serde(with = "BigArray")] pub [u8; BLOOM_BYTES]);

impl Default for Bloom {
    fn default() -> Self {
        Self([0u8; BLOOM_BYTES])
    }
}

impl fmt::Debug for Bloom {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Bloom({} bits set)", self.count_ones())
    }
}

impl Bloom {
    /// The three bit positions `data` maps to.
    ///
    /// Each position is 11 bits taken from consecutive byte pairs of the
    /// Keccak-256 digest.
    pub fn positions(data: &[u8]) -> [usize; 3] {
        let digest = keccak256(data);
        let mut out = [0usize; 3];
        for (i, slot) in out.iter_mut().enumerate() {
            let hi = digest[2 * i] as usize;
            let lo = digest[2 * i + 1] as usize;
            *slot = ((hi << 8) | lo) % BLOOM_BITS;
        }
        out
    }

    /// Add `data` to the bloom.
    pub fn accrue(&mut self, data: &[u8]) {
        for pos in Self::positions(data) {
            self.set_bit(pos);
        }
    }

    /// True if `data` may have been added.
    pub fn contains(&self, data: &[u8]) -> bool {
        Self::positions(data).iter().all(|&pos| self.bit(pos))
    }

    /// Value of bit `index` (0..2048).
    pub fn bit(&self, index: usize) -> bool {
        self.0[index / 8] & (1 << (index % 8)) != 0
    }

    /// Set bit `index` (0..2048).
    pub fn set_bit(&mut self, index: usize) {
        self.0[index / 8] |= 1 << (index % 8);
    }

    /// Number of bits set.
    pub fn count_ones(&self) -> u32 {
        self.0.iter().map(|b| b.count_ones()).sum()
    }

    /// Merge another bloom into this one.
    pub fn merge(&mut self, other: &Bloom) {
        for (a, b) in self.0.iter_mut().zip(other.0.iter()) {
            *a |= *b;
        }
    }
}

/// Block header as seen by the light client.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct BlockHeader {
    /// Hash of the parent header.
    pub parent_hash: Hash,
    /// Block number.
    pub number: u64,
    /// Unix timestamp.
    pub timestamp: u64,
    /// Root of the state trie after this block.
    pub state_root: Hash,
    /// List root of the block's transaction hashes.
    pub tx_root: Hash,
    /// List root of the block's receipt hashes.
    pub receipts_root: Hash,
    /// Transactions in the block, one receipt each.
    pub tx_count: u64,
    /// Union of the receipt blooms.
    pub bloom: Bloom,
    /// Block difficulty, summed into the total difficulty.
    pub difficulty: u64,
}

impl BlockHeader {
    /// Deterministic encoding used for hashing.
    pub fn encode(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(32 * 4 + 8 * 4 + BLOOM_BYTES);
        out.extend_from_slice(&self.parent_hash);
        out.extend_from_slice(&self.number.to_be_bytes());
        out.extend_from_slice(&self.timestamp.to_be_bytes());
        out.extend_from_slice(&self.state_root);
        out.extend_from_slice(&self.tx_root);
        out.extend_from_slice(&self.receipts_root);
        out.extend_from_slice(&self.tx_count.to_be_bytes());
        out.extend_from_slice(&self.bloom.0);
        out.extend_from_slice(&self.difficulty.to_be_bytes());
        out
    }

    /// Header hash.
    pub fn hash(&self) -> Hash {
        keccak256(&self.encode())
    }
}

/// Execution receipt of a single transaction.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct Receipt {
    /// Hash of the transaction this receipt belongs to.
    pub tx_hash: Hash,
    /// Whether execution succeeded.
    pub success: bool,
    /// Gas used by the block up to and including this transaction.
    pub cumulative_gas_used: u64,
    /// Bloom over the receipt's logs.
    pub bloom: Bloom,
}

impl Receipt {
    /// Deterministic encoding used for hashing.
    pub fn encode(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(32 + 1 + 8 + BLOOM_BYTES);
        out.extend_from_slice(&self.tx_hash);
        out.push(self.success as u8);
        out.extend_from_slice(&self.cumulative_gas_used.to_be_bytes());
        out.extend_from_slice(&self.bloom.0);
        out
    }

    /// Receipt hash (leaf of the receipts root).
    pub fn hash(&self) -> Hash {
        keccak256(&self.encode())
    }
}

/// Position of an included transaction.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TxLookup {
    /// Hash of the including block.
    pub block_hash: Hash,
    /// Number of the including block.
    pub block_number: u64,
    /// Index inside the block.
    pub index: u64,
}

/// Pool/chain status of a transaction as reported by a server.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum TxStatus {
    /// The server has never seen it.
    Unknown,
    /// In the server's pool, not yet executable.
    Queued,
    /// In the server's pool, executable.
    Pending,
    /// Included in the canonical chain.
    Included(TxLookup),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_keccak_empty() {
        // Keccak-256 of the empty string
        let expected =
            hex::decode("c5d2460186f7233c927e7db2dcc703c0e500b653ca82273b7bfad8045d85a470")
                .unwrap();
        assert_eq!(keccak256(&[]).to_vec(), expected);
    }

    #[test]
    fn test_bloom_accrue_contains() {
        let mut bloom = Bloom::default();
        bloom.accrue(b"transfer");
        assert!(bloom.contains(b"transfer"));
        assert!(bloom.count_ones() >= 1 && bloom.count_ones() <= 3);
    }

    #[test]
    fn test_bloom_merge() {
        let mut a = Bloom::default();
        a.accrue(b"a");
        let mut b = Bloom::default();
        b.accrue(b"b");
        a.merge(&b);
        assert!(a.contains(b"a"));
        assert!(a.contains(b"b"));
    }

    #[test]
    fn test_header_hash_changes_with_fields() {
        let header = BlockHeader {
            number: 7,
            ..Default::default()
        };
        let mut other = header.clone();
        other.timestamp = 1;
        assert_ne!(header.hash(), other.hash());
        let mut counted = header.clone();
        counted.tx_count = 3;
        assert_ne!(header.hash(), counted.hash());
        assert_eq!(header.hash(), header.clone().hash());
    }

    #[test]
    fn test_node_id_display_is_short_hex() {
        let id = NodeId::new([0xab; 32]);
        assert_eq!(id.to_string(), "abababababababab");
    }

    #[test]
    fn test_header_bincode_roundtrip_keeps_hash() {
        let mut header = BlockHeader {
            number: 42,
            difficulty: 3,
            ..Default::default()
        };
        header.bloom.accrue(b"topic");
        let bytes = bincode::serialize(&header).unwrap();
        let decoded: BlockHeader = bincode::deserialize(&bytes).unwrap();
        assert_eq!(decoded.hash(), header.hash());
    }
}
