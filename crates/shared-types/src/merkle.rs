//! # Merkle Proofs
//!
//! Binary Keccak Merkle trees over ordered leaves, and the keyed
//! [`MerkleMap`] built on top of them. Every helper trie the light client
//! verifies against (state tries, CHT, bloom trie) is a `MerkleMap`.
//!
//! ## Algorithm
//!
//! 1. Leaves are hashed with a `0x00` domain byte, interior nodes with `0x01`
//! 2. The last node of an odd level is carried up unchanged
//! 3. A proof is the sibling path from leaf to root; each sibling carries its
//!    side
//!
//! Ordered lists (transactions, receipts) use [`compute_list_root`], which
//! binds the leaf count into the root. Their proofs are checked with
//! [`verify_list_proof`], which also fixes the leaf position.

use serde::{Deserialize, Serialize};
use sha3::{Digest, Keccak256};
use std::collections::BTreeMap;

use crate::entities::{Hash, ZERO_HASH};

const LEAF_DOMAIN: u8 = 0x00;
const NODE_DOMAIN: u8 = 0x01;
const LIST_DOMAIN: u8 = 0x02;

/// Position of a sibling in a proof path.
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub enum Position {
    /// Sibling is on the left.
    Left,
    /// Sibling is on the right.
    Right,
}

/// One step of a Merkle proof path.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct ProofNode {
    /// Hash of the sibling node.
    pub hash: Hash,
    /// Side the sibling is on.
    pub position: Position,
}

impl ProofNode {
    /// Sibling on the left.
    pub fn left(hash: Hash) -> Self {
        Self {
            hash,
            position: Position::Left,
        }
    }

    /// Sibling on the right.
    pub fn right(hash: Hash) -> Self {
        Self {
            hash,
            position: Position::Right,
        }
    }
}

fn hash_node(left: &Hash, right: &Hash) -> Hash {
    let mut hasher = Keccak256::new();
    hasher.update([NODE_DOMAIN]);
    hasher.update(left);
    hasher.update(right);
    hasher.finalize().into()
}

/// Hash of a raw leaf item.
pub fn hash_leaf(data: &[u8]) -> Hash {
    let mut hasher = Keccak256::new();
    hasher.update([LEAF_DOMAIN]);
    hasher.update(data);
    hasher.finalize().into()
}

/// Merkle root over already-hashed leaves.
///
/// The empty tree has the zero root; a single leaf is its own root.
pub fn compute_merkle_root(leaves: &[Hash]) -> Hash {
    if leaves.is_empty() {
        return ZERO_HASH;
    }

    let mut level: Vec<Hash> = leaves.to_vec();
    while level.len() > 1 {
        level = next_level(&level);
    }
    level[0]
}

fn next_level(level: &[Hash]) -> Vec<Hash> {
    level
        .chunks(2)
        .map(|pair| match pair.get(1) {
            Some(right) => hash_node(&pair[0], right),
            None => pair[0],
        })
        .collect()
}

/// Sibling path proving `leaves[index]`.
///
/// Returns `None` if `index` is out of range.
pub fn build_merkle_proof(leaves: &[Hash], index: usize) -> Option<Vec<ProofNode>> {
    if index >= leaves.len() {
        return None;
    }

    let mut proof = Vec::new();
    let mut level: Vec<Hash> = leaves.to_vec();
    let mut index = index;

    while level.len() > 1 {
        if index % 2 == 1 {
            proof.push(ProofNode::left(level[index - 1]));
        } else if let Some(sibling) = level.get(index + 1) {
            proof.push(ProofNode::right(*sibling));
        }
        // else: carried up, no sibling at this level

        level = next_level(&level);
        index /= 2;
    }

    Some(proof)
}

/// Fold a proof path from `leaf` and compare with `expected_root`.
///
/// O(log n) time, O(1) space.
pub fn verify_merkle_proof(leaf: &Hash, path: &[ProofNode], expected_root: &Hash) -> bool {
    let mut current = *leaf;
    for node in path {
        current = match node.position {
            Position::Left => hash_node(&node.hash, &current),
            Position::Right => hash_node(&current, &node.hash),
        };
    }
    current == *expected_root
}

/// Root of an ordered list of `leaves`, bound to its length.
///
/// Lists of different lengths never share a root, so a list cannot be
/// padded or truncated without changing it. The empty list has the zero
/// root.
pub fn compute_list_root(leaves: &[Hash]) -> Hash {
    if leaves.is_empty() {
        return ZERO_HASH;
    }
    bind_count(leaves.len() as u64, &compute_merkle_root(leaves))
}

fn bind_count(count: u64, tree_root: &Hash) -> Hash {
    let mut hasher = Keccak256::new();
    hasher.update([LIST_DOMAIN]);
    hasher.update(count.to_be_bytes());
    hasher.update(tree_root);
    hasher.finalize().into()
}

/// Sibling sides a proof for leaf `index` of `count` leaves must have.
fn expected_sides(index: u64, count: u64) -> Option<Vec<Position>> {
    if index >= count {
        return None;
    }
    let mut sides = Vec::new();
    let (mut index, mut width) = (index, count);
    while width > 1 {
        if index % 2 == 1 {
            sides.push(Position::Left);
        } else if index + 1 < width {
            sides.push(Position::Right);
        }
        index /= 2;
        width = width.div_ceil(2);
    }
    Some(sides)
}

/// Check that `leaf` is element `index` of the `count`-long list committed
/// to by `list_root` (see [`compute_list_root`]).
///
/// The path shape must match `index`, so a proof for one position does
/// not verify at another.
pub fn verify_list_proof(
    leaf: &Hash,
    index: u64,
    count: u64,
    path: &[ProofNode],
    list_root: &Hash,
) -> bool {
    let Some(sides) = expected_sides(index, count) else {
        return false;
    };
    if sides.len() != path.len()
        || sides.iter().zip(path).any(|(side, node)| *side != node.position)
    {
        return false;
    }
    let mut current = *leaf;
    for node in path {
        current = match node.position {
            Position::Left => hash_node(&node.hash, &current),
            Position::Right => hash_node(&current, &node.hash),
        };
    }
    bind_count(count, &current) == *list_root
}

/// A value plus the path binding it to a [`MerkleMap`] root.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct KeyedProof {
    /// Key the proof is for.
    pub key: Vec<u8>,
    /// Value stored under `key`.
    pub value: Vec<u8>,
    /// Sibling path from the leaf to the root.
    pub path: Vec<ProofNode>,
}

/// Leaf hash of a key/value entry. The key length prefix keeps
/// `(key, value)` splits unambiguous.
pub fn keyed_leaf(key: &[u8], value: &[u8]) -> Hash {
    let mut item = Vec::with_capacity(4 + key.len() + value.len());
    item.extend_from_slice(&(key.len() as u32).to_be_bytes());
    item.extend_from_slice(key);
    item.extend_from_slice(value);
    hash_leaf(&item)
}

/// Check a keyed proof against `root` for `key`.
pub fn verify_keyed_proof(root: &Hash, key: &[u8], proof: &KeyedProof) -> bool {
    proof.key == key && verify_merkle_proof(&keyed_leaf(key, &proof.value), &proof.path, root)
}

/// Ordered key/value map with a Merkle commitment over its entries.
#[derive(Clone, Debug, Default)]
pub struct MerkleMap {
    entries: BTreeMap<Vec<u8>, Vec<u8>>,
}

impl MerkleMap {
    /// Empty map.
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace an entry.
    pub fn insert(&mut self, key: impl Into<Vec<u8>>, value: impl Into<Vec<u8>>) {
        self.entries.insert(key.into(), value.into());
    }

    /// Value under `key`.
    pub fn get(&self, key: &[u8]) -> Option<&[u8]> {
        self.entries.get(key).map(Vec::as_slice)
    }

    /// Number of entries.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// True if there are no entries.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Iterate entries in key order.
    pub fn iter(&self) -> impl Iterator<Item = (&Vec<u8>, &Vec<u8>)> {
        self.entries.iter()
    }

    fn leaves(&self) -> Vec<Hash> {
        self.entries.iter().map(|(k, v)| keyed_leaf(k, v)).collect()
    }

    /// Commitment over all entries.
    pub fn root(&self) -> Hash {
        compute_merkle_root(&self.leaves())
    }

    /// Inclusion proof for `key`, if present.
    pub fn prove(&self, key: &[u8]) -> Option<KeyedProof> {
        let index = self.entries.keys().position(|k| k.as_slice() == key)?;
        let path = build_merkle_proof(&self.leaves(), index)?;
        Some(KeyedProof {
            key: key.to_vec(),
            value: self.entries.get(key)?.clone(),
            path,
        })
    }
}
