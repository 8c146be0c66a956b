//! # Shared Types Crate
//!
//! Domain entities, the light protocol message enum, Merkle algorithms and
//! the storage/feedback ports used by every light client subsystem.
//!
//! ## Design Principles
//!
//! - **Single Source of Truth**: types crossing crate boundaries live here.
//! - **No subsystem logic**: this crate only defines data and contracts.

pub mod entities;
pub mod merkle;
pub mod messages;
pub mod ports;
pub mod storage;

pub use entities::*;
pub use merkle::{
    build_merkle_proof, compute_list_root, compute_merkle_root, hash_leaf, keyed_leaf,
    verify_keyed_proof, verify_list_proof, verify_merkle_proof, KeyedProof, MerkleMap, Position,
    ProofNode,
};
pub use messages::*;
pub use ports::*;
pub use storage::*;
