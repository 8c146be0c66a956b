//! # Adapters
//!
//! In-memory header chains for tests.

mod memory;

pub use memory::{build_chain, MemoryHeaders};
