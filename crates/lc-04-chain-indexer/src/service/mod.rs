//! # Service Layer

pub mod header_chain;
pub mod indexer;
pub mod pruner;
pub mod store;


pub use header_chain::HeaderChain;
pub use indexer::ChainIndexer;
pub use pruner::Pruner;
pub use store::{SectionCommit, SectionStore};
