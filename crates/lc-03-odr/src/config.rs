//! # ODR Configuration

use lc_04_chain_indexer::{BLOOM_SECTION_SIZE, CHT_SECTION_SIZE};
use std::time::Duration;

/// On-demand retrieval configuration.
#[derive(Clone, Debug)]
pub struct OdrConfig {
    /// Blocks per CHT section; must match the CHT indexer.
    pub cht_section_size: u64,
    /// Blocks per bloom-trie section; must match the bloom indexers.
    pub bloom_section_size: u64,
    /// Deadline per retrieval; `None` uses the retrieval manager's default.
    pub deadline: Option<Duration>,
    /// Bloom bits worker tasks.
    pub bloom_workers: usize,
    /// Pending bloom lookups before `lookup` waits.
    pub bloom_queue: usize,
}

impl Default for OdrConfig {
    fn default() -> Self {
        Self {
            cht_section_size: CHT_SECTION_SIZE,
            bloom_section_size: BLOOM_SECTION_SIZE,
            deadline: None,
            bloom_workers: 4,
            bloom_queue: 64,
        }
    }
}

impl OdrConfig {
    /// Create config for testing (8-block sections, two workers).
    pub fn for_testing() -> Self {
        Self {
            cht_section_size: 8,
            bloom_section_size: 8,
            deadline: None,
            bloom_workers: 2,
            bloom_queue: 4,
        }
    }
}
