//! # Indexer Configuration

use std::time::Duration;

use crate::domain::IndexerError;

/// Blocks per CHT section.
pub const CHT_SECTION_SIZE: u64 = 32_768;

/// Blocks per bloom-bits (and bloom-trie) section.
pub const BLOOM_SECTION_SIZE: u64 = 4_096;

/// Section geometry of one indexer.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct IndexerConfig {
    /// Blocks per section. A multiple of 8.
    pub section_size: u64,
    /// Confirmations the last block of a section needs before processing.
    pub confirmations: u64,
}

impl IndexerConfig {
    pub fn cht() -> Self {
        Self {
            section_size: CHT_SECTION_SIZE,
            confirmations: 2_048,
        }
    }

    pub fn bloom_bits() -> Self {
        Self {
            section_size: BLOOM_SECTION_SIZE,
            confirmations: 256,
        }
    }

    /// Create config for testing (8-block sections, 2 confirmations).
    pub fn for_testing() -> Self {
        Self {
            section_size: 8,
            confirmations: 2,
        }
    }

    pub fn validate(&self) -> Result<(), IndexerError> {
        if self.section_size == 0 || self.section_size % 8 != 0 {
            return Err(IndexerError::Config(format!(
                "section_size must be a non-zero multiple of 8, got {}",
                self.section_size
            )));
        }
        Ok(())
    }

    /// Sections whose last block is confirmed at `head`.
    pub fn confirmed_sections(&self, head: u64) -> u64 {
        (head + 1).saturating_sub(self.confirmations) / self.section_size
    }

    /// First block number of `section`.
    pub fn section_start(&self, section: u64) -> u64 {
        section * self.section_size
    }
}

/// Pruner configuration.
#[derive(Clone, Debug)]
pub struct PrunerConfig {
    /// Pause between pruning passes.
    pub interval: Duration,
    /// Most recent committed sections whose data is kept.
    pub keep_sections: u64,
    /// Disable pruning entirely.
    pub no_prune: bool,
}

impl Default for PrunerConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(60),
            keep_sections: 2,
            no_prune: false,
        }
    }
}

impl PrunerConfig {
    /// Create config for testing (fast interval, keep one section).
    pub fn for_testing() -> Self {
        Self {
            interval: Duration::from_millis(50),
            keep_sections: 1,
            no_prune: false,
        }
    }
}
