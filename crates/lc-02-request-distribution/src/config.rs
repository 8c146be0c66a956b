//! # Distribution Configuration

use shared_types::RequestKind;
use std::time::Duration;
use thiserror::Error;

/// Largest accepted timeout multiplier.
pub const MAX_TIMEOUT_MULTIPLIER: f64 = 100.0;

#[derive(Debug, Error, PartialEq)]
pub enum ConfigError {
    #[error("Timeout multiplier for {kind} must be in (0, {max}], got {value}")]
    TimeoutMultiplier {
        kind: &'static str,
        value: f64,
        max: f64,
    },

    #[error("max_queued_requests must be greater than 0")]
    EmptyQueue,
}

/// Per-kind factor applied to a peer's suggested timeout.
#[derive(Clone, Debug)]
pub struct TimeoutMultipliers {
    pub trie_node: f64,
    pub receipts: f64,
    pub bloom_bits: f64,
    pub header_range: f64,
    pub tx_status: f64,
}

impl Default for TimeoutMultipliers {
    fn default() -> Self {
        Self {
            trie_node: 1.0,
            receipts: 1.0,
            bloom_bits: 2.0,
            header_range: 2.0,
            tx_status: 1.0,
        }
    }
}

impl TimeoutMultipliers {
    pub fn validate(&self) -> Result<(), ConfigError> {
        let kinds = [
            RequestKind::TrieNode,
            RequestKind::Receipts,
            RequestKind::BloomBits,
            RequestKind::HeaderRange,
            RequestKind::TxStatus,
        ];
        for kind in kinds {
            let value = self.for_kind(kind);
            // Also rejects NaN
            if !(value > 0.0 && value <= MAX_TIMEOUT_MULTIPLIER) {
                return Err(ConfigError::TimeoutMultiplier {
                    kind: kind.as_str(),
                    value,
                    max: MAX_TIMEOUT_MULTIPLIER,
                });
            }
        }
        Ok(())
    }

    pub fn for_kind(&self, kind: RequestKind) -> f64 {
        match kind {
            RequestKind::TrieNode => self.trie_node,
            RequestKind::Receipts => self.receipts,
            RequestKind::BloomBits => self.bloom_bits,
            RequestKind::HeaderRange => self.header_range,
            RequestKind::TxStatus => self.tx_status,
        }
    }
}

/// Distributor and retrieval configuration.
#[derive(Clone, Debug)]
pub struct DistributorConfig {
    /// Live requests admitted at once; `queue` waits for room beyond this.
    pub max_queued_requests: usize,
    /// Timeout factors per request kind.
    pub timeout_multipliers: TimeoutMultipliers,
    /// Deadline used by `retrieve` when the caller passes none.
    pub default_deadline: Option<Duration>,
}

impl Default for DistributorConfig {
    fn default() -> Self {
        Self {
            max_queued_requests: 256,
            timeout_multipliers: TimeoutMultipliers::default(),
            default_deadline: Some(Duration::from_secs(30)),
        }
    }
}

impl DistributorConfig {
    /// Create config for testing (small queue, no default deadline).
    pub fn for_testing() -> Self {
        Self {
            max_queued_requests: 8,
            timeout_multipliers: TimeoutMultipliers {
                trie_node: 1.0,
                receipts: 1.0,
                bloom_bits: 1.0,
                header_range: 1.0,
                tx_status: 1.0,
            },
            default_deadline: None,
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_queued_requests == 0 {
            return Err(ConfigError::EmptyQueue);
        }
        self.timeout_multipliers.validate()
    }

    /// Assignment timeout for `kind` given the peer's suggested timeout.
    ///
    /// Saturates at `Duration::MAX` for multipliers that skipped validation.
    pub fn assignment_timeout(&self, kind: RequestKind, suggested: Duration) -> Duration {
        let multiplier = self
            .timeout_multipliers
            .for_kind(kind)
            .clamp(0.0, MAX_TIMEOUT_MULTIPLIER);
        if multiplier.is_nan() {
            return suggested;
        }
        Duration::try_from_secs_f64(suggested.as_secs_f64() * multiplier).unwrap_or(Duration::MAX)
    }
}
