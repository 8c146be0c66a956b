//! # Light Client Configuration
//!
//! Operator-facing settings, loadable from TOML. Every field has a default,
//! so an empty file is a valid config.
//!
//! Subsystem tuning (scoring weights, timer periods, section geometry) is
//! not part of the file; it lives in [`Tuning`] and is replaced wholesale
//! by tests.

use lc_01_server_pool::{CandidateRecord, NegotiatorConfig, ServerPoolConfig};
use lc_02_request_distribution::DistributorConfig;
use lc_03_odr::OdrConfig;
use lc_04_chain_indexer::{IndexerConfig, PrunerConfig};
use serde::{Deserialize, Serialize};
use shared_types::NodeId;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

/// Configuration errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Invalid config: {0}")]
    Invalid(String),

    #[error("Invalid node id '{0}': expected 32 hex-encoded bytes")]
    InvalidNodeId(String),
}

/// A server given in the config file.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeAddress {
    /// Hex node id, with or without `0x`.
    pub id: String,
    pub address: SocketAddr,
    /// Capacity negotiation version the node supports; `0` if unknown.
    #[serde(default)]
    pub negotiation_version: u32,
}

impl NodeAddress {
    pub fn record(&self) -> Result<CandidateRecord, ConfigError> {
        let hex_id = self.id.strip_prefix("0x").unwrap_or(&self.id);
        let bytes: [u8; 32] = hex::decode(hex_id)
            .ok()
            .and_then(|bytes| bytes.try_into().ok())
            .ok_or_else(|| ConfigError::InvalidNodeId(self.id.clone()))?;

        let record = CandidateRecord::new(NodeId::new(bytes), self.address);
        Ok(if self.negotiation_version > 0 {
            record.with_negotiation_version(self.negotiation_version)
        } else {
            record
        })
    }
}

/// Subsystem configs the file does not expose.
#[derive(Clone, Debug)]
pub struct Tuning {
    pub negotiator: NegotiatorConfig,
    pub pool: ServerPoolConfig,
    pub distributor: DistributorConfig,
    pub odr: OdrConfig,
    pub cht: IndexerConfig,
    pub bloom: IndexerConfig,
    pub pruner: PrunerConfig,
    /// Chain events buffered per subscriber.
    pub event_capacity: usize,
}

impl Default for Tuning {
    fn default() -> Self {
        Self {
            negotiator: NegotiatorConfig::default(),
            pool: ServerPoolConfig::default(),
            distributor: DistributorConfig::default(),
            odr: OdrConfig::default(),
            cht: IndexerConfig::cht(),
            bloom: IndexerConfig::bloom_bits(),
            pruner: PrunerConfig::default(),
            event_capacity: 256,
        }
    }
}

impl Tuning {
    /// Fast timers and 8-block sections.
    pub fn for_testing() -> Self {
        Self {
            negotiator: NegotiatorConfig::for_testing(),
            pool: ServerPoolConfig::for_testing(),
            distributor: DistributorConfig::for_testing(),
            odr: OdrConfig::for_testing(),
            cht: IndexerConfig::for_testing(),
            bloom: IndexerConfig::for_testing(),
            pruner: PrunerConfig::for_testing(),
            event_capacity: 64,
        }
    }
}

/// Complete light client configuration.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct LightClientConfig {
    /// Chain the client follows; logged at startup.
    pub network_id: u64,
    /// Connected servers at once.
    pub max_peers: usize,
    /// Directory of the persistent store.
    pub data_dir: PathBuf,
    /// Block cache of the persistent store.
    pub database_cache_mb: usize,
    /// Candidates added to the pool at startup.
    pub bootstrap_nodes: Vec<NodeAddress>,
    /// When non-empty, only these servers are dialed.
    pub trusted_servers: Vec<NodeAddress>,
    /// Keep all section data.
    pub no_prune: bool,
    /// Deadline of a retrieval whose caller gives none.
    pub request_deadline_secs: u64,
    /// Retrievals admitted at once.
    pub max_queued_requests: usize,
    /// Bloom bits worker tasks.
    pub bloom_workers: usize,
    /// How often the shutdown marker is refreshed.
    pub marker_refresh_secs: u64,
    #[serde(skip)]
    pub tuning: Tuning,
}

impl Default for LightClientConfig {
    fn default() -> Self {
        Self {
            network_id: 1,
            max_peers: 25,
            data_dir: PathBuf::from("./data"),
            database_cache_mb: 16,
            bootstrap_nodes: Vec::new(),
            trusted_servers: Vec::new(),
            no_prune: false,
            request_deadline_secs: 30,
            max_queued_requests: 256,
            bloom_workers: 4,
            marker_refresh_secs: 300,
            tuning: Tuning::default(),
        }
    }
}

impl LightClientConfig {
    /// Create config for testing (small limits, 8-block sections).
    pub fn for_testing() -> Self {
        Self {
            max_peers: 4,
            data_dir: PathBuf::from("./data-test"),
            request_deadline_secs: 5,
            max_queued_requests: 8,
            bloom_workers: 2,
            marker_refresh_secs: 60,
            tuning: Tuning::for_testing(),
            ..Self::default()
        }
    }

    /// Parse and validate a TOML document.
    pub fn from_toml_str(toml: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(toml)?;
        config.validate()?;
        Ok(config)
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml_str(&contents)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let positive = [
            ("max_peers", self.max_peers as u64),
            ("request_deadline_secs", self.request_deadline_secs),
            ("max_queued_requests", self.max_queued_requests as u64),
            ("bloom_workers", self.bloom_workers as u64),
            ("marker_refresh_secs", self.marker_refresh_secs),
        ];
        if let Some((name, _)) = positive.iter().find(|(_, value)| *value == 0) {
            return Err(ConfigError::Invalid(format!("{} must be greater than 0", name)));
        }

        for indexer in [&self.tuning.cht, &self.tuning.bloom] {
            indexer
                .validate()
                .map_err(|e| ConfigError::Invalid(e.to_string()))?;
        }
        self.distributor_config()
            .validate()
            .map_err(|e| ConfigError::Invalid(e.to_string()))?;

        self.bootstrap_records()?;
        self.trusted_records()?;
        Ok(())
    }

    pub fn bootstrap_records(&self) -> Result<Vec<CandidateRecord>, ConfigError> {
        self.bootstrap_nodes.iter().map(NodeAddress::record).collect()
    }

    pub fn trusted_records(&self) -> Result<Vec<CandidateRecord>, ConfigError> {
        self.trusted_servers.iter().map(NodeAddress::record).collect()
    }

    // =========================================================================
    // SUBSYSTEM CONFIGS
    // =========================================================================

    pub fn pool_config(&self) -> Result<ServerPoolConfig, ConfigError> {
        Ok(ServerPoolConfig {
            trusted: self.trusted_records()?,
            ..self.tuning.pool.clone()
        })
    }

    pub fn distributor_config(&self) -> DistributorConfig {
        DistributorConfig {
            max_queued_requests: self.max_queued_requests,
            default_deadline: Some(self.request_deadline()),
            ..self.tuning.distributor.clone()
        }
    }

    /// ODR section sizes always follow the indexers'.
    pub fn odr_config(&self) -> OdrConfig {
        OdrConfig {
            cht_section_size: self.tuning.cht.section_size,
            bloom_section_size: self.tuning.bloom.section_size,
            bloom_workers: self.bloom_workers,
            ..self.tuning.odr.clone()
        }
    }

    pub fn pruner_config(&self) -> PrunerConfig {
        PrunerConfig {
            no_prune: self.no_prune,
            ..self.tuning.pruner.clone()
        }
    }

    pub fn request_deadline(&self) -> Duration {
        Duration::from_secs(self.request_deadline_secs)
    }

    pub fn marker_refresh_interval(&self) -> Duration {
        Duration::from_secs(self.marker_refresh_secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const NODE_ID: &str = "0x0101010101010101010101010101010101010101010101010101010101010101";

    #[test]
    fn test_empty_document_gives_defaults() {
        let config = LightClientConfig::from_toml_str("").unwrap();
        assert_eq!(config.max_peers, 25);
        assert_eq!(config.database_cache_mb, 16);
        assert_eq!(config.marker_refresh_interval(), Duration::from_secs(300));
        assert!(config.bootstrap_nodes.is_empty());
    }

    #[test]
    fn test_parses_servers() {
        let toml = format!(
            r#"
            network_id = 5
            no_prune = true

            [[bootstrap_nodes]]
            id = "{NODE_ID}"
            address = "10.0.0.1:30303"
            negotiation_version = 1

            [[trusted_servers]]
            id = "{NODE_ID}"
            address = "10.0.0.1:30303"
            "#
        );
        let config = LightClientConfig::from_toml_str(&toml).unwrap();
        assert_eq!(config.network_id, 5);
        assert!(config.pruner_config().no_prune);

        let bootstrap = config.bootstrap_records().unwrap();
        assert_eq!(bootstrap[0].id, NodeId::new([1u8; 32]));
        assert_eq!(bootstrap[0].negotiation_version(), 1);

        let pool = config.pool_config().unwrap();
        assert_eq!(pool.trusted.len(), 1);
        assert_eq!(pool.trusted[0].negotiation_version(), 0);
    }

    #[test]
    fn test_rejects_bad_node_id() {
        let toml = r#"
            [[bootstrap_nodes]]
            id = "abcd"
            address = "10.0.0.1:30303"
        "#;
        assert!(matches!(
            LightClientConfig::from_toml_str(toml),
            Err(ConfigError::InvalidNodeId(id)) if id == "abcd"
        ));
    }

    #[test]
    fn test_rejects_zero_limits() {
        assert!(matches!(
            LightClientConfig::from_toml_str("max_peers = 0"),
            Err(ConfigError::Invalid(_))
        ));
        assert!(matches!(
            LightClientConfig::from_toml_str("request_deadline_secs = 0"),
            Err(ConfigError::Invalid(_))
        ));
    }

    #[test]
    fn test_rejects_unbounded_timeout_multiplier() {
        let mut config = LightClientConfig::for_testing();
        assert!(config.validate().is_ok());
        config.tuning.distributor.timeout_multipliers.bloom_bits = f64::MAX;
        assert!(matches!(config.validate(), Err(ConfigError::Invalid(_))));
    }

    #[test]
    fn test_unknown_field_type_is_parse_error() {
        assert!(matches!(
            LightClientConfig::from_toml_str("max_peers = \"many\""),
            Err(ConfigError::Parse(_))
        ));
    }

    #[test]
    fn test_derived_configs_follow_file_values() {
        let mut config = LightClientConfig::for_testing();
        config.max_queued_requests = 3;
        config.bloom_workers = 7;

        let distributor = config.distributor_config();
        assert_eq!(distributor.max_queued_requests, 3);
        assert_eq!(distributor.default_deadline, Some(Duration::from_secs(5)));

        let odr = config.odr_config();
        assert_eq!(odr.bloom_workers, 7);
        assert_eq!(odr.cht_section_size, config.tuning.cht.section_size);
        assert_eq!(odr.bloom_section_size, config.tuning.bloom.section_size);
    }

    #[test]
    fn test_load_reports_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("missing.toml");
        assert!(matches!(
            LightClientConfig::load(&path),
            Err(ConfigError::Io { .. })
        ));
    }
}
