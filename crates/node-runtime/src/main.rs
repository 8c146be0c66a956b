//! # Light Client Binary
//!
//! ## Startup Sequence
//!
//! 1. Install logging (`LC_LOG_LEVEL`, default `info`)
//! 2. Load configuration (`LC_CONFIG` path, `LC_DATA_DIR` override)
//! 3. Open storage and wire the client
//! 4. Start, wait for Ctrl+C, stop in order
//!
//! The networking layer is not part of this binary; it attaches through
//! the `LightClient` transport hooks.

use std::sync::Arc;

use anyhow::{Context, Result};
use lc_01_server_pool::{CandidateRecord, DatagramChannel, NegotiationError};
use node_runtime::{LightClient, LightClientConfig};
use shared_types::{KeyValueStore, SystemTimeSource};
use tracing::{info, warn};
use tracing_subscriber::{EnvFilter, FmtSubscriber};

/// Datagram channel used until a socket is attached. Queries are dropped,
/// so every candidate negotiates to `Unsupported` and is only blind-dialed.
struct DetachedDatagrams;

impl DatagramChannel for DetachedDatagrams {
    fn send(&self, _to: &CandidateRecord, _payload: Vec<u8>) -> Result<(), NegotiationError> {
        Err(NegotiationError::Transport("no datagram socket attached".into()))
    }
}

/// Load configuration from file and environment.
fn load_config() -> Result<LightClientConfig> {
    let mut config = match std::env::var("LC_CONFIG") {
        Ok(path) => LightClientConfig::load(&path)
            .with_context(|| format!("Failed to load config from {}", path))?,
        Err(_) => LightClientConfig::default(),
    };

    if let Ok(dir) = std::env::var("LC_DATA_DIR") {
        config.data_dir = dir.into();
    }
    config.validate().context("Invalid configuration")?;
    Ok(config)
}

#[cfg(feature = "rocksdb")]
fn open_store(config: &LightClientConfig) -> Result<Arc<dyn KeyValueStore>> {
    use node_runtime::adapters::{RocksDbConfig, RocksDbStore};

    let rocks = RocksDbConfig::for_data_dir(&config.data_dir, config.database_cache_mb);
    let store = RocksDbStore::open(rocks).context("Failed to open database")?;
    info!("[runtime] Database opened at {}", store.path());
    Ok(Arc::new(store))
}

#[cfg(not(feature = "rocksdb"))]
fn open_store(_config: &LightClientConfig) -> Result<Arc<dyn KeyValueStore>> {
    use node_runtime::adapters::InMemoryKVStore;

    warn!("[runtime] Built without the rocksdb feature; state is not persisted");
    Ok(Arc::new(InMemoryKVStore::new()))
}

#[tokio::main]
async fn main() -> Result<()> {
    let filter = EnvFilter::try_from_env("LC_LOG_LEVEL").unwrap_or_else(|_| EnvFilter::new("info"));
    let subscriber = FmtSubscriber::builder()
        .with_env_filter(filter)
        .with_target(true)
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    let config = load_config()?;
    let kv = open_store(&config)?;
    let client = LightClient::new(
        config,
        kv,
        Arc::new(DetachedDatagrams),
        Arc::new(SystemTimeSource),
    )
    .context("Failed to wire light client")?;

    client.start().context("Failed to start light client")?;
    info!("[runtime] Light client running. Press Ctrl+C to stop.");

    tokio::signal::ctrl_c().await?;

    client.stop().await.context("Unclean shutdown")?;
    Ok(())
}
