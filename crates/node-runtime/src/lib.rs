//! # Light Client Runtime
//!
//! Wires the light client subsystems into one [`LightClient`] and runs them.
//!
//! ## Purpose
//!
//! - **Configuration**: one TOML file ([`LightClientConfig`]) drives every
//!   subsystem config.
//! - **Lifecycle**: `start()` marks the run, seeds the pool, starts bloom
//!   workers, indexers and the pruner; `stop()` tears them down in
//!   dependency order.
//! - **Transport hooks**: the networking layer reports connections and
//!   hands over inbound messages; responses are routed to the distributor.
//! - **Shutdown tracking**: runs that never stopped cleanly are reported at
//!   the next start.
//!
//! ## Module Structure
//!
//! ```text
//! node-runtime/
//! ├── container/   # LightClient, LightClientConfig
//! ├── adapters/    # Storage backends (RocksDB behind feature: rocksdb)
//! ├── shutdown.rs  # ShutdownTracker
//! ├── errors.rs    # LightClientError
//! └── main.rs      # light-client binary
//! ```

pub mod adapters;
pub mod container;
pub mod errors;
pub mod shutdown;

pub use container::{ConfigError, LightClient, LightClientConfig, NodeAddress, PeerLoad, Tuning};
pub use errors::LightClientError;
pub use shutdown::ShutdownTracker;
