//! # Adapters
//!
//! Test doubles for the outbound ports. Enabled by the `test-utils`
//! feature.

mod mock;

pub use mock::{spawn_reply_pump, Datagram, ScriptedDatagramChannel, VecDiscoveryFeed};
