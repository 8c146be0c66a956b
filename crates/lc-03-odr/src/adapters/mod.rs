//! # Adapters
//!
//! Honest light server over a generated chain, for tests.

mod server;

pub use server::FakeServer;
