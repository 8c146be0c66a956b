//! # Adapters
//!
//! Channel-backed test doubles.

mod mock;

pub use mock::{spawn_responder, ChannelTransport, Reply};
