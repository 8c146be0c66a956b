//! # Ports Layer

pub mod outbound;

pub use outbound::{PeerSetListener, PeerTransport};
