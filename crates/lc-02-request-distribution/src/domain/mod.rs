//! # Domain Layer

pub mod errors;
pub mod peer;
pub mod request;

pub use errors::{RetrieveError, TransportError};
pub use peer::{PeerState, ServerPeer};
pub use request::{DistributionEvent, RequestId, RequestState};
