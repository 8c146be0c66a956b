//! # Domain Layer

pub mod errors;
pub mod live_roots;
pub mod local;
pub mod requests;

pub use errors::{OdrError, VerificationError};
pub use live_roots::{LiveRoots, RootGuard};
pub use local::LocalData;
pub use requests::{
    BloomRequest, HeaderRangeRequest, OdrRequest, ReceiptsRequest, TrieRequest, TxStatusRequest,
};
