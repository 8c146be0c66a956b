//! # Domain Layer
//!
//! Candidate scoring, negotiation results and the capacity query wire
//! format. No I/O.

pub mod candidate;
pub mod errors;
pub mod wire;

pub use candidate::{Candidate, CandidateRecord, CapabilityRecord, NegotiationResult};
pub use errors::{NegotiationError, ServerPoolError};
pub use wire::{
    capacity_reply, CapacityQueryParams, NamedQuery, NamedResult, QueryBatch, ReplyBatch,
    CAPACITY_QUERY_NAME, LES_SERVICE,
};
