//! # Capacity Negotiation Wire Format
//!
//! A request is a list of named queries, a reply a list of named results.
//! Receivers ignore names they do not know.
//!
//! Replies echo the Keccak-256 of the request bytes they answer, which is
//! what the negotiator correlates on.

use serde::{Deserialize, Serialize};
use shared_types::{keccak256, Hash};

use super::errors::NegotiationError;

/// Service name of the light protocol.
pub const LES_SERVICE: &str = "les";

/// Name of the capacity query.
pub const CAPACITY_QUERY_NAME: &str = "capacity-query";

/// One named query with opaque parameters.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct NamedQuery {
    pub service: String,
    pub name: String,
    pub params: Vec<u8>,
}

/// A batch of named queries sent in one datagram.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueryBatch {
    pub queries: Vec<NamedQuery>,
}

/// One named result with opaque data.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct NamedResult {
    pub name: String,
    pub data: Vec<u8>,
}

/// Reply datagram.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReplyBatch {
    /// Keccak-256 of the request bytes this answers.
    pub request_hash: Hash,
    pub results: Vec<NamedResult>,
}

/// Parameters of the capacity query.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct CapacityQueryParams {
    /// How far ahead (seconds) the server should assume the client stays.
    pub bias_secs: u64,
    /// Token amounts to price; one capacity is returned per entry.
    pub add_tokens: Vec<u64>,
}

impl QueryBatch {
    /// Append a named query, serializing its parameters.
    pub fn add<P: Serialize>(
        &mut self,
        service: &str,
        name: &str,
        params: &P,
    ) -> Result<(), NegotiationError> {
        self.queries.push(NamedQuery {
            service: service.to_string(),
            name: name.to_string(),
            params: bincode::serialize(params)?,
        });
        Ok(())
    }

    pub fn encode(&self) -> Result<Vec<u8>, NegotiationError> {
        Ok(bincode::serialize(self)?)
    }

    pub fn decode(bytes: &[u8]) -> Result<Self, NegotiationError> {
        Ok(bincode::deserialize(bytes)?)
    }
}

impl ReplyBatch {
    /// Empty reply to `request_bytes`.
    pub fn for_request(request_bytes: &[u8]) -> Self {
        Self {
            request_hash: keccak256(request_bytes),
            results: Vec::new(),
        }
    }

    /// Append a named result, serializing its data.
    pub fn add<D: Serialize>(&mut self, name: &str, data: &D) -> Result<(), NegotiationError> {
        self.results.push(NamedResult {
            name: name.to_string(),
            data: bincode::serialize(data)?,
        });
        Ok(())
    }

    /// Decode the result named `name`, if present and well formed.
    pub fn get<D: for<'de> Deserialize<'de>>(&self, name: &str) -> Option<D> {
        self.results
            .iter()
            .find(|r| r.name == name)
            .and_then(|r| bincode::deserialize(&r.data).ok())
    }

    pub fn encode(&self) -> Result<Vec<u8>, NegotiationError> {
        Ok(bincode::serialize(self)?)
    }

    pub fn decode(bytes: &[u8]) -> Result<Self, NegotiationError> {
        Ok(bincode::deserialize(bytes)?)
    }
}

/// Build a capacity reply as a serving node would.
///
/// Used by scripted channels in tests and by embedders bridging a real
/// datagram transport.
pub fn capacity_reply(request_bytes: &[u8], capacities: &[u64]) -> Result<Vec<u8>, NegotiationError> {
    let request = QueryBatch::decode(request_bytes)?;
    let mut reply = ReplyBatch::for_request(request_bytes);
    if request
        .queries
        .iter()
        .any(|q| q.service == LES_SERVICE && q.name == CAPACITY_QUERY_NAME)
    {
        reply.add(CAPACITY_QUERY_NAME, &capacities.to_vec())?;
    }
    reply.encode()
}
