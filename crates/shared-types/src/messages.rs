//! # Light Protocol Messages
//!
//! Every on-demand request and reply exchanged with a serving peer. One
//! tagged enum carries them all so the runtime dispatches inbound traffic
//! with a single `match`.
//!
//! Every variant carries a `req_id`. Requests get a fresh id per
//! assignment; replies echo it and are matched by id only, never by
//! arrival order.

use serde::{Deserialize, Serialize};

use crate::entities::{BlockHeader, Hash, Receipt, TxStatus};
use crate::merkle::{KeyedProof, ProofNode};

/// Lowest protocol version this client speaks.
pub const MIN_PROTOCOL_VERSION: u32 = 2;

/// Highest protocol version this client speaks.
pub const MAX_PROTOCOL_VERSION: u32 = 4;

/// Data kinds a request can ask for.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum RequestKind {
    /// State trie entries by key under a state root.
    TrieNode,
    /// All receipts of one block.
    Receipts,
    /// One bloom bit vector per section.
    BloomBits,
    /// A header range proven through a CHT section.
    HeaderRange,
    /// Pool/chain status of transactions.
    TxStatus,
}

impl RequestKind {
    /// Lowest peer protocol version that serves this kind.
    pub fn min_protocol_version(&self) -> u32 {
        match self {
            RequestKind::TxStatus => 3,
            _ => MIN_PROTOCOL_VERSION,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            RequestKind::TrieNode => "trie_node",
            RequestKind::Receipts => "receipts",
            RequestKind::BloomBits => "bloom_bits",
            RequestKind::HeaderRange => "header_range",
            RequestKind::TxStatus => "tx_status",
        }
    }
}

/// Proof that a transaction hash sits under a canonical header's `tx_root`.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TxInclusion {
    /// The including header.
    pub header: BlockHeader,
    /// Path from the transaction hash leaf to `header.tx_root`.
    pub path: Vec<ProofNode>,
    /// CHT entry for `header`, when its block lies in a committed CHT
    /// section.
    pub cht_proof: Option<KeyedProof>,
}

/// Server answer for one transaction.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TxStatusReply {
    pub status: TxStatus,
    /// Present iff `status` is `Included`.
    pub inclusion: Option<TxInclusion>,
}

/// Light protocol message.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum LesMessage {
    /// Ask for trie entries under `root`.
    GetProofs {
        req_id: u64,
        root: Hash,
        keys: Vec<Vec<u8>>,
    },
    /// One keyed proof per requested key, in request order.
    Proofs { req_id: u64, proofs: Vec<KeyedProof> },
    /// Ask for the receipts of each block.
    GetReceipts { req_id: u64, block_hashes: Vec<Hash> },
    /// One receipt list per requested block.
    Receipts {
        req_id: u64,
        receipts: Vec<Vec<Receipt>>,
    },
    /// Ask for `count` headers ending at `to_number`, proven through
    /// CHT section `cht_section`.
    GetHeaderRange {
        req_id: u64,
        cht_section: u64,
        to_number: u64,
        count: u64,
    },
    /// Ascending headers plus the CHT proof of the last one.
    HeaderRange {
        req_id: u64,
        headers: Vec<BlockHeader>,
        proof: KeyedProof,
    },
    /// Ask for bloom bit `bit` of each listed section.
    GetBloomBits {
        req_id: u64,
        bit: u16,
        sections: Vec<u64>,
    },
    /// One bloom trie proof per requested section; the value is the bit
    /// vector.
    BloomBits { req_id: u64, proofs: Vec<KeyedProof> },
    /// Ask for the status of each transaction.
    GetTxStatus { req_id: u64, hashes: Vec<Hash> },
    /// One status per requested hash.
    TxStatus {
        req_id: u64,
        statuses: Vec<TxStatusReply>,
    },
}

impl LesMessage {
    /// Correlation id.
    pub fn req_id(&self) -> u64 {
        match self {
            LesMessage::GetProofs { req_id, .. }
            | LesMessage::Proofs { req_id, .. }
            | LesMessage::GetReceipts { req_id, .. }
            | LesMessage::Receipts { req_id, .. }
            | LesMessage::GetHeaderRange { req_id, .. }
            | LesMessage::HeaderRange { req_id, .. }
            | LesMessage::GetBloomBits { req_id, .. }
            | LesMessage::BloomBits { req_id, .. }
            | LesMessage::GetTxStatus { req_id, .. }
            | LesMessage::TxStatus { req_id, .. } => *req_id,
        }
    }

    /// Replace the correlation id.
    pub fn set_req_id(&mut self, id: u64) {
        match self {
            LesMessage::GetProofs { req_id, .. }
            | LesMessage::Proofs { req_id, .. }
            | LesMessage::GetReceipts { req_id, .. }
            | LesMessage::Receipts { req_id, .. }
            | LesMessage::GetHeaderRange { req_id, .. }
            | LesMessage::HeaderRange { req_id, .. }
            | LesMessage::GetBloomBits { req_id, .. }
            | LesMessage::BloomBits { req_id, .. }
            | LesMessage::GetTxStatus { req_id, .. }
            | LesMessage::TxStatus { req_id, .. } => *req_id = id,
        }
    }

    /// Data kind of the request or reply.
    pub fn kind(&self) -> RequestKind {
        match self {
            LesMessage::GetProofs { .. } | LesMessage::Proofs { .. } => RequestKind::TrieNode,
            LesMessage::GetReceipts { .. } | LesMessage::Receipts { .. } => RequestKind::Receipts,
            LesMessage::GetHeaderRange { .. } | LesMessage::HeaderRange { .. } => {
                RequestKind::HeaderRange
            }
            LesMessage::GetBloomBits { .. } | LesMessage::BloomBits { .. } => {
                RequestKind::BloomBits
            }
            LesMessage::GetTxStatus { .. } | LesMessage::TxStatus { .. } => RequestKind::TxStatus,
        }
    }

    /// True for replies, false for requests.
    pub fn is_response(&self) -> bool {
        matches!(
            self,
            LesMessage::Proofs { .. }
                | LesMessage::Receipts { .. }
                | LesMessage::HeaderRange { .. }
                | LesMessage::BloomBits { .. }
                | LesMessage::TxStatus { .. }
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_req_id_roundtrip() {
        let mut msg = LesMessage::GetReceipts {
            req_id: 1,
            block_hashes: vec![[1u8; 32]],
        };
        msg.set_req_id(99);
        assert_eq!(msg.req_id(), 99);
        assert_eq!(msg.kind(), RequestKind::Receipts);
        assert!(!msg.is_response());
    }

    #[test]
    fn test_reply_kinds_match_requests() {
        let reply = LesMessage::BloomBits {
            req_id: 3,
            proofs: vec![],
        };
        assert!(reply.is_response());
        assert_eq!(reply.kind(), RequestKind::BloomBits);
    }

    #[test]
    fn test_tx_status_needs_newer_protocol() {
        assert_eq!(RequestKind::TxStatus.min_protocol_version(), 3);
        assert_eq!(
            RequestKind::TrieNode.min_protocol_version(),
            MIN_PROTOCOL_VERSION
        );
    }

    #[test]
    fn test_message_survives_bincode() {
        let msg = LesMessage::GetBloomBits {
            req_id: 7,
            bit: 1500,
            sections: vec![0, 1, 2],
        };
        let bytes = bincode::serialize(&msg).unwrap();
        let back: LesMessage = bincode::deserialize(&bytes).unwrap();
        assert_eq!(back, msg);
    }
}
