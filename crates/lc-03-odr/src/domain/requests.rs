//! # Typed Requests
//!
//! Each request knows its wire message and how to verify a response
//! against roots fixed when the request was built. Verification never
//! reads the local chain.

use lc_04_chain_indexer::{bloom_bit_key, cht_key, decode_cht_value};
use shared_types::{
    compute_list_root, verify_keyed_proof, verify_list_proof, BlockHeader, Hash, LesMessage,
    Receipt, RequestKind, TxInclusion, TxLookup, TxStatus, BLOOM_BITS,
};
use std::collections::BTreeMap;

use super::errors::{OdrError, VerificationError};
use super::local::LocalData;

/// A request the ODR layer can retrieve and verify.
pub trait OdrRequest: Send + Sync {
    type Output: Send;

    fn kind(&self) -> RequestKind;

    /// Wire message; the distributor assigns the req id.
    fn message(&self) -> LesMessage;

    fn verify(&self, response: &LesMessage) -> Result<Self::Output, VerificationError>;

    /// Section roots that must stay live while the request runs.
    fn trusted_roots(&self) -> Vec<Hash> {
        Vec::new()
    }

    /// Answer from local data, if complete.
    fn load_local(&self, _local: &LocalData) -> Result<Option<Self::Output>, OdrError> {
        Ok(None)
    }

    /// Keep a verified answer for later lookups.
    fn store_local(&self, _local: &LocalData, _output: &Self::Output) -> Result<(), OdrError> {
        Ok(())
    }
}

fn check_count(expected: usize, got: usize) -> Result<(), VerificationError> {
    if expected != got {
        return Err(VerificationError::CountMismatch { expected, got });
    }
    Ok(())
}

fn message_name(message: &LesMessage) -> &'static str {
    match message {
        LesMessage::GetProofs { .. } => "GetProofs",
        LesMessage::Proofs { .. } => "Proofs",
        LesMessage::GetReceipts { .. } => "GetReceipts",
        LesMessage::Receipts { .. } => "Receipts",
        LesMessage::GetHeaderRange { .. } => "GetHeaderRange",
        LesMessage::HeaderRange { .. } => "HeaderRange",
        LesMessage::GetBloomBits { .. } => "GetBloomBits",
        LesMessage::BloomBits { .. } => "BloomBits",
        LesMessage::GetTxStatus { .. } => "GetTxStatus",
        LesMessage::TxStatus { .. } => "TxStatus",
    }
}

// =============================================================================
// STATE TRIE
// =============================================================================

/// Entries of the state trie under `root`.
#[derive(Clone, Debug)]
pub struct TrieRequest {
    pub root: Hash,
    pub keys: Vec<Vec<u8>>,
}

impl OdrRequest for TrieRequest {
    type Output = Vec<Vec<u8>>;

    fn kind(&self) -> RequestKind {
        RequestKind::TrieNode
    }

    fn message(&self) -> LesMessage {
        LesMessage::GetProofs {
            req_id: 0,
            root: self.root,
            keys: self.keys.clone(),
        }
    }

    fn verify(&self, response: &LesMessage) -> Result<Self::Output, VerificationError> {
        let LesMessage::Proofs { proofs, .. } = response else {
            return Err(VerificationError::Unexpected(message_name(response)));
        };
        check_count(self.keys.len(), proofs.len())?;

        self.keys
            .iter()
            .zip(proofs)
            .enumerate()
            .map(|(index, (key, proof))| {
                if verify_keyed_proof(&self.root, key, proof) {
                    Ok(proof.value.clone())
                } else {
                    Err(VerificationError::InvalidProof { index })
                }
            })
            .collect()
    }
}

// =============================================================================
// RECEIPTS
// =============================================================================

/// Receipts of trusted headers, checked against their receipts roots.
#[derive(Clone, Debug)]
pub struct ReceiptsRequest {
    pub headers: Vec<BlockHeader>,
}

impl OdrRequest for ReceiptsRequest {
    type Output = Vec<Vec<Receipt>>;

    fn kind(&self) -> RequestKind {
        RequestKind::Receipts
    }

    fn message(&self) -> LesMessage {
        LesMessage::GetReceipts {
            req_id: 0,
            block_hashes: self.headers.iter().map(BlockHeader::hash).collect(),
        }
    }

    fn verify(&self, response: &LesMessage) -> Result<Self::Output, VerificationError> {
        let LesMessage::Receipts { receipts, .. } = response else {
            return Err(VerificationError::Unexpected(message_name(response)));
        };
        check_count(self.headers.len(), receipts.len())?;

        for (index, (header, block_receipts)) in self.headers.iter().zip(receipts).enumerate() {
            if block_receipts.len() as u64 != header.tx_count {
                return Err(VerificationError::ReceiptCount {
                    index,
                    expected: header.tx_count,
                    got: block_receipts.len(),
                });
            }
            let leaves: Vec<Hash> = block_receipts.iter().map(Receipt::hash).collect();
            if compute_list_root(&leaves) != header.receipts_root {
                return Err(VerificationError::ReceiptsRootMismatch { index });
            }
        }
        Ok(receipts.clone())
    }

    fn load_local(&self, local: &LocalData) -> Result<Option<Self::Output>, OdrError> {
        let mut all = Vec::with_capacity(self.headers.len());
        for header in &self.headers {
            match local.receipts(&header.hash())? {
                Some(receipts) => all.push(receipts),
                None => return Ok(None),
            }
        }
        Ok(Some(all))
    }

    fn store_local(&self, local: &LocalData, output: &Self::Output) -> Result<(), OdrError> {
        for (header, receipts) in self.headers.iter().zip(output) {
            local.store_receipts(&header.hash(), receipts)?;
        }
        Ok(())
    }
}

// =============================================================================
// BLOOM BITS
// =============================================================================

/// One bloom bit across several sections, proven by bloom-trie roots.
#[derive(Clone, Debug)]
pub struct BloomRequest {
    bit: u16,
    sections: Vec<u64>,
    roots: Vec<Hash>,
    section_size: u64,
}

impl BloomRequest {
    /// `sections` pairs each section with its committed bloom-trie root.
    pub fn new(bit: u16, sections: Vec<(u64, Hash)>, section_size: u64) -> Result<Self, OdrError> {
        if bit as usize >= BLOOM_BITS {
            return Err(OdrError::InvalidRequest(format!("bloom bit {} out of range", bit)));
        }
        if sections.is_empty() {
            return Err(OdrError::InvalidRequest("no sections requested".into()));
        }
        let (sections, roots) = sections.into_iter().unzip();
        Ok(Self {
            bit,
            sections,
            roots,
            section_size,
        })
    }

    pub fn bit(&self) -> u16 {
        self.bit
    }

    pub fn sections(&self) -> &[u64] {
        &self.sections
    }
}

impl OdrRequest for BloomRequest {
    type Output = Vec<Vec<u8>>;

    fn kind(&self) -> RequestKind {
        RequestKind::BloomBits
    }

    fn message(&self) -> LesMessage {
        LesMessage::GetBloomBits {
            req_id: 0,
            bit: self.bit,
            sections: self.sections.clone(),
        }
    }

    fn verify(&self, response: &LesMessage) -> Result<Self::Output, VerificationError> {
        let LesMessage::BloomBits { proofs, .. } = response else {
            return Err(VerificationError::Unexpected(message_name(response)));
        };
        check_count(self.sections.len(), proofs.len())?;

        let key = bloom_bit_key(self.bit);
        let expected = (self.section_size / 8) as usize;
        let mut vectors = Vec::with_capacity(proofs.len());
        for (index, (root, proof)) in self.roots.iter().zip(proofs).enumerate() {
            if !verify_keyed_proof(root, &key, proof) {
                return Err(VerificationError::InvalidProof { index });
            }
            if proof.value.len() != expected {
                return Err(VerificationError::VectorLength {
                    index,
                    expected,
                    got: proof.value.len(),
                });
            }
            vectors.push(proof.value.clone());
        }
        Ok(vectors)
    }

    fn trusted_roots(&self) -> Vec<Hash> {
        self.roots.clone()
    }

    fn load_local(&self, local: &LocalData) -> Result<Option<Self::Output>, OdrError> {
        let mut vectors = Vec::with_capacity(self.sections.len());
        for section in &self.sections {
            match local.bloom_vector(self.bit, *section)? {
                Some(vector) => vectors.push(vector),
                None => return Ok(None),
            }
        }
        Ok(Some(vectors))
    }

    fn store_local(&self, local: &LocalData, output: &Self::Output) -> Result<(), OdrError> {
        for (section, vector) in self.sections.iter().zip(output) {
            local.store_bloom_vector(self.bit, *section, vector)?;
        }
        Ok(())
    }
}

// =============================================================================
// HEADER RANGE
// =============================================================================

/// `count` headers ending at `to_number`, proven through one CHT section.
#[derive(Clone, Debug)]
pub struct HeaderRangeRequest {
    cht_section: u64,
    cht_root: Hash,
    to_number: u64,
    count: u64,
}

impl HeaderRangeRequest {
    pub fn new(
        cht_section: u64,
        cht_root: Hash,
        to_number: u64,
        count: u64,
        section_size: u64,
    ) -> Result<Self, OdrError> {
        let start = cht_section.checked_mul(section_size).ok_or_else(|| {
            OdrError::InvalidRequest(format!("CHT section {} is out of range", cht_section))
        })?;
        if to_number < start || to_number - start >= section_size {
            return Err(OdrError::InvalidRequest(format!(
                "block {} is outside CHT section {}",
                to_number, cht_section
            )));
        }
        if count == 0 || count - 1 > to_number {
            return Err(OdrError::InvalidRequest(format!(
                "cannot fetch {} headers ending at {}",
                count, to_number
            )));
        }
        Ok(Self {
            cht_section,
            cht_root,
            to_number,
            count,
        })
    }
}

impl OdrRequest for HeaderRangeRequest {
    type Output = Vec<BlockHeader>;

    fn kind(&self) -> RequestKind {
        RequestKind::HeaderRange
    }

    fn message(&self) -> LesMessage {
        LesMessage::GetHeaderRange {
            req_id: 0,
            cht_section: self.cht_section,
            to_number: self.to_number,
            count: self.count,
        }
    }

    fn verify(&self, response: &LesMessage) -> Result<Self::Output, VerificationError> {
        let LesMessage::HeaderRange { headers, proof, .. } = response else {
            return Err(VerificationError::Unexpected(message_name(response)));
        };
        check_count(self.count as usize, headers.len())?;

        let first = self.to_number + 1 - self.count;
        let mut parent: Option<Hash> = None;
        for (offset, header) in headers.iter().enumerate() {
            let number = first + offset as u64;
            if header.number != number || parent.is_some_and(|p| p != header.parent_hash) {
                return Err(VerificationError::BrokenRange { number });
            }
            parent = Some(header.hash());
        }

        // The last header is anchored by the CHT; the rest by linkage.
        let key = cht_key(self.to_number);
        if !verify_keyed_proof(&self.cht_root, &key, proof) {
            return Err(VerificationError::InvalidProof { index: 0 });
        }
        match decode_cht_value(&proof.value) {
            Some((hash, _)) if Some(hash) == parent => Ok(headers.clone()),
            _ => Err(VerificationError::BrokenRange {
                number: self.to_number,
            }),
        }
    }

    fn trusted_roots(&self) -> Vec<Hash> {
        vec![self.cht_root]
    }
}

// =============================================================================
// TRANSACTION STATUS
// =============================================================================

/// Pool/chain status of transactions.
///
/// An `Included` answer must anchor its header in the trusted chain, either
/// through a CHT proof under a trusted section root or by matching a
/// trusted recent header hash, and must prove the transaction at the
/// claimed index of that header's transaction list.
#[derive(Clone, Debug)]
pub struct TxStatusRequest {
    hashes: Vec<Hash>,
    cht_roots: BTreeMap<u64, Hash>,
    recent: BTreeMap<u64, Hash>,
    section_size: u64,
}

impl TxStatusRequest {
    /// `cht_roots` pairs committed CHT sections with their roots; `recent`
    /// pairs block numbers above them with canonical header hashes.
    pub fn new(
        hashes: Vec<Hash>,
        cht_roots: Vec<(u64, Hash)>,
        recent: Vec<(u64, Hash)>,
        section_size: u64,
    ) -> Result<Self, OdrError> {
        if section_size == 0 {
            return Err(OdrError::InvalidRequest("CHT section size is zero".into()));
        }
        Ok(Self {
            hashes,
            cht_roots: cht_roots.into_iter().collect(),
            recent: recent.into_iter().collect(),
            section_size,
        })
    }

    pub fn hashes(&self) -> &[Hash] {
        &self.hashes
    }

    fn anchored(&self, inclusion: &TxInclusion) -> bool {
        let header = &inclusion.header;
        let hash = header.hash();
        if let Some(trusted) = self.recent.get(&header.number) {
            return *trusted == hash;
        }
        let Some(root) = self.cht_roots.get(&(header.number / self.section_size)) else {
            return false;
        };
        let Some(proof) = &inclusion.cht_proof else {
            return false;
        };
        verify_keyed_proof(root, &cht_key(header.number), proof)
            && decode_cht_value(&proof.value).is_some_and(|(cht_hash, _)| cht_hash == hash)
    }

    fn included(&self, tx_hash: &Hash, lookup: &TxLookup, inclusion: &TxInclusion) -> bool {
        let header = &inclusion.header;
        header.number == lookup.block_number
            && header.hash() == lookup.block_hash
            && self.anchored(inclusion)
            && verify_list_proof(
                tx_hash,
                lookup.index,
                header.tx_count,
                &inclusion.path,
                &header.tx_root,
            )
    }
}

impl OdrRequest for TxStatusRequest {
    type Output = Vec<TxStatus>;

    fn kind(&self) -> RequestKind {
        RequestKind::TxStatus
    }

    fn message(&self) -> LesMessage {
        LesMessage::GetTxStatus {
            req_id: 0,
            hashes: self.hashes.clone(),
        }
    }

    fn verify(&self, response: &LesMessage) -> Result<Self::Output, VerificationError> {
        let LesMessage::TxStatus { statuses, .. } = response else {
            return Err(VerificationError::Unexpected(message_name(response)));
        };
        check_count(self.hashes.len(), statuses.len())?;

        for (index, (hash, reply)) in self.hashes.iter().zip(statuses).enumerate() {
            let consistent = match (&reply.status, &reply.inclusion) {
                (TxStatus::Included(lookup), Some(inclusion)) => {
                    self.included(hash, lookup, inclusion)
                }
                (TxStatus::Included(_), None) => false,
                (_, inclusion) => inclusion.is_none(),
            };
            if !consistent {
                return Err(VerificationError::InvalidInclusion { index });
            }
        }
        Ok(statuses.iter().map(|reply| reply.status.clone()).collect())
    }

    fn trusted_roots(&self) -> Vec<Hash> {
        self.cht_roots.values().copied().collect()
    }
}
