//! Retrieval tests against honest and hostile fake servers.

use lc_02_request_distribution::adapters::{spawn_responder, ChannelTransport, Reply};
use lc_02_request_distribution::{
    Distributor, DistributorConfig, PeerRegistry, RetrieveError, RetrieveManager, ServerPeer,
};
use lc_04_chain_indexer::adapters::MemoryHeaders;
use lc_04_chain_indexer::{
    vector_bit, BloomBitsBackend, BloomTrieBackend, ChainIndexer, ChtBackend, HeaderSource,
    HeaderChain, IndexerConfig, LiveRootCheck, Pruner, PrunerConfig, BLOOM_BITS_INDEXER,
    BLOOM_TRIE_INDEXER, CHT_INDEXER,
};
use shared_types::{
    build_merkle_proof, compute_list_root, BlockHeader, Bloom, Hash, InMemoryKVStore,
    KeyValueStore, LesMessage, NodeId, Receipt, ServerFeedback, StaticFeedback, TxInclusion,
    TxLookup, TxStatus, TxStatusReply,
};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use super::{BloomBitsService, Odr};
use crate::adapters::FakeServer;
use crate::config::OdrConfig;
use crate::domain::{LiveRoots, OdrError};

// =============================================================================
// HELPERS
// =============================================================================

const SECTION: u64 = 8;

struct Fixture {
    headers: Arc<MemoryHeaders>,
    kv: Arc<dyn KeyValueStore>,
    server: Arc<FakeServer>,
    registry: Arc<PeerRegistry>,
    distributor: Arc<Distributor>,
    live_roots: Arc<LiveRoots>,
    cht: Arc<ChainIndexer<ChtBackend>>,
    bloom_bits: Arc<ChainIndexer<BloomBitsBackend>>,
    odr: Arc<Odr>,
}

/// 24 blocks; the client has committed sections 0 and 1 of each index.
fn fixture() -> Fixture {
    let headers = Arc::new(MemoryHeaders::with_chain(24));
    let server = FakeServer::new(headers.clone(), SECTION).unwrap();

    let kv: Arc<dyn KeyValueStore> = Arc::new(InMemoryKVStore::new());
    let source: Arc<dyn HeaderSource> = headers.clone();
    let config = IndexerConfig::for_testing();
    let cht = Arc::new(
        ChainIndexer::new(
            CHT_INDEXER,
            config.clone(),
            kv.clone(),
            source.clone(),
            ChtBackend::new(),
        )
        .unwrap(),
    );
    let bloom_bits = Arc::new(
        ChainIndexer::new(
            BLOOM_BITS_INDEXER,
            config.clone(),
            kv.clone(),
            source.clone(),
            BloomBitsBackend::new(SECTION),
        )
        .unwrap(),
    );
    let bloom_trie = ChainIndexer::new(
        BLOOM_TRIE_INDEXER,
        config,
        kv.clone(),
        source,
        BloomTrieBackend::new(bloom_bits.store().clone()),
    )
    .unwrap()
    .with_upstream(bloom_bits.clone());
    assert_eq!(cht.process_head(23).unwrap(), 2);
    assert_eq!(bloom_bits.process_head(23).unwrap(), 2);
    assert_eq!(bloom_trie.process_head(23).unwrap(), 2);

    let feedback: Arc<dyn ServerFeedback> = Arc::new(StaticFeedback {
        timeout: Duration::from_secs(1),
    });
    let registry = Arc::new(PeerRegistry::new(feedback.clone()));
    let distributor = Distributor::new(
        DistributorConfig::for_testing(),
        registry.clone(),
        feedback,
    );
    let retriever = Arc::new(RetrieveManager::new(distributor.clone(), None));
    let live_roots = LiveRoots::new();
    let odr = Arc::new(Odr::new(
        OdrConfig::for_testing(),
        retriever,
        kv.clone(),
        live_roots.clone(),
    ));

    Fixture {
        headers,
        kv,
        server,
        registry,
        distributor,
        live_roots,
        cht,
        bloom_bits,
        odr,
    }
}

fn node(n: u8) -> NodeId {
    NodeId::new([n; 32])
}

fn ms(n: u64) -> Duration {
    Duration::from_millis(n)
}

fn connect<F>(f: &Fixture, n: u8, handler: F) -> Arc<ChannelTransport>
where
    F: Fn(&LesMessage) -> Reply + Send + 'static,
{
    let (transport, inbox) = ChannelTransport::new();
    spawn_responder(f.distributor.clone(), node(n), inbox, handler);
    f.registry
        .add(Arc::new(ServerPeer::new(node(n), 3, 2, transport.clone())));
    transport
}

/// Corrupt an honest answer so it no longer verifies.
fn tamper(mut response: LesMessage) -> LesMessage {
    match &mut response {
        LesMessage::HeaderRange { headers, .. } => headers[0].timestamp += 1,
        LesMessage::BloomBits { proofs, .. } => proofs[0].value[0] ^= 0xff,
        LesMessage::Receipts { receipts, .. } => receipts[0].push(Receipt::default()),
        _ => {}
    }
    response
}

fn hostile(server: &Arc<FakeServer>) -> impl Fn(&LesMessage) -> Reply + Send + 'static {
    let server = server.clone();
    move |request: &LesMessage| match server.answer(request) {
        Some(response) => Reply::Answer {
            after: ms(5),
            response: tamper(response),
        },
        None => Reply::Ignore,
    }
}

fn canonical(f: &Fixture, numbers: std::ops::RangeInclusive<u64>) -> Vec<BlockHeader> {
    numbers
        .map(|n| f.headers.canonical_header(n).unwrap())
        .collect()
}

// =============================================================================
// HEADERS
// =============================================================================

#[tokio::test(start_paused = true)]
async fn test_header_range_is_proven_by_cht() {
    let f = fixture();
    let root = f.cht.section_root(1).unwrap().unwrap();
    let pinned = Arc::new(AtomicBool::new(false));

    let respond = f.server.responder(ms(5));
    let (live, seen) = (f.live_roots.clone(), pinned.clone());
    connect(&f, 1, move |request| {
        seen.store(live.is_live(&root), Ordering::SeqCst);
        respond(request)
    });

    let headers = f.odr.header_range(13, 3).await.unwrap();
    assert_eq!(headers, canonical(&f, 11..=13));

    // The CHT root was live while the server held the request.
    assert!(pinned.load(Ordering::SeqCst));
    assert!(f.live_roots.is_empty());
    assert_eq!(f.odr.metrics().remote_answers, 1);
}

#[tokio::test(start_paused = true)]
async fn test_header_by_number() {
    let f = fixture();
    connect(&f, 1, f.server.responder(ms(5)));

    let header = f.odr.header_by_number(9).await.unwrap();
    assert_eq!(header, f.headers.canonical_header(9).unwrap());
}

#[tokio::test(start_paused = true)]
async fn test_hostile_answer_is_retried_on_another_server() {
    let f = fixture();
    let bad = connect(&f, 1, hostile(&f.server));
    let good = connect(&f, 2, f.server.responder(ms(5)));

    let headers = f.odr.header_range(7, 4).await.unwrap();
    assert_eq!(headers, canonical(&f, 4..=7));
    assert_eq!(bad.sent_count(), 1);
    assert_eq!(good.sent_count(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_only_hostile_servers_exhausts() {
    let f = fixture();
    connect(&f, 1, hostile(&f.server));
    connect(&f, 2, hostile(&f.server));

    let err = f.odr.header_range(7, 4).await.unwrap_err();
    assert!(matches!(
        err,
        OdrError::Retrieve(RetrieveError::Exhausted { tried: 2 })
    ));
    assert_eq!(f.odr.metrics().failures, 1);
    assert!(f.live_roots.is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_uncommitted_sections_are_unknown() {
    let f = fixture();
    let transport = connect(&f, 1, f.server.responder(ms(5)));

    assert!(matches!(
        f.odr.header_range(20, 1).await,
        Err(OdrError::UnknownSection {
            index: "cht",
            section: 2
        })
    ));
    assert!(matches!(
        f.odr.bloom_bits(1, &[2]).await,
        Err(OdrError::UnknownSection {
            index: "bloomtrie",
            section: 2
        })
    ));
    assert_eq!(transport.sent_count(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_malformed_requests_are_refused() {
    let f = fixture();
    assert!(matches!(
        f.odr.header_range(13, 0).await,
        Err(OdrError::InvalidRequest(_))
    ));
    assert!(matches!(
        f.odr.bloom_bits(5000, &[0]).await,
        Err(OdrError::InvalidRequest(_))
    ));
}

#[tokio::test(start_paused = true)]
async fn test_pinned_cht_root_is_not_pruned() {
    let f = fixture();
    connect(&f, 1, f.server.responder(ms(500)));
    let mut pruner = Pruner::new(PrunerConfig::for_testing(), f.live_roots.clone());
    pruner.add_target(f.cht.store().clone(), Vec::new());

    let odr = f.odr.clone();
    let task = tokio::spawn(async move { odr.header_range(5, 2).await });
    tokio::time::sleep(ms(100)).await;

    let root = f.cht.section_root(0).unwrap().unwrap();
    assert!(f.live_roots.is_live(&root));
    assert_eq!(pruner.prune_once().unwrap(), 0);

    assert_eq!(task.await.unwrap().unwrap(), canonical(&f, 4..=5));
    assert_eq!(pruner.prune_once().unwrap(), 1);
}

// =============================================================================
// RECEIPTS, STATE, TRANSACTIONS
// =============================================================================

#[tokio::test(start_paused = true)]
async fn test_receipts_are_cached_after_verification() {
    let f = fixture();
    let receipts: Vec<Receipt> = (1..=3u8)
        .map(|n| Receipt {
            tx_hash: [n; 32],
            success: n != 2,
            cumulative_gas_used: 21_000 * n as u64,
            bloom: Bloom::default(),
        })
        .collect();
    let leaves: Vec<Hash> = receipts.iter().map(Receipt::hash).collect();
    let header = BlockHeader {
        number: 30,
        receipts_root: compute_list_root(&leaves),
        tx_count: 3,
        ..Default::default()
    };
    f.server.insert_receipts(header.hash(), receipts.clone());
    let transport = connect(&f, 1, f.server.responder(ms(5)));

    let first = f.odr.receipts(vec![header.clone()]).await.unwrap();
    let second = f.odr.receipts(vec![header]).await.unwrap();
    assert_eq!(first, vec![receipts.clone()]);
    assert_eq!(second, vec![receipts]);

    assert_eq!(transport.sent_count(), 1);
    let metrics = f.odr.metrics();
    assert_eq!(metrics.remote_answers, 1);
    assert_eq!(metrics.local_hits, 1);
}

#[tokio::test(start_paused = true)]
async fn test_trie_entries() {
    let f = fixture();
    f.server.insert_state(b"alice".to_vec(), b"100".to_vec());
    f.server.insert_state(b"bob".to_vec(), b"7".to_vec());
    connect(&f, 1, f.server.responder(ms(5)));

    let values = f
        .odr
        .trie_entries(f.server.state_root(), vec![b"bob".to_vec(), b"alice".to_vec()])
        .await
        .unwrap();
    assert_eq!(values, vec![b"7".to_vec(), b"100".to_vec()]);
    assert_eq!(f.odr.trie_entries([0; 32], Vec::new()).await.unwrap().len(), 0);
}

/// Imports the fixture chain into the client's header store and appends
/// block 24 holding `tx_hashes`.
fn import_with_tx_block(f: &Fixture, tx_hashes: &[Hash]) -> BlockHeader {
    let chain = HeaderChain::new(f.kv.clone());
    let mut parent = None;
    for number in 0..24 {
        let header = f.headers.canonical_header(number).unwrap();
        parent = Some(header.hash());
        chain.insert(header).unwrap();
    }
    let block = BlockHeader {
        parent_hash: parent.unwrap(),
        number: 24,
        difficulty: 1,
        tx_root: compute_list_root(tx_hashes),
        tx_count: tx_hashes.len() as u64,
        ..Default::default()
    };
    chain.insert(block.clone()).unwrap();
    block
}

fn inclusion_reply(header: &BlockHeader, tx_hashes: &[Hash], index: usize) -> TxStatusReply {
    TxStatusReply {
        status: TxStatus::Included(TxLookup {
            block_hash: header.hash(),
            block_number: header.number,
            index: index as u64,
        }),
        inclusion: Some(TxInclusion {
            header: header.clone(),
            path: build_merkle_proof(tx_hashes, index).unwrap(),
            cht_proof: None,
        }),
    }
}

#[tokio::test(start_paused = true)]
async fn test_tx_status() {
    let f = fixture();
    let tx_hashes: Vec<Hash> = vec![[7; 32], [8; 32], [10; 32]];
    let block = import_with_tx_block(&f, &tx_hashes);
    let included = inclusion_reply(&block, &tx_hashes, 1);
    f.server.insert_transaction([8; 32], included.clone());
    f.server.insert_transaction(
        [9; 32],
        TxStatusReply {
            status: TxStatus::Pending,
            inclusion: None,
        },
    );
    connect(&f, 1, f.server.responder(ms(5)));

    let statuses = f
        .odr
        .tx_status(vec![[8; 32], [9; 32], [1; 32]])
        .await
        .unwrap();
    assert_eq!(
        statuses,
        vec![included.status, TxStatus::Pending, TxStatus::Unknown]
    );
}

#[tokio::test(start_paused = true)]
async fn test_tx_status_rejects_unanchored_blocks() {
    let f = fixture();
    let tx = [6; 32];
    import_with_tx_block(&f, &[[7; 32]]);

    // Self-consistent headers that are not on the client's chain: one
    // inside a committed CHT section, one above the head
    for (n, number) in [(1u8, 5u64), (2, 999_999)] {
        let forged = BlockHeader {
            number,
            tx_root: compute_list_root(&[tx]),
            tx_count: 1,
            ..Default::default()
        };
        f.server.insert_transaction(tx, inclusion_reply(&forged, &[tx], 0));
        let transport = connect(&f, n, f.server.responder(ms(5)));

        let err = f.odr.tx_status(vec![tx]).await.unwrap_err();
        assert!(matches!(
            err,
            OdrError::Retrieve(RetrieveError::Exhausted { tried: 1 })
        ));
        assert_eq!(transport.sent_count(), 1);
        f.registry.remove(&node(n));
    }
}

#[tokio::test(start_paused = true)]
async fn test_tx_status_rejects_misplaced_index() {
    let f = fixture();
    let tx_hashes: Vec<Hash> = vec![[7; 32], [8; 32], [10; 32]];
    let block = import_with_tx_block(&f, &tx_hashes);
    let mut reply = inclusion_reply(&block, &tx_hashes, 1);
    if let TxStatus::Included(lookup) = &mut reply.status {
        lookup.index = 2;
    }
    f.server.insert_transaction([8; 32], reply);
    connect(&f, 1, f.server.responder(ms(5)));

    let err = f.odr.tx_status(vec![[8; 32]]).await.unwrap_err();
    assert!(matches!(
        err,
        OdrError::Retrieve(RetrieveError::Exhausted { tried: 1 })
    ));
}

// =============================================================================
// BLOOM BITS
// =============================================================================

fn bit_of_block(number: u64) -> u16 {
    Bloom::positions(&number.to_be_bytes())[0] as u16
}

#[tokio::test(start_paused = true)]
async fn test_pruned_bloom_section_is_fetched_and_cached() {
    let f = fixture();
    let bit = bit_of_block(3);
    f.bloom_bits.store().prune_section(0).unwrap();
    let transport = connect(&f, 1, f.server.responder(ms(5)));

    let vectors = f.odr.bloom_bits(bit, &[0, 1]).await.unwrap();
    assert_eq!(vectors[0], f.server.bloom_vector(bit, 0).unwrap());
    assert_eq!(vectors[1], f.server.bloom_vector(bit, 1).unwrap());
    assert!(vector_bit(&vectors[0], 3));
    assert_eq!(transport.sent_count(), 1);

    // The verified vector now answers locally.
    assert_eq!(f.odr.bloom_bits(bit, &[0]).await.unwrap(), vec![vectors[0].clone()]);
    assert_eq!(transport.sent_count(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_tampered_bloom_vector_is_rejected() {
    let f = fixture();
    f.bloom_bits.store().prune_section(0).unwrap();
    connect(&f, 1, hostile(&f.server));

    let err = f.odr.bloom_bits(bit_of_block(2), &[0]).await.unwrap_err();
    assert!(matches!(
        err,
        OdrError::Retrieve(RetrieveError::Exhausted { tried: 1 })
    ));
    assert!(f.odr.local().bloom_vector(bit_of_block(2), 0).unwrap().is_none());
}

#[tokio::test(start_paused = true)]
async fn test_bloom_service_serves_lookups() {
    let f = fixture();
    f.bloom_bits.store().prune_section(0).unwrap();
    connect(&f, 1, f.server.responder(ms(5)));

    let service = Arc::new(BloomBitsService::new(f.odr.clone()));
    service.start();
    assert!(service.is_running());

    let lookups: Vec<_> = (0..6u16)
        .map(|bit| {
            let service = service.clone();
            tokio::spawn(async move { service.lookup(bit, vec![0, 1]).await })
        })
        .collect();
    for (bit, handle) in lookups.into_iter().enumerate() {
        let vectors = handle.await.unwrap().unwrap();
        assert_eq!(vectors[0], f.server.bloom_vector(bit as u16, 0).unwrap());
        assert_eq!(vectors[1], f.server.bloom_vector(bit as u16, 1).unwrap());
    }

    service.stop().await;
    assert!(!service.is_running());
    assert!(matches!(
        service.lookup(1, vec![1]).await,
        Err(OdrError::ServiceStopped)
    ));
}

#[tokio::test(start_paused = true)]
async fn test_stopping_fails_pending_lookups() {
    let f = fixture();
    f.bloom_bits.store().prune_section(0).unwrap();
    connect(&f, 1, |_| Reply::Ignore);

    let service = Arc::new(BloomBitsService::new(f.odr.clone()));
    service.start();
    let pending = {
        let service = service.clone();
        tokio::spawn(async move { service.lookup(4, vec![0]).await })
    };
    tokio::time::sleep(ms(100)).await;

    service.stop().await;
    assert!(matches!(
        pending.await.unwrap(),
        Err(OdrError::ServiceStopped)
    ));
    assert!(f.live_roots.is_empty());
}
