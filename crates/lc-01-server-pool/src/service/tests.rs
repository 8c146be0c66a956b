use std::sync::Arc;
use std::time::Duration;

use shared_types::{
    FixedTimeSource, InMemoryKVStore, KeyValueStore, NodeId, RequestOutcome, ServerFeedback,
};

use super::pool::POOL_KEY_PREFIX;
use super::{CapacityNegotiator, ServerPool};
use crate::adapters::{spawn_reply_pump, ScriptedDatagramChannel, VecDiscoveryFeed};
use crate::config::{NegotiatorConfig, ServerPoolConfig};
use crate::domain::{CandidateRecord, NegotiationResult, ServerPoolError};

struct Harness {
    pool: Arc<ServerPool>,
    channel: Arc<ScriptedDatagramChannel>,
    store: Arc<InMemoryKVStore>,
    clock: FixedTimeSource,
}

fn harness_with(config: ServerPoolConfig, store: Arc<InMemoryKVStore>) -> Harness {
    let (channel, rx) = ScriptedDatagramChannel::new();
    let negotiator = Arc::new(CapacityNegotiator::new(
        NegotiatorConfig::for_testing(),
        channel.clone(),
    ));
    spawn_reply_pump(negotiator.clone(), rx);
    let clock = FixedTimeSource::new(1_000);
    let pool = Arc::new(
        ServerPool::new(config, negotiator, store.clone(), Arc::new(clock.clone())).unwrap(),
    );
    Harness {
        pool,
        channel,
        store,
        clock,
    }
}

fn harness(config: ServerPoolConfig) -> Harness {
    harness_with(config, Arc::new(InMemoryKVStore::new()))
}

fn id(byte: u8) -> NodeId {
    NodeId::new([byte; 32])
}

fn record(byte: u8) -> CandidateRecord {
    CandidateRecord::new(id(byte), format!("10.0.0.{}:30303", byte).parse().unwrap())
}

fn negotiable(byte: u8) -> CandidateRecord {
    record(byte).with_negotiation_version(1)
}

fn signal_of(pool: &ServerPool, node: NodeId) -> Option<NegotiationResult> {
    pool.snapshot()
        .into_iter()
        .find(|c| c.id == node)
        .and_then(|c| c.signal)
}

async fn wait_for(mut condition: impl FnMut() -> bool) {
    for _ in 0..500 {
        if condition() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("condition not reached");
}

#[tokio::test(start_paused = true)]
async fn test_available_preferred_and_blind_dials_throttled() {
    let h = harness(ServerPoolConfig::for_testing());
    h.channel.script(id(2), Some(vec![5]));

    h.pool.add_candidate(record(1));
    h.pool.add_candidate(negotiable(2));
    wait_for(|| {
        signal_of(&h.pool, id(1)) == Some(NegotiationResult::Unsupported)
            && signal_of(&h.pool, id(2)) == Some(NegotiationResult::Available)
    })
    .await;

    // Available first
    assert_eq!(h.pool.next_dial_candidate().map(|r| r.id), Some(id(2)));
    h.pool.peer_connected(&id(2));

    // Then one blind dial, then nothing until the interval passes
    assert_eq!(h.pool.next_dial_candidate().map(|r| r.id), Some(id(1)));
    assert!(h.pool.next_dial_candidate().is_none());

    h.clock.advance(5);
    assert!(h.pool.next_dial_candidate().is_none());

    h.clock.advance(5);
    assert_eq!(h.pool.next_dial_candidate().map(|r| r.id), Some(id(1)));
    assert_eq!(h.pool.metrics().dialed, 3);
}

#[tokio::test(start_paused = true)]
async fn test_sub_second_blind_interval_still_throttles() {
    let mut config = ServerPoolConfig::for_testing();
    config.blind_dial_interval = Duration::from_millis(500);
    let h = harness(config);

    h.pool.add_candidate(record(1));
    h.pool.add_candidate(record(3));
    wait_for(|| {
        signal_of(&h.pool, id(1)) == Some(NegotiationResult::Unsupported)
            && signal_of(&h.pool, id(3)) == Some(NegotiationResult::Unsupported)
    })
    .await;

    assert!(h.pool.next_dial_candidate().is_some());
    assert!(h.pool.next_dial_candidate().is_none());

    h.clock.advance(1);
    assert!(h.pool.next_dial_candidate().is_some());
    assert_eq!(h.pool.metrics().dialed, 2);
}

#[tokio::test(start_paused = true)]
async fn test_busy_candidate_waits_for_renegotiation() {
    let h = harness(ServerPoolConfig::for_testing());
    h.channel.script(id(3), Some(vec![0]));
    h.pool
        .add_source(Box::new(VecDiscoveryFeed::new(vec![negotiable(3)])));
    h.pool.start().unwrap();

    wait_for(|| signal_of(&h.pool, id(3)) == Some(NegotiationResult::Busy)).await;
    assert!(h.pool.next_dial_candidate().is_none());

    // Busy is not a blind-dial target either
    h.clock.advance(15);
    assert!(h.pool.next_dial_candidate().is_none());

    h.channel.script(id(3), Some(vec![4]));
    h.clock.advance(20);
    wait_for(|| signal_of(&h.pool, id(3)) == Some(NegotiationResult::Available)).await;
    assert_eq!(h.pool.next_dial_candidate().map(|r| r.id), Some(id(3)));
    assert!(h.channel.sent_to(&id(3)) >= 2);

    h.pool.stop().await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn test_dial_iterator_wakes_on_negotiation_and_ends_on_stop() {
    let h = harness(ServerPoolConfig::for_testing());
    h.channel.script(id(4), Some(vec![1]));
    h.pool
        .add_source(Box::new(VecDiscoveryFeed::new(vec![negotiable(4)])));
    h.pool.start().unwrap();

    let mut dials = h.pool.dial_iterator();
    let first = dials.next().await.unwrap();
    assert_eq!(first.id, id(4));

    h.pool.stop().await.unwrap();
    assert!(dials.next().await.is_none());
    assert!(matches!(h.pool.start(), Err(ServerPoolError::Stopped)));
}

#[tokio::test]
async fn test_double_start_rejected() {
    let h = harness(ServerPoolConfig::for_testing());
    h.pool.start().unwrap();
    assert!(matches!(h.pool.start(), Err(ServerPoolError::AlreadyStarted)));
    h.pool.stop().await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn test_scores_follow_outcomes() {
    let h = harness(ServerPoolConfig::for_testing());
    h.pool.add_candidate(record(5));
    let pool: &dyn ServerFeedback = &*h.pool;

    let before = pool.peer_value(&id(5));
    pool.record_outcome(
        &id(5),
        RequestOutcome::Success {
            response_time: Duration::from_millis(40),
        },
    );
    let after_success = pool.peer_value(&id(5));
    assert!(after_success > before);

    pool.record_outcome(&id(5), RequestOutcome::Failure);
    let after_failure = pool.peer_value(&id(5));
    assert!(after_failure < after_success);

    pool.record_outcome(&id(5), RequestOutcome::Disconnect);
    assert!(pool.peer_value(&id(5)) < after_failure);
}

#[tokio::test(start_paused = true)]
async fn test_suggested_timeout_tracks_latency() {
    let h = harness(ServerPoolConfig::for_testing());
    h.pool.add_candidate(record(6));

    // 4 × 100ms initial estimate
    assert_eq!(h.pool.suggested_timeout(), Duration::from_millis(400));

    h.pool.record_outcome(
        &id(6),
        RequestOutcome::Success {
            response_time: Duration::from_millis(50),
        },
    );
    assert_eq!(h.pool.suggested_timeout(), Duration::from_millis(200));
    let feedback: &dyn ServerFeedback = &*h.pool;
    assert_eq!(feedback.suggested_timeout(&id(6)), Duration::from_millis(200));
    assert_eq!(feedback.suggested_timeout(&id(99)), Duration::from_millis(200));
}

#[tokio::test(start_paused = true)]
async fn test_lowest_score_evicted_when_full() {
    let config = ServerPoolConfig {
        max_candidates: 2,
        ..ServerPoolConfig::for_testing()
    };
    let h = harness(config);
    h.pool.add_candidate(record(7));
    h.pool.add_candidate(record(8));
    wait_for(|| signal_of(&h.pool, id(8)).is_some() && signal_of(&h.pool, id(7)).is_some()).await;

    h.pool.record_outcome(
        &id(7),
        RequestOutcome::Success {
            response_time: Duration::from_millis(10),
        },
    );
    h.pool.add_candidate(record(9));

    let ids: Vec<NodeId> = h.pool.snapshot().into_iter().map(|c| c.id).collect();
    assert_eq!(h.pool.candidate_count(), 2);
    assert!(ids.contains(&id(7)));
    assert!(!ids.contains(&id(8)));

    let mut evicted_key = POOL_KEY_PREFIX.to_vec();
    evicted_key.extend_from_slice(id(8).as_bytes());
    assert!(!h.store.exists(&evicted_key).unwrap());
}

#[tokio::test(start_paused = true)]
async fn test_allow_list_bypasses_scoring_and_negotiation() {
    let config = ServerPoolConfig {
        trusted: vec![negotiable(10)],
        ..ServerPoolConfig::for_testing()
    };
    let h = harness(config);
    h.pool.add_candidate(negotiable(11));
    assert_eq!(h.pool.candidate_count(), 1);

    // Failures do not keep a trusted server from being dialed
    h.pool.record_outcome(&id(10), RequestOutcome::Failure);
    let picked = h.pool.next_dial_candidate().unwrap();
    assert_eq!(picked.id, id(10));
    assert_eq!(h.channel.sent_count(), 0);
    assert!(h.pool.snapshot()[0].trusted);
}

#[tokio::test(start_paused = true)]
async fn test_candidates_survive_restart() {
    let store = Arc::new(InMemoryKVStore::new());
    {
        let h = harness_with(ServerPoolConfig::for_testing(), store.clone());
        h.pool.add_candidate(record(12));
        h.pool.record_outcome(
            &id(12),
            RequestOutcome::Success {
                response_time: Duration::from_millis(30),
            },
        );
        h.pool.stop().await.unwrap();
    }
    assert_eq!(store.prefix_scan(POOL_KEY_PREFIX).unwrap().len(), 1);

    let h = harness_with(ServerPoolConfig::for_testing(), store);
    let snapshot = h.pool.snapshot();
    assert_eq!(snapshot.len(), 1);
    assert_eq!(snapshot[0].id, id(12));
    assert!(snapshot[0].value > 0.0);
    assert!((snapshot[0].latency_ms.unwrap() - 30.0).abs() < 1e-6);
    assert!(!snapshot[0].connected);
}

#[tokio::test(start_paused = true)]
async fn test_connection_metrics_and_session_value() {
    let h = harness(ServerPoolConfig::for_testing());
    h.pool.add_candidate(record(13));

    h.pool.peer_connected(&id(13));
    assert_eq!(h.pool.metrics().connected, 1);

    h.pool.record_outcome(
        &id(13),
        RequestOutcome::Success {
            response_time: Duration::from_millis(20),
        },
    );
    h.pool.peer_disconnected(&id(13));

    let metrics = h.pool.metrics();
    assert_eq!(metrics.connected, 0);
    assert!(metrics.session_value > 0.0);
    assert!(metrics.total_value > 0.0);
}
