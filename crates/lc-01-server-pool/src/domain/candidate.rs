//! # Candidate Scoring
//!
//! A candidate is a known serving node, connected or not, with the history
//! the pool uses to rank it.
//!
//! ## Score
//!
//! `score = value - failure_penalty * consecutive_failures`
//!
//! - `value` grows on every valid answer towards `value_cap` and decays
//!   with a fixed half-life, so old information loses weight.
//! - Every failure (timeout, invalid answer, dropped connection, failed
//!   negotiation) adds a hard penalty until the next success.

use serde::{Deserialize, Serialize};
use shared_types::NodeId;
use std::net::SocketAddr;
use std::time::Duration;

use crate::config::ServerPoolConfig;

/// Capabilities a node advertises in its discovery record.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct CapabilityRecord {
    /// Version of the capacity negotiation service; `0` means none.
    pub negotiation_version: u32,
}

/// A node as yielded by a discovery feed.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct CandidateRecord {
    pub id: NodeId,
    pub address: SocketAddr,
    pub capability: Option<CapabilityRecord>,
}

impl CandidateRecord {
    pub fn new(id: NodeId, address: SocketAddr) -> Self {
        Self {
            id,
            address,
            capability: None,
        }
    }

    pub fn with_negotiation_version(mut self, version: u32) -> Self {
        self.capability = Some(CapabilityRecord {
            negotiation_version: version,
        });
        self
    }

    /// Advertised negotiation version, `0` if absent.
    pub fn negotiation_version(&self) -> u32 {
        self.capability.map(|c| c.negotiation_version).unwrap_or(0)
    }
}

/// Result of a capacity query.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum NegotiationResult {
    /// No negotiation support (or no usable reply); dial blindly, throttled.
    Unsupported,
    /// Answered without spare capacity; do not dial now.
    Busy,
    /// Spare capacity; worth dialing.
    Available,
}

/// Persisted candidate state.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Candidate {
    pub record: CandidateRecord,
    /// Last negotiation result, `None` until negotiated.
    pub signal: Option<NegotiationResult>,
    /// Unix seconds of the last negotiation.
    pub negotiated_at: u64,
    /// Decaying value earned by valid answers.
    pub value: f64,
    /// Unix seconds `value` was last decayed to.
    pub value_updated_at: u64,
    /// EWMA of response times in milliseconds.
    pub latency_ms: Option<f64>,
    pub consecutive_failures: u32,
    /// Unix seconds before which the candidate is not re-dialed.
    pub redial_at: u64,
    pub redial_wait_secs: u64,
    /// Member of the fixed allow-list.
    pub trusted: bool,
    #[serde(skip)]
    pub connected: bool,
    #[serde(skip)]
    pub session_start_value: f64,
}

impl Candidate {
    pub fn new(record: CandidateRecord, now: u64, config: &ServerPoolConfig) -> Self {
        Self {
            record,
            signal: None,
            negotiated_at: 0,
            value: 0.0,
            value_updated_at: now,
            latency_ms: None,
            consecutive_failures: 0,
            redial_at: 0,
            redial_wait_secs: config.min_redial_wait.as_secs(),
            trusted: false,
            connected: false,
            session_start_value: 0.0,
        }
    }

    pub fn id(&self) -> NodeId {
        self.record.id
    }

    /// Decay `value` to `now`.
    pub fn decay(&mut self, now: u64, half_life: Duration) {
        let elapsed = now.saturating_sub(self.value_updated_at) as f64;
        let half_life = half_life.as_secs_f64();
        if elapsed > 0.0 && half_life > 0.0 {
            // Value regresses toward zero
            self.value *= 0.5f64.powf(elapsed / half_life);
        }
        self.value_updated_at = self.value_updated_at.max(now);
    }

    /// Current score (value must already be decayed).
    pub fn score(&self, config: &ServerPoolConfig) -> f64 {
        self.value - config.failure_penalty * self.consecutive_failures as f64
    }

    /// Score after decaying a copy of the value to `now`.
    pub fn score_at(&self, now: u64, config: &ServerPoolConfig) -> f64 {
        let mut copy = self.clone();
        copy.decay(now, config.value_half_life);
        copy.score(config)
    }

    /// A valid answer arrived after `response_time`.
    pub fn on_success(&mut self, response_time: Duration, now: u64, config: &ServerPoolConfig) {
        self.decay(now, config.value_half_life);
        let gain = (config.value_cap - self.value).max(0.0) * config.success_gain;
        self.value = if self.value + gain > self.value {
            (self.value + gain).min(config.value_cap)
        } else if config.success_gain > 0.0 {
            // Rounding stalls the approach just short of the cap
            self.value.max(config.value_cap)
        } else {
            self.value
        };
        self.consecutive_failures = 0;
        self.redial_wait_secs = config.min_redial_wait.as_secs();

        let sample = response_time.as_secs_f64() * 1000.0;
        self.latency_ms = Some(match self.latency_ms {
            Some(avg) => avg + config.latency_ewma_weight * (sample - avg),
            None => sample,
        });
    }

    /// A request failed, a connection dropped or a negotiation went
    /// unanswered.
    pub fn on_failure(&mut self, now: u64, config: &ServerPoolConfig) {
        self.decay(now, config.value_half_life);
        self.consecutive_failures = self.consecutive_failures.saturating_add(1);
        self.redial_wait_secs = self
            .redial_wait_secs
            .saturating_mul(2)
            .clamp(config.min_redial_wait.as_secs(), config.max_redial_wait.as_secs());
    }

    /// A dial attempt was made; hold off re-dialing.
    pub fn on_dial(&mut self, now: u64) {
        self.redial_at = now + self.redial_wait_secs;
    }

    /// True if the redial wait has passed and it is not connected.
    pub fn can_dial(&self, now: u64) -> bool {
        !self.connected && now >= self.redial_at
    }

    /// True if a fresh negotiation is due.
    pub fn needs_negotiation(&self, now: u64, config: &ServerPoolConfig) -> bool {
        match self.signal {
            None => true,
            Some(_) => now >= self.negotiated_at + config.renegotiate_after.as_secs(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn candidate() -> (Candidate, ServerPoolConfig) {
        let config = ServerPoolConfig::for_testing();
        let record = CandidateRecord::new(NodeId::new([1; 32]), "127.0.0.1:30303".parse().unwrap());
        (Candidate::new(record, 1000, &config), config)
    }

    #[test]
    fn test_success_increases_score_bounded() {
        let (mut c, config) = candidate();
        let mut last = c.score(&config);
        for _ in 0..1000 {
            c.on_success(Duration::from_millis(50), 1000, &config);
            let score = c.score(&config);
            if last < config.value_cap {
                assert!(score > last, "{} did not rise above {}", score, last);
            } else {
                assert_eq!(score, config.value_cap);
            }
            assert!(score <= config.value_cap);
            last = score;
        }
        assert_eq!(last, config.value_cap);
    }

    #[test]
    fn test_success_reaches_the_cap_exactly() {
        let (mut c, config) = candidate();
        // Headroom too small to register against the value
        c.value = config.value_cap - 1e-14;
        c.on_success(Duration::from_millis(50), 1000, &config);
        assert_eq!(c.value, config.value_cap);
        c.on_success(Duration::from_millis(50), 1000, &config);
        assert_eq!(c.value, config.value_cap);
    }

    #[test]
    fn test_failure_strictly_decreases_score() {
        let (mut c, config) = candidate();
        c.on_success(Duration::from_millis(10), 1000, &config);
        let before = c.score(&config);
        c.on_failure(1000, &config);
        assert!(c.score(&config) < before);
        let before = c.score(&config);
        c.on_failure(1000, &config);
        assert!(c.score(&config) < before);
    }

    #[test]
    fn test_value_halves_after_half_life() {
        let (mut c, config) = candidate();
        c.value = 40.0;
        c.decay(1000 + config.value_half_life.as_secs(), config.value_half_life);
        assert!((c.value - 20.0).abs() < 1e-9);
    }

    #[test]
    fn test_redial_wait_doubles_and_caps() {
        let (mut c, config) = candidate();
        let min = config.min_redial_wait.as_secs();
        c.on_failure(1000, &config);
        assert_eq!(c.redial_wait_secs, min * 2);
        for _ in 0..64 {
            c.on_failure(1000, &config);
        }
        assert_eq!(c.redial_wait_secs, config.max_redial_wait.as_secs());
        c.on_success(Duration::from_millis(1), 1000, &config);
        assert_eq!(c.redial_wait_secs, min);
    }

    #[test]
    fn test_latency_ewma() {
        let (mut c, config) = candidate();
        c.on_success(Duration::from_millis(100), 1000, &config);
        assert!((c.latency_ms.unwrap() - 100.0).abs() < 1e-9);
        c.on_success(Duration::from_millis(200), 1000, &config);
        let expected = 100.0 + config.latency_ewma_weight * 100.0;
        assert!((c.latency_ms.unwrap() - expected).abs() < 1e-9);
    }

    #[test]
    fn test_dial_sets_redial_time() {
        let (mut c, _config) = candidate();
        assert!(c.can_dial(1000));
        c.on_dial(1000);
        assert!(!c.can_dial(1000));
        assert!(c.can_dial(1000 + c.redial_wait_secs));
    }

    proptest! {
        #[test]
        fn prop_outcomes_move_score_monotonically(
            outcomes in proptest::collection::vec((any::<bool>(), 1u64..2_000), 1..64)
        ) {
            let (mut c, config) = candidate();
            for (success, millis) in outcomes {
                let before = c.score(&config);
                if success {
                    c.on_success(Duration::from_millis(millis), 1000, &config);
                    let after = c.score(&config);
                    if before < config.value_cap {
                        prop_assert!(after > before);
                    } else {
                        prop_assert_eq!(after, config.value_cap);
                    }
                    prop_assert!(after <= config.value_cap);
                } else {
                    c.on_failure(1000, &config);
                    prop_assert!(c.score(&config) < before);
                }
            }
        }
    }
}
