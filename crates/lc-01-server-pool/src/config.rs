//! # Server Pool Configuration

use std::time::Duration;

use crate::domain::CandidateRecord;

/// Capacity negotiator configuration.
#[derive(Clone, Debug)]
pub struct NegotiatorConfig {
    /// How long to wait for a reply before resolving `Unsupported`.
    pub timeout: Duration,
    /// Horizon (seconds) the server should price the connection for.
    pub bias_secs: u64,
}

impl Default for NegotiatorConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_millis(500),
            bias_secs: 180,
        }
    }
}

impl NegotiatorConfig {
    /// Testing config with a shorter timeout.
    pub fn for_testing() -> Self {
        Self {
            timeout: Duration::from_millis(100),
            bias_secs: 180,
        }
    }
}

/// Server pool configuration.
#[derive(Clone, Debug)]
pub struct ServerPoolConfig {
    /// Upper bound on known candidates; lowest score evicted first.
    pub max_candidates: usize,
    /// Negotiations running at once.
    pub max_concurrent_negotiations: usize,
    /// Age after which a candidate's capacity signal is refreshed.
    pub renegotiate_after: Duration,
    /// Minimum spacing between blind dials of `Unsupported` candidates.
    pub blind_dial_interval: Duration,
    /// First redial wait after a dial attempt.
    pub min_redial_wait: Duration,
    /// Cap on the doubling redial wait.
    pub max_redial_wait: Duration,
    /// Half-life of a candidate's earned value.
    pub value_half_life: Duration,
    /// Upper bound of earned value.
    pub value_cap: f64,
    /// Fraction of the remaining headroom earned per valid answer.
    pub success_gain: f64,
    /// Score penalty per consecutive failure.
    pub failure_penalty: f64,
    /// Weight of a new sample in the latency EWMA.
    pub latency_ewma_weight: f64,
    /// Latency assumed before any sample exists.
    pub initial_latency: Duration,
    /// Suggested timeout = multiplier × latency estimate, then clamped.
    pub timeout_multiplier: f64,
    pub min_timeout: Duration,
    pub max_timeout: Duration,
    /// Delay before restarting an exhausted discovery feed.
    pub source_retry_interval: Duration,
    /// Period of re-negotiation and metrics refresh.
    pub maintenance_interval: Duration,
    /// How often an idle dial iterator re-checks the table.
    pub dial_poll_interval: Duration,
    /// Fixed allow-list; when non-empty only these are dialed and scoring
    /// is bypassed.
    pub trusted: Vec<CandidateRecord>,
}

impl Default for ServerPoolConfig {
    fn default() -> Self {
        Self {
            max_candidates: 1000,
            max_concurrent_negotiations: 8,
            renegotiate_after: Duration::from_secs(60),
            blind_dial_interval: Duration::from_secs(10),
            min_redial_wait: Duration::from_secs(5),
            max_redial_wait: Duration::from_secs(600),
            value_half_life: Duration::from_secs(3600),
            value_cap: 100.0,
            success_gain: 0.05,
            failure_penalty: 5.0,
            latency_ewma_weight: 0.2,
            initial_latency: Duration::from_millis(500),
            timeout_multiplier: 4.0,
            min_timeout: Duration::from_millis(250),
            max_timeout: Duration::from_secs(10),
            source_retry_interval: Duration::from_secs(30),
            maintenance_interval: Duration::from_secs(5),
            dial_poll_interval: Duration::from_secs(1),
            trusted: Vec::new(),
        }
    }
}

impl ServerPoolConfig {
    /// Testing config with small tables and fast timers.
    pub fn for_testing() -> Self {
        Self {
            max_candidates: 16,
            max_concurrent_negotiations: 2,
            renegotiate_after: Duration::from_secs(30),
            blind_dial_interval: Duration::from_secs(10),
            min_redial_wait: Duration::from_secs(2),
            max_redial_wait: Duration::from_secs(60),
            value_half_life: Duration::from_secs(600),
            value_cap: 100.0,
            success_gain: 0.1,
            failure_penalty: 5.0,
            latency_ewma_weight: 0.2,
            initial_latency: Duration::from_millis(100),
            timeout_multiplier: 4.0,
            min_timeout: Duration::from_millis(50),
            max_timeout: Duration::from_secs(2),
            source_retry_interval: Duration::from_millis(200),
            maintenance_interval: Duration::from_millis(100),
            dial_poll_interval: Duration::from_millis(20),
            trusted: Vec::new(),
        }
    }

    /// Clamp `multiplier × latency` into the timeout bounds.
    pub fn timeout_for_latency(&self, latency_ms: f64) -> Duration {
        let ms = (latency_ms * self.timeout_multiplier).max(0.0);
        Duration::from_secs_f64(ms / 1000.0).clamp(self.min_timeout, self.max_timeout)
    }
}
