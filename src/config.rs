//! Liveness protocol configuration.
//!
//! Cluster shape (N, f, this replica's id) and the timer intervals driving
//! heartbeat broadcast, staleness detection, and round pacing.

use crate::ReplicaId;
use std::time::Duration;

/// Liveness protocol configuration.
///
/// Fixed for the process lifetime; loaded by the embedding engine's own
/// configuration layer.
#[derive(Debug, Clone)]
pub struct LivenessConfig {
    /// Total number of replicas in the view (N = 3f+1).
    pub replica_count: u32,

    /// Byzantine fault bound f.
    pub fault_bound: u32,

    /// This replica's id.
    pub replica_id: ReplicaId,

    /// Interval between leader heartbeat broadcasts.
    /// Default: 6s
    pub heartbeat_period: Duration,

    /// Age after which a follower considers the last heartbeat stale.
    /// Also the period of the follower staleness check.
    /// Default: 20s
    pub heartbeat_timeout: Duration,

    /// Delay before the leader heartbeat task first fires.
    /// Default: 20s
    pub leader_startup_delay: Duration,

    /// Delay before the follower staleness task first fires.
    /// Default: 30s
    pub follower_startup_delay: Duration,

    /// Fixed delay between retransmission-driven re-tallies of an
    /// undecided leader-discovery round.
    /// Default: 10s
    pub request_resend_interval: Duration,

    /// Minimum age an in-flight leader-discovery round must reach before a
    /// new one may replace it.
    /// Default: 60s
    pub request_reissue_interval: Duration,

    /// Minimum spacing between status-poll rounds.
    /// Default: 30s
    pub status_poll_interval: Duration,

    /// Bounded wait for status-poll replies; lapsing is a normal outcome.
    /// Default: 5s
    pub status_wait: Duration,

    /// Capacity of the leader-response round cache (LRU evicted).
    /// Default: 8192
    pub round_cache_capacity: usize,
}

impl Default for LivenessConfig {
    fn default() -> Self {
        Self {
            replica_count: 4,
            fault_bound: 1,
            replica_id: 0,
            heartbeat_period: Duration::from_secs(6),
            heartbeat_timeout: Duration::from_secs(20),
            leader_startup_delay: Duration::from_secs(20),
            follower_startup_delay: Duration::from_secs(30),
            request_resend_interval: Duration::from_secs(10),
            request_reissue_interval: Duration::from_secs(60),
            status_poll_interval: Duration::from_secs(30),
            status_wait: Duration::from_secs(5),
            round_cache_capacity: 8192,
        }
    }
}

impl LivenessConfig {
    /// Create a config for a given cluster shape with default timings.
    pub fn new(replica_count: u32, fault_bound: u32, replica_id: ReplicaId) -> Self {
        Self {
            replica_count,
            fault_bound,
            replica_id,
            ..Self::default()
        }
    }

    /// Set the heartbeat broadcast period.
    pub fn with_heartbeat_period(mut self, period: Duration) -> Self {
        self.heartbeat_period = period;
        self
    }

    /// Set the heartbeat staleness timeout.
    pub fn with_heartbeat_timeout(mut self, timeout: Duration) -> Self {
        self.heartbeat_timeout = timeout;
        self
    }

    /// Set both startup delays (leader heartbeat and follower staleness).
    pub fn with_startup_delays(mut self, leader: Duration, follower: Duration) -> Self {
        self.leader_startup_delay = leader;
        self.follower_startup_delay = follower;
        self
    }

    /// Set the status-poll spacing and bounded reply wait.
    pub fn with_status_poll(mut self, interval: Duration, wait: Duration) -> Self {
        self.status_poll_interval = interval;
        self.status_wait = wait;
        self
    }

    /// Set the leader-discovery retransmission and re-issue intervals.
    pub fn with_request_intervals(mut self, resend: Duration, reissue: Duration) -> Self {
        self.request_resend_interval = resend;
        self.request_reissue_interval = reissue;
        self
    }

    /// Votes required to accept a leader-discovery decision (2f+1).
    pub fn quorum(&self) -> usize {
        2 * self.fault_bound as usize + 1
    }

    /// Timeout reports required to corroborate an escalation (more than f).
    pub fn corroboration(&self) -> usize {
        self.fault_bound as usize + 1
    }

    /// Ids of every replica except this one.
    pub fn other_replicas(&self) -> Vec<ReplicaId> {
        (0..self.replica_count)
            .filter(|id| *id != self.replica_id)
            .collect()
    }

    /// Validate configuration values.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.replica_count < 3 * self.fault_bound + 1 {
            return Err(ConfigError::InvalidValue(
                "replica_count must be at least 3f+1".into(),
            ));
        }
        if self.replica_id >= self.replica_count {
            return Err(ConfigError::InvalidValue(
                "replica_id must be < replica_count".into(),
            ));
        }
        if self.heartbeat_period.is_zero() {
            return Err(ConfigError::InvalidValue(
                "heartbeat_period must be > 0".into(),
            ));
        }
        if self.heartbeat_timeout <= self.heartbeat_period {
            return Err(ConfigError::InvalidValue(
                "heartbeat_timeout must be > heartbeat_period".into(),
            ));
        }
        if self.status_wait.is_zero() {
            return Err(ConfigError::InvalidValue("status_wait must be > 0".into()));
        }
        if self.round_cache_capacity == 0 {
            return Err(ConfigError::InvalidValue(
                "round_cache_capacity must be > 0".into(),
            ));
        }
        Ok(())
    }
}

/// Configuration errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Invalid configuration value: {0}")]
    InvalidValue(String),
}
