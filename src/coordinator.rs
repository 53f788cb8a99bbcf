//! Heartbeat coordinator.
//!
//! Single authority for this replica's view of leader liveness. Bridges
//! transport-layer messages to the external leader-change trigger and owns
//! every scheduled task:
//!
//! - leader heartbeat broadcast (while this replica believes it is leader)
//! - follower staleness check (while it believes it is not)
//! - leader-discovery retransmission for an undecided request round
//! - status-poll escalation, spawned on demand when staleness is detected
//!
//! State is partitioned into three independently locked regions (heartbeat,
//! leader discovery, status poll) so an incoming heartbeat never blocks
//! behind an in-flight poll. No lock is held across a send or a barrier
//! wait.

use crate::config::{ConfigError, LivenessConfig};
use crate::message::{LeaderHealth, LivenessMessage};
use crate::quorum::{self, LeaderDecision};
use crate::status::{StatusPollBarrier, StatusReply};
use crate::timer::{spawn_periodic, TaskHandle};
use crate::transport::LivenessTransport;
use crate::view::ViewController;
use crate::{Regency, ReplicaId, Sequence};
use lru::LruCache;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::num::NonZeroUsize;
use std::sync::Arc;
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};
use tokio::sync::Notify;
use tracing::{debug, info, warn};

/// Last accepted heartbeat and when it arrived. Overwritten on each
/// acceptance, never merged.
struct LivenessRecord {
    received_at: Instant,
    leader: ReplicaId,
    regency: Regency,
}

/// Votes collected for one leader-discovery round, deduplicated by sender.
#[derive(Default)]
struct PendingRound {
    votes: HashMap<ReplicaId, (ReplicaId, Regency)>,
}

/// Leader-discovery region (lock L).
struct DiscoveryState {
    last_sequence: Option<Sequence>,
    last_sent_at: Option<Instant>,
    request_in_flight: bool,
    /// Bounded round cache; eviction under adversarial or delayed traffic
    /// is normal, not exceptional.
    rounds: LruCache<Sequence, PendingRound>,
    retransmit: Option<TaskHandle>,
}

/// Status-poll region (lock S).
struct StatusPollState {
    last_poll_sequence: Option<Sequence>,
    leader_change_in_progress: bool,
}

/// The liveness timer subsystem of one replica.
pub struct HeartbeatCoordinator<T, V> {
    config: LivenessConfig,
    transport: Arc<T>,
    view: Arc<V>,

    heartbeat: Mutex<Option<LivenessRecord>>,
    discovery: Mutex<DiscoveryState>,
    status: Mutex<StatusPollState>,
    barrier: StatusPollBarrier,

    heartbeat_task: Mutex<Option<TaskHandle>>,
    staleness_task: Mutex<Option<TaskHandle>>,
    shutdown: Arc<Notify>,
}

impl<T: LivenessTransport, V: ViewController> HeartbeatCoordinator<T, V> {
    /// Create a coordinator. Validates the configuration.
    pub fn new(config: LivenessConfig, transport: Arc<T>, view: Arc<V>) -> Result<Self, ConfigError> {
        config.validate()?;
        let capacity = NonZeroUsize::new(config.round_cache_capacity)
            .ok_or_else(|| ConfigError::InvalidValue("round_cache_capacity must be > 0".into()))?;

        Ok(Self {
            config,
            transport,
            view,
            heartbeat: Mutex::new(None),
            discovery: Mutex::new(DiscoveryState {
                last_sequence: None,
                last_sent_at: None,
                request_in_flight: false,
                rounds: LruCache::new(capacity),
                retransmit: None,
            }),
            status: Mutex::new(StatusPollState {
                last_poll_sequence: None,
                leader_change_in_progress: false,
            }),
            barrier: StatusPollBarrier::new(),
            heartbeat_task: Mutex::new(None),
            staleness_task: Mutex::new(None),
            shutdown: Arc::new(Notify::new()),
        })
    }

    /// Wall-clock round correlation number, strictly increasing per origin.
    fn next_sequence() -> Sequence {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
            .as_millis() as Sequence
    }

    /// Start the leader-heartbeat and follower-staleness tasks.
    pub fn start(self: &Arc<Self>) {
        let coord = self.clone();
        let heartbeat_task = spawn_periodic(
            self.config.leader_startup_delay,
            self.config.heartbeat_period,
            move || {
                let coord = coord.clone();
                async move { coord.heartbeat_tick().await }
            },
        );
        if let Some(old) = self.heartbeat_task.lock().replace(heartbeat_task) {
            old.cancel();
        }

        let coord = self.clone();
        let staleness_task = spawn_periodic(
            self.config.follower_startup_delay,
            self.config.heartbeat_timeout,
            move || {
                let coord = coord.clone();
                async move { coord.staleness_tick() }
            },
        );
        if let Some(old) = self.staleness_task.lock().replace(staleness_task) {
            old.cancel();
        }
    }

    /// Cancel and respawn the periodic tasks, after an applied leader
    /// switch.
    pub fn restart(self: &Arc<Self>) {
        self.stop_timers();
        self.start();
    }

    /// Cancel all tasks promptly. In-flight sends may be abandoned.
    pub fn shutdown(&self) {
        self.stop_timers();
        if let Some(task) = self.discovery.lock().retransmit.take() {
            task.cancel();
        }
        // Permit-storing notify: the dispatch loop sees the signal even if
        // it is inside a handler right now.
        self.shutdown.notify_one();
    }

    fn stop_timers(&self) {
        if let Some(task) = self.heartbeat_task.lock().take() {
            task.cancel();
        }
        if let Some(task) = self.staleness_task.lock().take() {
            task.cancel();
        }
    }

    /// Signal that the external leader-change protocol started through
    /// some other path, suppressing local escalation until completion.
    pub fn leader_change_started(&self) {
        self.status.lock().leader_change_in_progress = true;
    }

    /// Signal that the external leader-change protocol finished, re-arming
    /// future escalations.
    pub fn leader_change_complete(&self) {
        self.status.lock().leader_change_in_progress = false;
    }

    /// Whether an escalation has been handed to the external protocol and
    /// not yet completed.
    pub fn leader_change_in_progress(&self) -> bool {
        self.status.lock().leader_change_in_progress
    }

    /// The leader and regency of the last accepted heartbeat.
    pub fn last_heartbeat(&self) -> Option<(ReplicaId, Regency)> {
        self.heartbeat.lock().as_ref().map(|r| (r.leader, r.regency))
    }

    /// Age of the last accepted heartbeat.
    pub fn last_heartbeat_age(&self) -> Option<Duration> {
        self.heartbeat.lock().as_ref().map(|r| r.received_at.elapsed())
    }

    /// Whether a leader-discovery round is currently in flight.
    pub fn discovery_in_flight(&self) -> bool {
        self.discovery.lock().request_in_flight
    }

    // --- periodic task bodies -------------------------------------------

    /// Leader side: broadcast a heartbeat while this replica believes it is
    /// leader and connections are established.
    async fn heartbeat_tick(&self) {
        if self.view.leader() != self.config.replica_id {
            return;
        }
        if !self.view.connections_established() {
            return;
        }
        let msg = LivenessMessage::Heartbeat {
            sender: self.config.replica_id,
            leader: self.config.replica_id,
            regency: self.view.regency(),
        };
        self.transport.broadcast(&self.config.other_replicas(), msg).await;
    }

    /// Follower side: check heartbeat staleness and spawn the escalation
    /// task when the record is missing or too old.
    fn staleness_tick(self: &Arc<Self>) {
        if self.view.leader() == self.config.replica_id {
            return;
        }
        if !self.view.connections_established() {
            return;
        }
        let stale = match &*self.heartbeat.lock() {
            None => true,
            Some(record) => record.received_at.elapsed() > self.config.heartbeat_timeout,
        };
        if stale {
            info!(
                replica = self.config.replica_id,
                leader = self.view.leader(),
                "leader heartbeat stale, starting status poll"
            );
            let coord = self.clone();
            tokio::spawn(async move {
                coord.poll_leader_status().await;
            });
        }
    }

    // --- receive handlers -----------------------------------------------

    /// Handle a heartbeat broadcast from a claimed leader.
    pub async fn on_heartbeat(self: &Arc<Self>, sender: ReplicaId, leader: ReplicaId, regency: Regency) {
        let discover = {
            let mut record = self.heartbeat.lock();
            if leader == self.view.leader() {
                *record = Some(LivenessRecord {
                    received_at: Instant::now(),
                    leader,
                    regency,
                });
                regency != self.view.regency()
            } else {
                true
            }
        };
        if discover {
            debug!(sender, leader, regency, "conflicting heartbeat, starting leader discovery");
            self.broadcast_leader_request().await;
        }
    }

    /// Answer a leader request with this replica's current belief.
    pub async fn on_leader_request(&self, sender: ReplicaId, sequence: Sequence) {
        let response = LivenessMessage::LeaderResponse {
            sender: self.config.replica_id,
            leader: self.view.leader(),
            sequence,
            last_regency: self.view.regency(),
        };
        if let Err(e) = self.transport.unicast(sender, response).await {
            debug!(target = sender, error = %e, "leader response send failed");
        }
    }

    /// Fold a leader response into the active discovery round and apply
    /// the decision once the tally reaches quorum.
    pub fn on_leader_response(
        self: &Arc<Self>,
        sender: ReplicaId,
        leader: ReplicaId,
        sequence: Sequence,
        last_regency: Regency,
    ) {
        let decision = {
            let mut discovery = self.discovery.lock();
            if discovery.last_sequence != Some(sequence) {
                debug!(
                    sender,
                    sequence,
                    active = ?discovery.last_sequence,
                    "stale leader response dropped"
                );
                return;
            }
            let round = discovery.rounds.get_or_insert_mut(sequence, PendingRound::default);
            round.votes.insert(sender, (leader, last_regency));
            let decision = quorum::tally(&round.votes, self.config.quorum());
            if decision.is_some() {
                if let Some(task) = discovery.retransmit.take() {
                    task.cancel();
                }
                discovery.request_in_flight = false;
            }
            decision
        };
        if let Some(decision) = decision {
            self.apply_decision(decision);
        }
    }

    /// Answer a status poll with this replica's verdict on the requester's
    /// leader.
    pub async fn on_leader_status_request(&self, sender: ReplicaId, sequence: Sequence, leader: ReplicaId) {
        let status = if leader != self.view.leader() {
            LeaderHealth::LeaderMismatch
        } else {
            self.local_health()
        };
        debug!(sender, sequence, ?status, "answering leader status poll");
        let response = LivenessMessage::LeaderStatusResponse {
            sender: self.config.replica_id,
            sequence,
            leader: self.view.leader(),
            status,
        };
        if let Err(e) = self.transport.unicast(sender, response).await {
            debug!(target = sender, error = %e, "status response send failed");
        }
    }

    /// Record a status reply into the active poll round, if any.
    pub fn on_leader_status_response(
        &self,
        sender: ReplicaId,
        sequence: Sequence,
        leader: ReplicaId,
        status: LeaderHealth,
    ) {
        let reply = StatusReply { status, leader };
        if !self.barrier.record(sender, sequence, reply) {
            debug!(sender, sequence, "status reply for superseded poll dropped");
        }
    }

    /// Dispatch one received message to its handler.
    pub async fn handle_message(self: &Arc<Self>, msg: LivenessMessage) {
        match msg {
            LivenessMessage::Heartbeat { sender, leader, regency } => {
                self.on_heartbeat(sender, leader, regency).await;
            }
            LivenessMessage::LeaderRequest { sender, sequence } => {
                self.on_leader_request(sender, sequence).await;
            }
            LivenessMessage::LeaderResponse { sender, leader, sequence, last_regency } => {
                self.on_leader_response(sender, leader, sequence, last_regency);
            }
            LivenessMessage::LeaderStatusRequest { sender, sequence, leader } => {
                self.on_leader_status_request(sender, sequence, leader).await;
            }
            LivenessMessage::LeaderStatusResponse { sender, sequence, leader, status } => {
                self.on_leader_status_response(sender, sequence, leader, status);
            }
        }
    }

    /// Receive loop wiring the transport to the handlers, for embedders
    /// whose transport does not run its own dispatch threads.
    pub async fn run_dispatch_loop(self: Arc<Self>) {
        loop {
            tokio::select! {
                result = self.transport.recv() => match result {
                    Ok((_, msg)) => {
                        debug!(sender = msg.sender(), "dispatching liveness message");
                        self.handle_message(msg).await;
                    }
                    Err(_) => break,
                },
                _ = self.shutdown.notified() => break,
            }
        }
    }

    // --- leader discovery -----------------------------------------------

    /// Start a leader-discovery round, unless one is already in flight and
    /// younger than the re-issue interval.
    pub async fn broadcast_leader_request(self: &Arc<Self>) {
        let sequence = Self::next_sequence();
        let started = {
            let mut discovery = self.discovery.lock();
            let reissue_due = discovery
                .last_sent_at
                .map_or(true, |at| at.elapsed() > self.config.request_reissue_interval);
            if discovery.request_in_flight && !reissue_due {
                false
            } else {
                discovery.last_sent_at = Some(Instant::now());
                discovery.last_sequence = Some(sequence);
                discovery.request_in_flight = true;
                discovery.rounds.put(sequence, PendingRound::default());
                // At most one live retransmitter: cancel before re-arming.
                if let Some(task) = discovery.retransmit.take() {
                    task.cancel();
                }
                let coord = self.clone();
                discovery.retransmit = Some(spawn_periodic(
                    self.config.request_resend_interval,
                    self.config.request_resend_interval,
                    move || {
                        let coord = coord.clone();
                        async move { coord.retry_tally(sequence) }
                    },
                ));
                true
            }
        };
        if started {
            info!(sequence, "broadcasting leader request");
            let msg = LivenessMessage::LeaderRequest {
                sender: self.config.replica_id,
                sequence,
            };
            self.transport.broadcast(&self.config.other_replicas(), msg).await;
        }
    }

    /// Retransmission-task body: re-run the tally against accumulated
    /// votes until the round is decided or superseded.
    fn retry_tally(self: &Arc<Self>, sequence: Sequence) {
        let decision = {
            let mut discovery = self.discovery.lock();
            if discovery.last_sequence != Some(sequence) {
                // Superseded; the new round's arming already cancelled us.
                return;
            }
            let decision = discovery
                .rounds
                .get(&sequence)
                .and_then(|round| quorum::tally(&round.votes, self.config.quorum()));
            if decision.is_some() {
                if let Some(task) = discovery.retransmit.take() {
                    task.cancel();
                }
                discovery.request_in_flight = false;
            }
            decision
        };
        if let Some(decision) = decision {
            self.apply_decision(decision);
        }
    }

    /// Apply a decided (leader, regency) pair: update the shared view,
    /// restart the timers, and clear retransmissions armed against the
    /// superseded regency.
    fn apply_decision(self: &Arc<Self>, decision: LeaderDecision) {
        if decision.leader != self.view.leader() || decision.regency != self.view.regency() {
            info!(
                leader = decision.leader,
                regency = decision.regency,
                "applying leader discovery decision"
            );
            self.view.set_leader(decision.leader);
            self.view.set_regency(decision.regency);
            self.restart();
        }
        self.view.cancel_pending_retransmissions(self.view.regency());
    }

    // --- status poll ----------------------------------------------------

    /// This replica's own verdict on its leader's health.
    fn local_health(&self) -> LeaderHealth {
        if self.view.leader() == self.config.replica_id {
            return LeaderHealth::Normal;
        }
        if !self.view.connections_established() {
            // Grace period: never declare a timeout before the mesh is up.
            return LeaderHealth::Normal;
        }
        match &*self.heartbeat.lock() {
            None => LeaderHealth::Timeout,
            Some(record) if record.received_at.elapsed() > self.config.heartbeat_timeout => {
                LeaderHealth::Timeout
            }
            Some(_) => LeaderHealth::Normal,
        }
    }

    /// Poll peers for the leader's health and escalate to a leader change
    /// when strictly more than f corroborate the timeout.
    ///
    /// Blocks the calling task (not the process) for up to `status_wait`.
    pub async fn poll_leader_status(&self) {
        let sequence = Self::next_sequence();
        {
            let mut status = self.status.lock();
            let spaced = status.last_poll_sequence.map_or(true, |last| {
                sequence.saturating_sub(last) > self.config.status_poll_interval.as_millis() as u64
            });
            if !spaced || status.leader_change_in_progress {
                debug!(sequence, "status poll suppressed");
                return;
            }
            status.last_poll_sequence = Some(sequence);
        }

        let peers = self.config.other_replicas();
        self.barrier.arm(sequence, peers.len());
        info!(sequence, "polling peers for leader status");
        let msg = LivenessMessage::LeaderStatusRequest {
            sender: self.config.replica_id,
            sequence,
            leader: self.view.leader(),
        };
        self.transport.broadcast(&peers, msg).await;

        let replies = self.barrier.wait_for_replies(self.config.status_wait).await;
        if self.barrier.sequence() != Some(sequence) {
            debug!(sequence, "status poll superseded during wait");
            return;
        }

        let timeouts = replies
            .values()
            .filter(|reply| reply.status == LeaderHealth::Timeout)
            .count();
        if timeouts >= self.config.corroboration() {
            let fire = {
                let mut status = self.status.lock();
                if status.leader_change_in_progress {
                    false
                } else {
                    status.leader_change_in_progress = true;
                    true
                }
            };
            if fire {
                warn!(
                    sequence,
                    timeouts, "timeout corroborated by more than f peers, triggering leader change"
                );
                self.view.trigger_leader_change();
            }
        } else {
            debug!(sequence, timeouts, "status poll lapsed without corroboration");
        }
    }
}
