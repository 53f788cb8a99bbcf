//! Status-poll barrier.
//!
//! Collects one leader-health reply per expected peer for a single poll
//! round, and releases the waiting escalation task once all expected
//! replies arrive or a bounded wait elapses. Lapsing with partial results
//! is a normal termination path, not an error.

use crate::message::LeaderHealth;
use crate::{ReplicaId, Sequence};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::time::Duration;
use tokio::sync::Notify;
use tokio::time::Instant;

/// A single peer's reply to a status poll.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StatusReply {
    /// The replier's health verdict.
    pub status: LeaderHealth,

    /// The leader the replier believes in.
    pub leader: ReplicaId,
}

#[derive(Default)]
struct BarrierState {
    sequence: Option<Sequence>,
    expected: usize,
    replies: HashMap<ReplicaId, StatusReply>,
}

/// Resettable barrier correlating status replies to the active poll round.
///
/// Re-arming for a new round supersedes the previous one atomically: late
/// replies carrying the old sequence become no-ops, and a waiter from the
/// old round sees the sequence change and suppresses its consequence.
pub struct StatusPollBarrier {
    state: Mutex<BarrierState>,
    notify: Notify,
}

impl StatusPollBarrier {
    /// Create an unarmed barrier.
    pub fn new() -> Self {
        Self {
            state: Mutex::new(BarrierState::default()),
            notify: Notify::new(),
        }
    }

    /// Arm the barrier for a new poll round.
    ///
    /// Panics if `expected` is zero: polling with no remote peers is a
    /// local defect, not a runtime condition.
    pub fn arm(&self, sequence: Sequence, expected: usize) {
        assert!(expected > 0, "status poll armed with zero expected peers");
        let mut state = self.state.lock();
        state.sequence = Some(sequence);
        state.expected = expected;
        state.replies.clear();
        drop(state);
        // Wake any waiter still parked on the superseded round.
        self.notify.notify_waiters();
    }

    /// Record a reply if it belongs to the active round.
    ///
    /// Idempotent per sender (last write wins). Returns false for replies
    /// bearing a stale or unknown sequence.
    pub fn record(&self, sender: ReplicaId, sequence: Sequence, reply: StatusReply) -> bool {
        let complete = {
            let mut state = self.state.lock();
            if state.sequence != Some(sequence) {
                return false;
            }
            state.replies.insert(sender, reply);
            state.replies.len() >= state.expected
        };
        if complete {
            self.notify.notify_waiters();
        }
        true
    }

    /// The sequence of the currently armed round, if any.
    pub fn sequence(&self) -> Option<Sequence> {
        self.state.lock().sequence
    }

    /// Number of replies collected so far for the active round.
    pub fn reply_count(&self) -> usize {
        self.state.lock().replies.len()
    }

    /// Wait until all expected replies arrive or `timeout` elapses, then
    /// return whatever has accumulated.
    pub async fn wait_for_replies(&self, timeout: Duration) -> HashMap<ReplicaId, StatusReply> {
        let deadline = Instant::now() + timeout;
        loop {
            // Register interest before checking state so a reply landing
            // between the check and the await still wakes us.
            let notified = self.notify.notified();
            {
                let state = self.state.lock();
                if state.expected > 0 && state.replies.len() >= state.expected {
                    return state.replies.clone();
                }
            }
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                break;
            }
            let _ = tokio::time::timeout(remaining, notified).await;
        }
        self.state.lock().replies.clone()
    }
}

impl Default for StatusPollBarrier {
    fn default() -> Self {
        Self::new()
    }
}
