//! Quorum tally for leader-discovery rounds.
//!
//! Turns a set of collected leader responses into a majority decision, or
//! "no decision yet". Leader and regency majorities are computed
//! independently, so replicas that agree on the leader but are transiently
//! behind on regency (or vice versa) do not block a decision.

use crate::{Regency, ReplicaId};
use std::collections::HashMap;

/// Outcome of a decided leader-discovery round.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LeaderDecision {
    /// The modal leader.
    pub leader: ReplicaId,

    /// The modal regency.
    pub regency: Regency,
}

/// Tally deduplicated votes into a decision.
///
/// `votes` maps each sender to its `(leader, regency)` belief; keying by
/// sender is what makes duplicate responses idempotent. Returns a decision
/// only when the modal leader and the modal regency each reach `quorum`
/// (2f+1) distinct senders.
///
/// Ties among equal counts resolve by iteration order, which is not
/// deterministic across maps; this is inconsequential because only strict
/// supermajorities are ever accepted.
pub fn tally(votes: &HashMap<ReplicaId, (ReplicaId, Regency)>, quorum: usize) -> Option<LeaderDecision> {
    if votes.len() < quorum {
        return None;
    }

    let mut leader_counts: HashMap<ReplicaId, usize> = HashMap::new();
    let mut regency_counts: HashMap<Regency, usize> = HashMap::new();
    for (leader, regency) in votes.values() {
        *leader_counts.entry(*leader).or_default() += 1;
        *regency_counts.entry(*regency).or_default() += 1;
    }

    let (leader, leader_count) = mode(&leader_counts)?;
    let (regency, regency_count) = mode(&regency_counts)?;

    if leader_count >= quorum && regency_count >= quorum {
        Some(LeaderDecision { leader, regency })
    } else {
        None
    }
}

fn mode<K: Copy>(counts: &HashMap<K, usize>) -> Option<(K, usize)> {
    counts
        .iter()
        .max_by_key(|(_, count)| **count)
        .map(|(k, count)| (*k, *count))
}
