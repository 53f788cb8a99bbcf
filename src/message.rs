//! Liveness protocol messages.
//!
//! Wire format for heartbeat broadcast, leader discovery, and leader status
//! polling. Encoding and authentication belong to the transport layer.

use crate::{Regency, ReplicaId, Sequence};
use serde::{Deserialize, Serialize};

/// Health verdict a replica reports about the polled leader.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum LeaderHealth {
    /// Heartbeats are fresh (or the replica cannot judge yet).
    Normal,

    /// No heartbeat recorded within the configured timeout.
    Timeout,

    /// The requester's believed leader differs from the local belief.
    LeaderMismatch,
}

/// Liveness protocol messages.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub enum LivenessMessage {
    /// Periodic broadcast from whichever replica believes it is leader.
    Heartbeat {
        /// Sending replica
        sender: ReplicaId,
        /// The leader the sender claims (itself)
        leader: ReplicaId,
        /// The sender's current regency
        regency: Regency,
    },

    /// Broadcast by a replica that suspects its leader view is wrong.
    LeaderRequest {
        /// Sending replica
        sender: ReplicaId,
        /// Round correlation number
        sequence: Sequence,
    },

    /// Reply to a [`LivenessMessage::LeaderRequest`], echoing the replier's
    /// current belief.
    LeaderResponse {
        /// Replying replica
        sender: ReplicaId,
        /// The leader the replier currently believes in
        leader: ReplicaId,
        /// Sequence of the request being answered
        sequence: Sequence,
        /// The replier's current regency
        last_regency: Regency,
    },

    /// Poll asking peers to judge the health of a specific leader.
    LeaderStatusRequest {
        /// Polling replica
        sender: ReplicaId,
        /// Poll round correlation number
        sequence: Sequence,
        /// The leader whose health is being polled
        leader: ReplicaId,
    },

    /// Reply to a [`LivenessMessage::LeaderStatusRequest`].
    LeaderStatusResponse {
        /// Replying replica
        sender: ReplicaId,
        /// Sequence of the poll being answered
        sequence: Sequence,
        /// The leader the replier currently believes in
        leader: ReplicaId,
        /// The replier's health verdict
        status: LeaderHealth,
    },
}

impl LivenessMessage {
    /// The replica that sent this message.
    pub fn sender(&self) -> ReplicaId {
        match self {
            LivenessMessage::Heartbeat { sender, .. }
            | LivenessMessage::LeaderRequest { sender, .. }
            | LivenessMessage::LeaderResponse { sender, .. }
            | LivenessMessage::LeaderStatusRequest { sender, .. }
            | LivenessMessage::LeaderStatusResponse { sender, .. } => *sender,
        }
    }
}
