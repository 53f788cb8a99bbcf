//! Leader-liveness failure detection for a BFT replication engine.
//!
//! Decides, from unreliable heartbeats and quorum voting among N replicas
//! tolerating up to f Byzantine faults, whether the current leader is alive,
//! and triggers the external view/leader-change protocol exactly once per
//! failure episode.
//!
//! # Architecture
//!
//! - The current leader broadcasts periodic heartbeats
//! - Followers check heartbeat staleness on their own schedule
//! - Conflicting leader information starts a leader-discovery round that
//!   accepts a new (leader, regency) only on 2f+1 matching votes
//! - A stale heartbeat starts a status poll that escalates to a leader
//!   change only after more than f peers corroborate the timeout
//!
//! # Modules
//!
//! - [`config`]: Protocol configuration (cluster size, timeouts, intervals)
//! - [`message`]: Wire protocol messages (heartbeat, leader request/response, status poll)
//! - [`transport`]: Transport abstraction for network I/O
//! - [`view`]: Interface to the external agreement/view-change layer
//! - [`coordinator`]: The central timer/state owner

pub mod config;
pub mod coordinator;
pub mod message;
pub mod quorum;
pub mod status;
pub mod timer;
pub mod transport;
pub mod view;

pub use config::{ConfigError, LivenessConfig};
pub use coordinator::HeartbeatCoordinator;
pub use message::{LeaderHealth, LivenessMessage};
pub use quorum::{tally, LeaderDecision};
pub use status::{StatusPollBarrier, StatusReply};
pub use transport::{create_transport_mesh, InMemoryTransport, LivenessTransport};
pub use view::{SharedView, ViewController};

/// Identifier of a replica in the current view.
pub type ReplicaId = u32;

/// Monotonically increasing epoch number of a leader's term.
pub type Regency = u64;

/// Round correlation number, wall-clock derived and strictly increasing
/// per origin.
pub type Sequence = u64;

/// Liveness protocol errors.
#[derive(Debug, thiserror::Error)]
pub enum LivenessError {
    #[error("Transport error: {0}")]
    Transport(String),

    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),
}
