//! Transport abstraction for liveness protocol communication.
//!
//! Defines the `LivenessTransport` trait for pluggable transport
//! implementations:
//! - In-memory channels for unit and cluster testing
//! - The embedding engine's authenticated channels in production
//!
//! Delivery is fire-and-forget: not guaranteed, not ordered across calls.

use crate::message::LivenessMessage;
use crate::{LivenessError, ReplicaId};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::debug;

/// Transport abstraction for liveness protocol communication.
#[async_trait]
pub trait LivenessTransport: Send + Sync + 'static {
    /// Send a message to a single replica.
    async fn unicast(&self, target: ReplicaId, msg: LivenessMessage) -> Result<(), LivenessError>;

    /// Receive a message (blocking until one arrives).
    async fn recv(&self) -> Result<(ReplicaId, LivenessMessage), LivenessError>;

    /// Best-effort send to a set of replicas.
    ///
    /// Individual send failures are logged and swallowed; a slow or dead
    /// peer must never fail the whole broadcast.
    async fn broadcast(&self, targets: &[ReplicaId], msg: LivenessMessage) {
        for target in targets {
            if let Err(e) = self.unicast(*target, msg.clone()).await {
                debug!(target = *target, error = %e, "broadcast send failed");
            }
        }
    }
}

/// In-memory transport for testing.
///
/// Uses tokio channels to simulate network communication without actual
/// I/O. Useful for deterministic unit tests and multi-replica clusters in
/// one process.
pub struct InMemoryTransport {
    /// This replica's id
    local_id: ReplicaId,

    /// Channels to other replicas (id → sender)
    peers: Arc<parking_lot::RwLock<HashMap<ReplicaId, mpsc::Sender<(ReplicaId, LivenessMessage)>>>>,

    /// Receiver for incoming messages
    rx: Arc<tokio::sync::Mutex<mpsc::Receiver<(ReplicaId, LivenessMessage)>>>,
}

impl InMemoryTransport {
    /// Create a new in-memory transport.
    ///
    /// Returns the transport and a sender that can be shared with other
    /// transports.
    pub fn new(local_id: ReplicaId) -> (Self, mpsc::Sender<(ReplicaId, LivenessMessage)>) {
        let (tx, rx) = mpsc::channel(128);

        let transport = Self {
            local_id,
            peers: Arc::new(parking_lot::RwLock::new(HashMap::new())),
            rx: Arc::new(tokio::sync::Mutex::new(rx)),
        };

        (transport, tx)
    }

    /// Add a peer's sender to this transport.
    pub fn add_peer(&self, id: ReplicaId, sender: mpsc::Sender<(ReplicaId, LivenessMessage)>) {
        self.peers.write().insert(id, sender);
    }

    /// Remove a peer, simulating a severed connection.
    pub fn remove_peer(&self, id: ReplicaId) {
        self.peers.write().remove(&id);
    }

    /// Check if a peer is connected.
    pub fn has_peer(&self, id: ReplicaId) -> bool {
        self.peers.read().contains_key(&id)
    }

    /// Get the number of connected peers.
    pub fn peer_count(&self) -> usize {
        self.peers.read().len()
    }
}

#[async_trait]
impl LivenessTransport for InMemoryTransport {
    async fn unicast(&self, target: ReplicaId, msg: LivenessMessage) -> Result<(), LivenessError> {
        let sender = {
            let peers = self.peers.read();
            peers.get(&target).cloned()
        };

        match sender {
            Some(tx) => {
                tx.send((self.local_id, msg))
                    .await
                    .map_err(|_| LivenessError::Transport("peer channel closed".to_string()))?;
                Ok(())
            }
            None => Err(LivenessError::Transport(format!(
                "peer not found: {}",
                target
            ))),
        }
    }

    async fn recv(&self) -> Result<(ReplicaId, LivenessMessage), LivenessError> {
        let mut rx = self.rx.lock().await;
        rx.recv()
            .await
            .ok_or_else(|| LivenessError::Transport("receive channel closed".to_string()))
    }
}

/// Create a fully connected mesh of in-memory transports.
///
/// Returns a map of replica id → transport, where each transport can reach
/// all others.
pub fn create_transport_mesh(ids: &[ReplicaId]) -> HashMap<ReplicaId, Arc<InMemoryTransport>> {
    let mut transports = HashMap::new();
    let mut senders = HashMap::new();

    for id in ids {
        let (transport, sender) = InMemoryTransport::new(*id);
        transports.insert(*id, Arc::new(transport));
        senders.insert(*id, sender);
    }

    for id in ids {
        let transport = &transports[id];
        for (peer_id, sender) in &senders {
            if peer_id != id {
                transport.add_peer(*peer_id, sender.clone());
            }
        }
    }

    transports
}
