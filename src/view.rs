//! Interface to the external agreement/view-change layer.
//!
//! The liveness subsystem only decides *when* to invoke the heavier
//! view-change protocol; the replicated view state itself (current leader,
//! regency) and the protocol machinery live behind this trait.

use crate::{Regency, ReplicaId};
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, AtomicUsize, Ordering};

/// The external agreement/view-change collaborator.
///
/// Implementations must be safe to call concurrently from the periodic
/// tasks and the transport delivery threads.
pub trait ViewController: Send + Sync + 'static {
    /// The replica currently believed to be leader.
    fn leader(&self) -> ReplicaId;

    /// Replace the believed leader.
    fn set_leader(&self, leader: ReplicaId);

    /// The current (last) regency.
    fn regency(&self) -> Regency;

    /// Replace the regency (last and next).
    fn set_regency(&self, regency: Regency);

    /// Whether inter-replica connections are fully established.
    ///
    /// Used as a grace-period gate: no timeout is declared before this
    /// returns true.
    fn connections_established(&self) -> bool;

    /// Start the heavier view-change protocol.
    ///
    /// Invoked at most once per escalation; must tolerate being invoked
    /// again only after [`HeartbeatCoordinator::leader_change_complete`]
    /// has been signalled.
    ///
    /// [`HeartbeatCoordinator::leader_change_complete`]: crate::coordinator::HeartbeatCoordinator::leader_change_complete
    fn trigger_leader_change(&self);

    /// Cancel protocol retransmissions tied to a superseded regency.
    fn cancel_pending_retransmissions(&self, regency: Regency);
}

/// Atomics-backed [`ViewController`] for tests and simple embeddings.
///
/// Records every trigger and cancellation so tests can assert on the
/// exactly-once escalation property.
pub struct SharedView {
    leader: AtomicU32,
    regency: AtomicU64,
    connections_established: AtomicBool,
    triggers: AtomicUsize,
    cancellations: parking_lot::Mutex<Vec<Regency>>,
}

impl SharedView {
    /// Create a view believing in the given leader at regency 0.
    pub fn new(leader: ReplicaId) -> Self {
        Self {
            leader: AtomicU32::new(leader),
            regency: AtomicU64::new(0),
            connections_established: AtomicBool::new(true),
            triggers: AtomicUsize::new(0),
            cancellations: parking_lot::Mutex::new(Vec::new()),
        }
    }

    /// Simulate the connection-establishment grace period.
    pub fn set_connections_established(&self, established: bool) {
        self.connections_established
            .store(established, Ordering::SeqCst);
    }

    /// Number of leader-change triggers observed.
    pub fn trigger_count(&self) -> usize {
        self.triggers.load(Ordering::SeqCst)
    }

    /// Regencies for which retransmission cancellation was requested.
    pub fn cancelled_regencies(&self) -> Vec<Regency> {
        self.cancellations.lock().clone()
    }
}

impl ViewController for SharedView {
    fn leader(&self) -> ReplicaId {
        self.leader.load(Ordering::SeqCst)
    }

    fn set_leader(&self, leader: ReplicaId) {
        self.leader.store(leader, Ordering::SeqCst);
    }

    fn regency(&self) -> Regency {
        self.regency.load(Ordering::SeqCst)
    }

    fn set_regency(&self, regency: Regency) {
        self.regency.store(regency, Ordering::SeqCst);
    }

    fn connections_established(&self) -> bool {
        self.connections_established.load(Ordering::SeqCst)
    }

    fn trigger_leader_change(&self) {
        self.triggers.fetch_add(1, Ordering::SeqCst);
    }

    fn cancel_pending_retransmissions(&self, regency: Regency) {
        self.cancellations.lock().push(regency);
    }
}
