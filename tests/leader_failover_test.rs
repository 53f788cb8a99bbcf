//! End-to-end leader failover scenarios.
//!
//! Four replicas, f = 1, communicating over an in-memory transport mesh.
//! When the leader goes silent, every follower must independently
//! corroborate the timeout with its peers and trigger the leader-change
//! protocol exactly once; while heartbeats flow, nobody triggers anything.

use bft_liveness::{
    create_transport_mesh, HeartbeatCoordinator, InMemoryTransport, LivenessConfig, ReplicaId,
    SharedView, ViewController,
};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

struct TestReplica {
    coordinator: Arc<HeartbeatCoordinator<InMemoryTransport, SharedView>>,
    view: Arc<SharedView>,
}

fn init_logging() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .try_init();
}

fn fast_config(replica_id: ReplicaId) -> LivenessConfig {
    LivenessConfig::new(4, 1, replica_id)
        .with_heartbeat_period(Duration::from_millis(20))
        .with_heartbeat_timeout(Duration::from_millis(80))
        .with_startup_delays(Duration::from_millis(10), Duration::from_millis(60))
        .with_status_poll(Duration::from_millis(300), Duration::from_millis(150))
        .with_request_intervals(Duration::from_millis(50), Duration::from_secs(60))
}

/// Build replicas for the given `(id, believed_leader)` pairs over a
/// four-wide mesh. Ids left out model crashed replicas: their mesh
/// endpoint is dropped, so sends to them fail silently.
fn build_cluster(beliefs: &[(ReplicaId, ReplicaId)]) -> HashMap<ReplicaId, TestReplica> {
    init_logging();
    let mut mesh = create_transport_mesh(&[0, 1, 2, 3]);
    beliefs
        .iter()
        .map(|(id, leader)| {
            let transport = mesh.remove(id).unwrap();
            let view = Arc::new(SharedView::new(*leader));
            let coordinator = Arc::new(
                HeartbeatCoordinator::new(fast_config(*id), transport, view.clone()).unwrap(),
            );
            (*id, TestReplica { coordinator, view })
        })
        .collect()
}

fn start_all(replicas: &HashMap<ReplicaId, TestReplica>) {
    for replica in replicas.values() {
        replica.coordinator.start();
        tokio::spawn(replica.coordinator.clone().run_dispatch_loop());
    }
}

#[tokio::test]
async fn test_silent_leader_triggers_exactly_one_change_per_follower() {
    // Replica 0 is the believed leader but never comes up.
    let replicas = build_cluster(&[(1, 0), (2, 0), (3, 0)]);
    start_all(&replicas);

    // Each follower: staleness fires within one check period, the poll
    // waits out its bound (replica 0 never answers), and the two Timeout
    // replies from the other followers corroborate (2 > f = 1).
    tokio::time::sleep(Duration::from_millis(700)).await;

    for (id, replica) in &replicas {
        assert_eq!(
            replica.view.trigger_count(),
            1,
            "replica {} must trigger the leader change exactly once",
            id
        );
        assert!(replica.coordinator.leader_change_in_progress());
    }

    for replica in replicas.values() {
        replica.coordinator.shutdown();
    }
}

#[tokio::test]
async fn test_healthy_leader_never_triggers() {
    let replicas = build_cluster(&[(0, 0), (1, 0), (2, 0), (3, 0)]);
    start_all(&replicas);

    tokio::time::sleep(Duration::from_millis(500)).await;

    for (id, replica) in &replicas {
        assert_eq!(
            replica.view.trigger_count(),
            0,
            "replica {} must not trigger while heartbeats flow",
            id
        );
    }
    for id in [1u32, 2, 3] {
        assert_eq!(
            replicas[&id].coordinator.last_heartbeat(),
            Some((0, 0)),
            "replica {} must have recorded the leader's heartbeat",
            id
        );
        assert!(replicas[&id].coordinator.last_heartbeat_age().unwrap() < Duration::from_millis(80));
    }

    for replica in replicas.values() {
        replica.coordinator.shutdown();
    }
}

#[tokio::test]
async fn test_lagging_replica_converges_via_leader_discovery() {
    // Replicas 0, 1, 3 already follow leader 1 at regency 1; replica 2
    // still believes the deposed leader 0.
    let replicas = build_cluster(&[(0, 1), (1, 1), (2, 0), (3, 1)]);
    for id in [0u32, 1, 3] {
        replicas[&id].view.set_regency(1);
    }
    start_all(&replicas);

    // Leader 1's heartbeat conflicts with replica 2's belief, which makes
    // replica 2 run a leader-discovery round; 0, 1 and 3 all answer
    // (leader 1, regency 1), reaching the 2f+1 quorum.
    tokio::time::sleep(Duration::from_millis(300)).await;

    assert_eq!(replicas[&2].view.leader(), 1);
    assert_eq!(replicas[&2].view.regency(), 1);
    assert_eq!(replicas[&2].view.cancelled_regencies(), vec![1]);
    for replica in replicas.values() {
        assert_eq!(replica.view.trigger_count(), 0);
    }

    for replica in replicas.values() {
        replica.coordinator.shutdown();
    }
}
