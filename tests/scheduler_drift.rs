//! Scheduler behavior: heartbeat, drift remediation, metrics, rotation, pruning

mod common;

use armor_control::config::RetentionConfig;
use armor_control::control::Actor;
use armor_control::models::{NodeStatus, NotificationKind, PeerMetric};
use armor_control::monitoring::{FleetMonitor, MetricType};
use armor_control::scheduler::{HeartbeatJob, Job, MetricsJob, PruningJob, RemediationQueue, RotationJob};
use armor_control::store::RecordStore;
use armor_control::wireguard::DevicePeer;
use chrono::{Duration, Utc};
use common::{fleet, Fleet};
use std::sync::Arc;

struct Harness {
    fleet: Fleet,
    monitor: Arc<FleetMonitor>,
    queue: Arc<RemediationQueue>,
    heartbeat: HeartbeatJob,
}

async fn harness() -> Harness {
    let fleet = fleet("10.8.0.0/22", &["edge-a"]).await;
    let monitor = Arc::new(FleetMonitor::new());
    let queue = Arc::new(RemediationQueue::new(fleet.plane.clone(), monitor.clone()));
    let heartbeat = HeartbeatJob::new(fleet.plane.clone(), monitor.clone(), queue.clone());
    Harness {
        fleet,
        monitor,
        queue,
        heartbeat,
    }
}

#[tokio::test]
async fn test_matching_fingerprint_triggers_nothing() {
    let h = harness().await;
    let admin = Actor::new(1, "203.0.113.5");
    h.fleet.plane.provision_peer(&admin, Some(1), "phone").await.unwrap();
    assert_eq!(h.fleet.agent.push_count(), 1);

    h.heartbeat.run().await.unwrap();
    h.queue.wait_idle().await;

    assert_eq!(h.fleet.agent.push_count(), 1);
    let node = h.fleet.store.get_node(1).await.unwrap();
    assert_eq!(node.status, NodeStatus::Online);
    assert_eq!(node.observed_fingerprint, node.desired_fingerprint);
    assert!(node.public_key.is_some());
}

#[tokio::test]
async fn test_mismatch_triggers_exactly_one_remediation() {
    let h = harness().await;
    let admin = Actor::new(1, "203.0.113.5");
    h.fleet.plane.provision_peer(&admin, Some(1), "phone").await.unwrap();
    let desired = h.fleet.store.get_node(1).await.unwrap().desired_fingerprint;

    h.fleet.agent.report_hash("stale-hash");
    h.heartbeat.run().await.unwrap();
    // Second heartbeat before the queued job ran is coalesced.
    h.heartbeat.run().await.unwrap();
    h.queue.wait_idle().await;

    assert_eq!(h.fleet.agent.push_count(), 2);
    assert_eq!(h.fleet.agent.firewall_pushes.load(std::sync::atomic::Ordering::SeqCst), 1);
    assert_eq!(h.monitor.get_stats(1).unwrap().drift_detections, 2);
    assert_eq!(h.monitor.metrics().get(MetricType::Remediations).unwrap().value, 1.0);

    let notifications = h.fleet.store.list_notifications().await.unwrap();
    let drift: Vec<_> = notifications
        .iter()
        .filter(|n| n.kind == NotificationKind::Warning)
        .collect();
    assert_eq!(drift.len(), 1);
    assert_eq!(drift[0].user_id, 0);

    // The re-push restored the reported hash; the next heartbeat is quiet.
    h.heartbeat.run().await.unwrap();
    h.queue.wait_idle().await;
    assert_eq!(h.fleet.agent.push_count(), 2);
    assert_eq!(h.fleet.store.get_node(1).await.unwrap().desired_fingerprint, desired);
}

#[tokio::test]
async fn test_heartbeat_leaves_syncing_node_alone() {
    let h = harness().await;
    let admin = Actor::new(1, "203.0.113.5");
    h.fleet.plane.provision_peer(&admin, Some(1), "phone").await.unwrap();

    // A manual sync is mid-flight: the agent already holds the new hash but
    // the desired fingerprint has not been stored yet.
    h.fleet.store.set_node_status(1, NodeStatus::Syncing).await.unwrap();
    h.fleet.agent.report_hash("hash-of-the-pending-sync");

    h.heartbeat.run().await.unwrap();
    h.heartbeat.run().await.unwrap();
    h.queue.wait_idle().await;

    let node = h.fleet.store.get_node(1).await.unwrap();
    assert_eq!(node.status, NodeStatus::Syncing);
    assert_eq!(node.observed_fingerprint.as_deref(), Some("hash-of-the-pending-sync"));
    assert!(node.last_seen.is_some());
    assert_eq!(h.fleet.agent.push_count(), 1);
    assert_eq!(h.monitor.get_stats(1).unwrap().drift_detections, 0);

    // Once the sync finishes the node is judged normally again.
    h.fleet.store.set_node_status(1, NodeStatus::Online).await.unwrap();
    h.heartbeat.run().await.unwrap();
    h.queue.wait_idle().await;
    assert_eq!(h.fleet.agent.push_count(), 2);
}

#[tokio::test]
async fn test_no_desired_fingerprint_means_no_drift() {
    let h = harness().await;
    h.fleet.agent.report_hash("anything");

    h.heartbeat.run().await.unwrap();
    h.queue.wait_idle().await;

    assert_eq!(h.fleet.agent.push_count(), 0);
    assert_eq!(h.queue.pending(), 0);
}

#[tokio::test]
async fn test_unreachable_node_goes_offline_and_keeps_fingerprint() {
    let h = harness().await;
    let admin = Actor::new(1, "203.0.113.5");
    h.fleet.plane.provision_peer(&admin, Some(1), "phone").await.unwrap();
    h.heartbeat.run().await.unwrap();
    let observed = h.fleet.store.get_node(1).await.unwrap().observed_fingerprint;
    assert!(observed.is_some());

    h.fleet.agent.set_reachable(false);
    let summary = h.heartbeat.run().await.unwrap();
    assert_eq!(summary, "1 online, 1 offline");

    let node = h.fleet.store.get_node(1).await.unwrap();
    assert_eq!(node.status, NodeStatus::Offline);
    assert_eq!(node.observed_fingerprint, observed);

    let core = h.fleet.store.list_nodes().await.unwrap().into_iter().find(|n| n.is_core()).unwrap();
    assert_eq!(core.status, NodeStatus::Online);
}

#[tokio::test]
async fn test_metrics_job_samples_core_and_edge() {
    let h = harness().await;
    let admin = Actor::new(1, "203.0.113.5");
    let core_peer = h.fleet.plane.provision_peer(&admin, None, "laptop").await.unwrap().peer;
    let edge_peer = h.fleet.plane.provision_peer(&admin, Some(1), "phone").await.unwrap().peer;

    h.fleet.host.set_counters("wg0", &core_peer.public_key, 100, 200);
    *h.fleet.agent.device_peers.lock().unwrap() = vec![
        DevicePeer {
            public_key: edge_peer.public_key.clone(),
            rx_bytes: 5,
            tx_bytes: 7,
            ..Default::default()
        },
        DevicePeer {
            public_key: "unknown-key".to_string(),
            ..Default::default()
        },
    ];

    let job = MetricsJob::new(h.fleet.plane.clone(), h.monitor.clone());
    job.run().await.unwrap();

    let samples = h.fleet.store.list_metrics().await.unwrap();
    assert_eq!(samples.len(), 2);
    let core = samples.iter().find(|s| s.peer_id == core_peer.id).unwrap();
    assert_eq!((core.rx_bytes, core.tx_bytes), (100, 200));
    let edge = samples.iter().find(|s| s.peer_id == edge_peer.id).unwrap();
    assert_eq!((edge.node_id, edge.rx_bytes, edge.tx_bytes), (1, 5, 7));
    assert_eq!(h.monitor.metrics().get(MetricType::MetricSamples).unwrap().value, 2.0);
}

#[tokio::test]
async fn test_rotation_job_notifies() {
    let h = harness().await;
    let admin = Actor::new(1, "203.0.113.5");
    h.fleet.plane.provision_peer(&admin, None, "laptop").await.unwrap();

    let job = RotationJob::new(h.fleet.plane.clone(), h.monitor.clone());
    assert_eq!(job.run().await.unwrap(), "1 peers rotated");

    let notifications = h.fleet.store.list_notifications().await.unwrap();
    assert!(notifications
        .iter()
        .any(|n| n.kind == NotificationKind::Info && n.title == "Scheduled key rotation"));
    assert_eq!(h.monitor.metrics().get(MetricType::KeysRotated).unwrap().value, 1.0);
}

#[tokio::test]
async fn test_pruning_job_honors_retention() {
    let h = harness().await;
    let store = &h.fleet.store;
    let sample = |age_days: i64| PeerMetric {
        id: 0,
        peer_id: 1,
        node_id: 1,
        timestamp: Utc::now() - Duration::days(age_days),
        rx_bytes: 0,
        tx_bytes: 0,
    };
    store.insert_metrics(vec![sample(1), sample(8), sample(30)]).await.unwrap();

    let job = PruningJob::new(h.fleet.plane.clone(), RetentionConfig::default());
    job.run().await.unwrap();

    assert_eq!(store.list_metrics().await.unwrap().len(), 1);
}
