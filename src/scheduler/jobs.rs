//! The four periodic reconciliation jobs

use super::{Job, RemediationQueue, Scheduler};
use crate::config::{RetentionConfig, ScheduleConfig};
use crate::control::{Actor, ControlPlane};
use crate::error::Result;
use crate::fingerprint::is_drift;
use crate::models::{Node, NodeStatus, NotificationKind, PeerMetric};
use crate::monitoring::FleetMonitor;
use crate::store::NodeObservation;
use crate::wireguard::DevicePeer;
use async_trait::async_trait;
use chrono::Utc;
use futures::future::join_all;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Build the fleet scheduler with all four jobs registered
pub fn fleet_scheduler(
    plane: Arc<ControlPlane>,
    monitor: Arc<FleetMonitor>,
    schedule: &ScheduleConfig,
    retention: &RetentionConfig,
) -> (Scheduler, Arc<RemediationQueue>) {
    let queue = Arc::new(RemediationQueue::new(Arc::clone(&plane), Arc::clone(&monitor)));
    let mut scheduler = Scheduler::new();

    scheduler.register_periodic(
        Arc::new(HeartbeatJob::new(Arc::clone(&plane), Arc::clone(&monitor), Arc::clone(&queue))),
        Duration::from_secs(schedule.heartbeat_secs),
    );
    scheduler.register_periodic(
        Arc::new(MetricsJob::new(Arc::clone(&plane), Arc::clone(&monitor))),
        Duration::from_secs(schedule.metrics_secs),
    );
    scheduler.register_periodic(
        Arc::new(RotationJob::new(Arc::clone(&plane), Arc::clone(&monitor))),
        Duration::from_secs(schedule.rotation_secs),
    );
    scheduler.register_periodic(
        Arc::new(PruningJob::new(plane, retention.clone())),
        Duration::from_secs(schedule.pruning_secs),
    );

    (scheduler, queue)
}

/// Checks in with every node, records liveness and hands drift to the remediation queue
pub struct HeartbeatJob {
    plane: Arc<ControlPlane>,
    monitor: Arc<FleetMonitor>,
    queue: Arc<RemediationQueue>,
}

impl HeartbeatJob {
    /// Create the job
    pub fn new(plane: Arc<ControlPlane>, monitor: Arc<FleetMonitor>, queue: Arc<RemediationQueue>) -> Self {
        Self { plane, monitor, queue }
    }

    async fn check_in(&self, node: Node) -> NodeStatus {
        let store = self.plane.store();

        if node.is_core() {
            let public_key = self
                .plane
                .controller()
                .public_key(&node.interface_name)
                .await
                .ok();
            if let Err(e) = store
                .record_observation(node.id, NodeObservation::online(None, public_key))
                .await
            {
                warn!(node = %node.name, error = %e, "Failed to record heartbeat");
            }
            self.monitor.record_node(&node, NodeStatus::Online);
            return NodeStatus::Online;
        }

        match self.plane.agent().get_status(&node).await {
            Ok(status) => {
                let observed = status.last_sync_hash;
                let observation = NodeObservation::online(Some(observed.clone()), status.public_key);
                // Drift is judged on the row as it stands after the write, not
                // on the snapshot taken before the status call.
                let current = match store.record_observation(node.id, observation).await {
                    Ok(current) => current,
                    Err(e) => {
                        warn!(node = %node.name, error = %e, "Failed to record heartbeat");
                        self.monitor.record_node(&node, NodeStatus::Online);
                        return NodeStatus::Online;
                    }
                };
                self.monitor.record_node(&current, NodeStatus::Online);

                if current.status == NodeStatus::Syncing {
                    debug!(node = %current.name, "Sync in progress, drift check skipped");
                } else if is_drift(current.desired(), Some(&observed)) {
                    warn!(
                        node = %current.name,
                        desired = current.desired().unwrap_or_default(),
                        observed = %observed,
                        "Configuration drift"
                    );
                    self.monitor.record_drift(current.id);
                    self.queue.submit(current);
                }
                NodeStatus::Online
            }
            Err(e) => {
                debug!(node = %node.name, error = %e, "Heartbeat failed");
                if let Err(e) = store.record_observation(node.id, NodeObservation::offline()).await {
                    warn!(node = %node.name, error = %e, "Failed to record heartbeat");
                }
                self.monitor.record_node(&node, NodeStatus::Offline);
                NodeStatus::Offline
            }
        }
    }
}

#[async_trait]
impl Job for HeartbeatJob {
    fn id(&self) -> &'static str {
        "heartbeat"
    }

    async fn run(&self) -> Result<String> {
        let nodes = self.plane.store().list_nodes().await?;
        let results = join_all(nodes.into_iter().map(|node| self.check_in(node))).await;

        let online = results.iter().filter(|s| **s == NodeStatus::Online).count();
        let offline = results.len() - online;
        Ok(format!("{} online, {} offline", online, offline))
    }
}

/// Persists one traffic sample per known peer on every active node
pub struct MetricsJob {
    plane: Arc<ControlPlane>,
    monitor: Arc<FleetMonitor>,
}

impl MetricsJob {
    /// Create the job
    pub fn new(plane: Arc<ControlPlane>, monitor: Arc<FleetMonitor>) -> Self {
        Self { plane, monitor }
    }

    async fn collect(&self, node: &Node, peer_ids: &HashMap<String, u64>) -> Result<usize> {
        let device_peers: Vec<DevicePeer> = if node.is_core() {
            self.plane
                .controller()
                .device_peers(&node.interface_name)
                .await?
        } else {
            self.plane.agent().get_status(node).await?.peers
        };

        let now = Utc::now();
        let samples: Vec<PeerMetric> = device_peers
            .iter()
            .filter_map(|dp| {
                peer_ids.get(&dp.public_key).map(|&peer_id| PeerMetric {
                    id: 0,
                    peer_id,
                    node_id: node.id,
                    timestamp: now,
                    rx_bytes: dp.rx_bytes,
                    tx_bytes: dp.tx_bytes,
                })
            })
            .collect();

        let count = samples.len();
        if count > 0 {
            self.plane.store().insert_metrics(samples).await?;
        }
        Ok(count)
    }
}

#[async_trait]
impl Job for MetricsJob {
    fn id(&self) -> &'static str {
        "metrics"
    }

    async fn run(&self) -> Result<String> {
        let store = self.plane.store();
        let nodes: Vec<Node> = store
            .list_nodes()
            .await?
            .into_iter()
            .filter(|n| n.is_active)
            .collect();
        let peer_ids: HashMap<String, u64> = store
            .list_peers()
            .await?
            .into_iter()
            .map(|p| (p.public_key, p.id))
            .collect();

        let results = join_all(nodes.iter().map(|node| {
            let peer_ids = &peer_ids;
            async move {
                match self.collect(node, peer_ids).await {
                    Ok(count) => count,
                    Err(e) => {
                        debug!(node = %node.name, error = %e, "Metrics collection skipped");
                        0
                    }
                }
            }
        }))
        .await;

        let total: usize = results.iter().sum();
        self.monitor.record_samples(total);
        Ok(format!("{} samples from {} nodes", total, nodes.len()))
    }
}

/// Scheduled fleet-wide key rotation
pub struct RotationJob {
    plane: Arc<ControlPlane>,
    monitor: Arc<FleetMonitor>,
}

impl RotationJob {
    /// Create the job
    pub fn new(plane: Arc<ControlPlane>, monitor: Arc<FleetMonitor>) -> Self {
        Self { plane, monitor }
    }
}

#[async_trait]
impl Job for RotationJob {
    fn id(&self) -> &'static str {
        "rotation"
    }

    async fn run(&self) -> Result<String> {
        let rotated = self.plane.rotate_all(&Actor::system()).await?;
        self.monitor.record_rotations(rotated);

        let notified = self
            .plane
            .store()
            .create_notification(
                0,
                NotificationKind::Info,
                "Scheduled key rotation",
                &format!("{} peer keys were rotated; download new configs", rotated),
            )
            .await;
        if let Err(e) = notified {
            warn!(error = %e, "Failed to create rotation notification");
        }

        info!(rotated, "Scheduled rotation complete");
        Ok(format!("{} peers rotated", rotated))
    }
}

/// Deletes samples, audit entries and notifications past retention
pub struct PruningJob {
    plane: Arc<ControlPlane>,
    retention: RetentionConfig,
}

impl PruningJob {
    /// Create the job
    pub fn new(plane: Arc<ControlPlane>, retention: RetentionConfig) -> Self {
        Self { plane, retention }
    }
}

#[async_trait]
impl Job for PruningJob {
    fn id(&self) -> &'static str {
        "pruning"
    }

    async fn run(&self) -> Result<String> {
        let now = Utc::now();
        let days = |d: u32| now - chrono::Duration::days(i64::from(d));

        let report = self
            .plane
            .store()
            .prune(
                days(self.retention.metrics_days),
                days(self.retention.audit_days),
                days(self.retention.notification_days),
            )
            .await?;

        info!(
            metrics = report.metrics,
            audit = report.audit,
            notifications = report.notifications,
            "Retention pruning complete"
        );
        Ok(format!(
            "pruned {} samples, {} audit entries, {} notifications",
            report.metrics, report.audit, report.notifications
        ))
    }
}
