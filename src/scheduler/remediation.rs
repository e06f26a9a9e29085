//! Drift remediation queue
//!
//! One in-flight remediation per node. A trigger for a node that is already
//! being remediated is coalesced into the running job.

use crate::control::ControlPlane;
use crate::models::{Node, NotificationKind};
use crate::monitoring::FleetMonitor;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use tokio::task::JoinHandle;
use tracing::{info, warn};

/// Keyed queue of asynchronous re-push jobs
pub struct RemediationQueue {
    plane: Arc<ControlPlane>,
    monitor: Arc<FleetMonitor>,
    in_flight: Mutex<HashMap<u64, JoinHandle<()>>>,
}

impl RemediationQueue {
    /// Create a queue pushing through `plane`
    pub fn new(plane: Arc<ControlPlane>, monitor: Arc<FleetMonitor>) -> Self {
        Self {
            plane,
            monitor,
            in_flight: Mutex::new(HashMap::new()),
        }
    }

    /// Schedule a re-push of `node`'s peers and firewall.
    ///
    /// Returns `false` when a remediation for the node is already running.
    pub fn submit(&self, node: Node) -> bool {
        let mut in_flight = self.in_flight.lock().unwrap();
        in_flight.retain(|_, handle| !handle.is_finished());
        if in_flight.contains_key(&node.id) {
            info!(node = %node.name, "Remediation already in flight");
            return false;
        }

        let plane = Arc::clone(&self.plane);
        let monitor = Arc::clone(&self.monitor);
        let id = node.id;
        let handle = tokio::spawn(async move {
            remediate(&plane, &monitor, &node).await;
        });
        in_flight.insert(id, handle);
        true
    }

    /// Number of remediations not yet finished
    pub fn pending(&self) -> usize {
        let mut in_flight = self.in_flight.lock().unwrap();
        in_flight.retain(|_, handle| !handle.is_finished());
        in_flight.len()
    }

    /// Wait for every submitted remediation to finish
    pub async fn wait_idle(&self) {
        let handles: Vec<JoinHandle<()>> = {
            let mut in_flight = self.in_flight.lock().unwrap();
            in_flight.drain().map(|(_, handle)| handle).collect()
        };
        for handle in handles {
            let _ = handle.await;
        }
    }
}

async fn remediate(plane: &ControlPlane, monitor: &FleetMonitor, node: &Node) {
    info!(node = %node.name, "Drift detected, re-synchronizing node");
    let notified = plane
        .store()
        .create_notification(
            0,
            NotificationKind::Warning,
            "Configuration drift detected",
            &format!(
                "Node {} diverged from its desired peer set and is being re-synchronized",
                node.name
            ),
        )
        .await;
    if let Err(e) = notified {
        warn!(node = %node.name, error = %e, "Failed to create drift notification");
    }

    match plane.push_node(node).await {
        Ok(hash) => {
            monitor.record_remediation(true);
            info!(node = %node.name, hash = %hash, "Drift remediated");
        }
        Err(e) => {
            monitor.record_remediation(false);
            warn!(node = %node.name, error = %e, "Drift remediation failed; retrying on a later heartbeat");
        }
    }
}
