//! Monitoring and observability
//!
//! In-process fleet counters fed by the scheduler and the control plane,
//! exported as Prometheus text and summarized by a health check.

use crate::models::{Node, NodeStatus};
use chrono::{DateTime, Utc};
use std::collections::BTreeMap;
use std::sync::{Arc, RwLock};
use tracing::debug;

mod health;
mod metrics;

pub use health::{check_health, HealthCheck, HealthStatus, NodeHealth};
pub use metrics::{MetricType, MetricValue, MetricsCollector};

/// Last known state of one node
#[derive(Debug, Clone)]
pub struct NodeStats {
    /// Node name
    pub name: String,
    /// Whether this is the core node
    pub is_core: bool,
    /// Status at the last heartbeat
    pub status: NodeStatus,
    /// Last time the node answered
    pub last_seen: Option<DateTime<Utc>>,
    /// Drift detections for this node
    pub drift_detections: u64,
}

/// Monitor for tracking fleet state
pub struct FleetMonitor {
    stats: Arc<RwLock<BTreeMap<u64, NodeStats>>>,
    metrics: Arc<MetricsCollector>,
}

impl FleetMonitor {
    /// Create a new monitor
    pub fn new() -> Self {
        Self {
            stats: Arc::new(RwLock::new(BTreeMap::new())),
            metrics: Arc::new(MetricsCollector::new()),
        }
    }

    /// Record the outcome of a heartbeat
    pub fn record_node(&self, node: &Node, status: NodeStatus) {
        let mut stats = self.stats.write().unwrap();
        let entry = stats.entry(node.id).or_insert_with(|| NodeStats {
            name: node.name.clone(),
            is_core: node.is_core(),
            status,
            last_seen: None,
            drift_detections: 0,
        });
        entry.name = node.name.clone();
        entry.status = status;
        if status == NodeStatus::Online {
            entry.last_seen = Some(Utc::now());
        }
        debug!(node = %node.name, status = %status, "Node state recorded");

        let online = stats.values().filter(|s| s.status == NodeStatus::Online).count();
        let offline = stats.values().filter(|s| s.status == NodeStatus::Offline).count();
        self.metrics.record(MetricType::NodesOnline, online as f64);
        self.metrics.record(MetricType::NodesOffline, offline as f64);
    }

    /// Count a drift detection for a node
    pub fn record_drift(&self, node_id: u64) {
        if let Some(stats) = self.stats.write().unwrap().get_mut(&node_id) {
            stats.drift_detections += 1;
        }
        self.metrics.increment(MetricType::DriftDetections, 1);
    }

    /// Count a finished remediation
    pub fn record_remediation(&self, success: bool) {
        let metric = if success {
            MetricType::Remediations
        } else {
            MetricType::RemediationFailures
        };
        self.metrics.increment(metric, 1);
    }

    /// Count rotated keys
    pub fn record_rotations(&self, count: usize) {
        self.metrics.increment(MetricType::KeysRotated, count as u64);
    }

    /// Count persisted traffic samples
    pub fn record_samples(&self, count: usize) {
        self.metrics.increment(MetricType::MetricSamples, count as u64);
    }

    /// Get statistics for a node
    pub fn get_stats(&self, node_id: u64) -> Option<NodeStats> {
        self.stats.read().unwrap().get(&node_id).cloned()
    }

    /// Get metrics collector
    pub fn metrics(&self) -> Arc<MetricsCollector> {
        self.metrics.clone()
    }

    /// Perform health check
    pub fn health_check(&self) -> HealthCheck {
        let stats = self.stats.read().unwrap();
        check_health(&stats)
    }
}

impl Default for FleetMonitor {
    fn default() -> Self {
        Self::new()
    }
}
