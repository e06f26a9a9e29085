//! Health check implementation
//!
//! Derives an overall fleet health from the last known status of every node.

use super::NodeStats;
use crate::models::NodeStatus;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::BTreeMap;
use tracing::debug;

/// Health status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    /// Every node reachable
    Healthy,
    /// Some nodes unreachable or syncing
    Degraded,
    /// Core offline, or no node reachable
    Unhealthy,
}

impl std::fmt::Display for HealthStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Healthy => write!(f, "healthy"),
            Self::Degraded => write!(f, "degraded"),
            Self::Unhealthy => write!(f, "unhealthy"),
        }
    }
}

/// Health check result
#[derive(Debug, Clone, Serialize)]
pub struct HealthCheck {
    /// Overall health status
    pub status: HealthStatus,
    /// Health check timestamp
    pub timestamp: DateTime<Utc>,
    /// Per-node health, keyed by node name
    pub nodes: BTreeMap<String, NodeHealth>,
    /// Additional details
    pub details: String,
}

/// Node-specific health information
#[derive(Debug, Clone, Serialize)]
pub struct NodeHealth {
    /// Node status at the last heartbeat
    pub status: NodeStatus,
    /// Drift detections for this node
    pub drift_detections: u64,
    /// Last time the node answered
    pub last_seen: Option<DateTime<Utc>>,
}

impl HealthCheck {
    /// Create a new health check
    pub fn new(status: HealthStatus) -> Self {
        Self {
            status,
            timestamp: Utc::now(),
            nodes: BTreeMap::new(),
            details: String::new(),
        }
    }

    /// Check if healthy
    pub fn is_healthy(&self) -> bool {
        self.status == HealthStatus::Healthy
    }
}

/// Perform health check over the tracked nodes
pub fn check_health(stats: &BTreeMap<u64, NodeStats>) -> HealthCheck {
    debug!("Performing fleet health check");

    let mut details = Vec::new();
    let mut nodes = BTreeMap::new();
    let mut offline = 0usize;
    let mut syncing = 0usize;
    let mut core_offline = false;

    if stats.is_empty() {
        details.push("No nodes registered".to_string());
    }

    for node in stats.values() {
        match node.status {
            NodeStatus::Offline => {
                offline += 1;
                core_offline |= node.is_core;
                details.push(format!("{}: offline", node.name));
            }
            NodeStatus::Syncing => {
                syncing += 1;
                details.push(format!("{}: syncing", node.name));
            }
            NodeStatus::Online => {}
        }
        nodes.insert(
            node.name.clone(),
            NodeHealth {
                status: node.status,
                drift_detections: node.drift_detections,
                last_seen: node.last_seen,
            },
        );
    }

    let status = if core_offline || (!stats.is_empty() && offline == stats.len()) {
        HealthStatus::Unhealthy
    } else if offline > 0 || syncing > 0 {
        HealthStatus::Degraded
    } else {
        HealthStatus::Healthy
    };

    let mut health = HealthCheck::new(status);
    health.nodes = nodes;
    health.details = if details.is_empty() {
        "All systems operational".to_string()
    } else {
        details.join("; ")
    };
    health
}

#[cfg(test)]
mod tests {
    use super::*;

    fn stats(id: u64, name: &str, is_core: bool, status: NodeStatus) -> (u64, NodeStats) {
        (
            id,
            NodeStats {
                name: name.to_string(),
                is_core,
                status,
                last_seen: None,
                drift_detections: 0,
            },
        )
    }

    #[test]
    fn test_health_status_display() {
        assert_eq!(HealthStatus::Healthy.to_string(), "healthy");
        assert_eq!(HealthStatus::Degraded.to_string(), "degraded");
        assert_eq!(HealthStatus::Unhealthy.to_string(), "unhealthy");
    }

    #[test]
    fn test_health_check_empty() {
        let health = check_health(&BTreeMap::new());
        assert_eq!(health.status, HealthStatus::Healthy);
        assert_eq!(health.details, "No nodes registered");
    }

    #[test]
    fn test_edge_offline_is_degraded() {
        let map = BTreeMap::from([
            stats(1, "core", true, NodeStatus::Online),
            stats(2, "edge-a", false, NodeStatus::Offline),
        ]);
        let health = check_health(&map);
        assert_eq!(health.status, HealthStatus::Degraded);
        assert!(health.details.contains("edge-a: offline"));
    }

    #[test]
    fn test_core_offline_is_unhealthy() {
        let map = BTreeMap::from([
            stats(1, "core", true, NodeStatus::Offline),
            stats(2, "edge-a", false, NodeStatus::Online),
        ]);
        assert_eq!(check_health(&map).status, HealthStatus::Unhealthy);
    }

    #[test]
    fn test_all_online_is_healthy() {
        let map = BTreeMap::from([
            stats(1, "core", true, NodeStatus::Online),
            stats(2, "edge-a", false, NodeStatus::Online),
        ]);
        let health = check_health(&map);
        assert!(health.is_healthy());
        assert_eq!(health.nodes.len(), 2);
    }
}
