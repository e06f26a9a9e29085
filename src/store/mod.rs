//! Boundary to the durable record store
//!
//! The control plane never owns persistence; every durable read and write
//! goes through [`RecordStore`]. Node updates are field-level so that
//! heartbeats, remediation and manual syncs of different nodes (or different
//! fields of the same node) never overwrite each other's results.

mod memory;

pub use memory::{MemoryStore, Seed};

use crate::error::{ArmorError, Result};
use crate::models::{
    AuditEntry, FirewallRule, Node, NodeStatus, Notification, NotificationKind, Peer, PeerMetric,
    PeerStatus, SystemConfig,
};
use async_trait::async_trait;
use chrono::{DateTime, Utc};

/// What a heartbeat learned about a node
#[derive(Debug, Clone, PartialEq)]
pub struct NodeObservation {
    /// New lifecycle status
    pub status: NodeStatus,
    /// Set on success; `None` keeps the previous value
    pub last_seen: Option<DateTime<Utc>>,
    /// Reported fingerprint; `None` keeps the previous value
    pub observed_fingerprint: Option<String>,
    /// Reported device public key; `None` keeps the previous value
    pub public_key: Option<String>,
}

impl NodeObservation {
    /// A successful heartbeat
    pub fn online(observed_fingerprint: Option<String>, public_key: Option<String>) -> Self {
        Self {
            status: NodeStatus::Online,
            last_seen: Some(Utc::now()),
            observed_fingerprint,
            public_key,
        }
    }

    /// A failed heartbeat; everything but the status is preserved
    pub fn offline() -> Self {
        Self {
            status: NodeStatus::Offline,
            last_seen: None,
            observed_fingerprint: None,
            public_key: None,
        }
    }
}

/// Rows removed by a pruning pass
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PruneReport {
    /// Metric samples removed
    pub metrics: usize,
    /// Audit entries removed
    pub audit: usize,
    /// Notifications removed
    pub notifications: usize,
}

/// Durable state consumed by the control plane
/// Conflict returned when an owner already holds `limit` active peers
pub fn device_limit_reached(limit: usize) -> ArmorError {
    ArmorError::Conflict(format!("Device limit reached ({} active peers)", limit))
}

#[async_trait]
pub trait RecordStore: Send + Sync {
    /// All nodes, ordered by id
    async fn list_nodes(&self) -> Result<Vec<Node>>;
    /// One node
    async fn get_node(&self, id: u64) -> Result<Node>;
    /// Create a node; `id == 0` assigns one
    async fn insert_node(&self, node: Node) -> Result<Node>;
    /// Record a heartbeat result and return the updated node.
    ///
    /// A node in `syncing` keeps that status; only the sync that set it
    /// clears it.
    async fn record_observation(&self, id: u64, observation: NodeObservation) -> Result<Node>;
    /// Set the lifecycle status only
    async fn set_node_status(&self, id: u64, status: NodeStatus) -> Result<()>;
    /// Store the fingerprint of the last successful push
    async fn set_desired_fingerprint(&self, id: u64, fingerprint: &str) -> Result<()>;

    /// All peers, ordered by id
    async fn list_peers(&self) -> Result<Vec<Peer>>;
    /// One peer
    async fn get_peer(&self, id: u64) -> Result<Peer>;
    /// Peer owning a public key
    async fn find_peer_by_key(&self, public_key: &str) -> Result<Option<Peer>>;
    /// Create a peer; `id == 0` assigns one. Key and address must be unique.
    async fn insert_peer(&self, peer: Peer) -> Result<Peer>;
    /// Create a peer unless its owner already holds `limit` active peers.
    ///
    /// The count and the insert are one step, so concurrent callers cannot
    /// both pass the check.
    async fn insert_peer_within_limit(&self, peer: Peer, limit: usize) -> Result<Peer>;
    /// Replace a peer's key after rotation
    async fn rotate_peer_key(&self, id: u64, public_key: &str, rotated_at: DateTime<Utc>) -> Result<Peer>;
    /// Set a peer's lifecycle status
    async fn set_peer_status(&self, id: u64, status: PeerStatus) -> Result<Peer>;
    /// Mark a peer active unless its owner already holds `limit` active peers
    async fn reactivate_peer_within_limit(&self, id: u64, limit: usize) -> Result<Peer>;
    /// Hard-delete a peer
    async fn delete_peer(&self, id: u64) -> Result<Peer>;
    /// Active peers held by one account
    async fn count_active_peers(&self, user_id: u64) -> Result<usize>;

    /// The firewall rule set
    async fn list_firewall_rules(&self) -> Result<Vec<FirewallRule>>;
    /// Replace the whole rule set
    async fn replace_firewall_rules(&self, rules: Vec<FirewallRule>) -> Result<Vec<FirewallRule>>;
    /// Add one rule
    async fn insert_firewall_rule(&self, rule: FirewallRule) -> Result<FirewallRule>;
    /// Remove one rule
    async fn delete_firewall_rule(&self, id: u64) -> Result<()>;

    /// The singleton system config, created with defaults on first access
    async fn get_or_create_system_config(&self) -> Result<SystemConfig>;
    /// Persist the system config
    async fn save_system_config(&self, config: SystemConfig) -> Result<()>;

    /// Append traffic samples
    async fn insert_metrics(&self, samples: Vec<PeerMetric>) -> Result<()>;
    /// All stored traffic samples
    async fn list_metrics(&self) -> Result<Vec<PeerMetric>>;

    /// Append an audit entry
    async fn log_action(
        &self,
        actor_id: u64,
        action: &str,
        resource_id: &str,
        payload: &str,
        source_ip: &str,
    ) -> Result<()>;
    /// All audit entries
    async fn list_audit(&self) -> Result<Vec<AuditEntry>>;

    /// Create a notification; `user_id == 0` addresses everyone
    async fn create_notification(
        &self,
        user_id: u64,
        kind: NotificationKind,
        title: &str,
        message: &str,
    ) -> Result<()>;
    /// All notifications
    async fn list_notifications(&self) -> Result<Vec<Notification>>;

    /// Remove rows older than the given cutoffs
    async fn prune(
        &self,
        metrics_before: DateTime<Utc>,
        audit_before: DateTime<Utc>,
        notifications_before: DateTime<Utc>,
    ) -> Result<PruneReport>;
}
