//! In-memory record store
//!
//! Used by the daemon when no external store is wired in, and by the tests.
//! Node rows are individually locked so updates to different nodes never
//! contend on a table-wide write lock.

use super::{device_limit_reached, NodeObservation, PruneReport, RecordStore};
use crate::error::{ArmorError, Result};
use crate::models::{
    AuditEntry, FirewallRule, Node, NodeStatus, Notification, NotificationKind, Peer, PeerMetric,
    PeerStatus, SystemConfig,
};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, RwLock};
use tracing::info;

/// Initial records loaded from a JSON file
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Seed {
    /// Gateway nodes
    #[serde(default)]
    pub nodes: Vec<Node>,
    /// Peers
    #[serde(default)]
    pub peers: Vec<Peer>,
    /// Firewall rules
    #[serde(default)]
    pub firewall_rules: Vec<FirewallRule>,
    /// System config; defaults are created lazily when absent
    #[serde(default)]
    pub system_config: Option<SystemConfig>,
}

/// Record store held entirely in memory
pub struct MemoryStore {
    next_id: AtomicU64,
    nodes: RwLock<BTreeMap<u64, Arc<Mutex<Node>>>>,
    peers: RwLock<BTreeMap<u64, Peer>>,
    rules: RwLock<BTreeMap<u64, FirewallRule>>,
    system: Mutex<Option<SystemConfig>>,
    metrics: Mutex<Vec<PeerMetric>>,
    audit: Mutex<Vec<AuditEntry>>,
    notifications: Mutex<Vec<Notification>>,
}

impl MemoryStore {
    /// Create an empty store
    pub fn new() -> Self {
        Self {
            next_id: AtomicU64::new(1),
            nodes: RwLock::new(BTreeMap::new()),
            peers: RwLock::new(BTreeMap::new()),
            rules: RwLock::new(BTreeMap::new()),
            system: Mutex::new(None),
            metrics: Mutex::new(Vec::new()),
            audit: Mutex::new(Vec::new()),
            notifications: Mutex::new(Vec::new()),
        }
    }

    /// Create a store preloaded with `seed`
    pub fn with_seed(seed: Seed) -> Result<Self> {
        let store = Self::new();
        let mut max_id = 0;

        {
            let mut nodes = store.nodes.write().unwrap();
            for node in seed.nodes {
                max_id = max_id.max(node.id);
                nodes.insert(node.id, Arc::new(Mutex::new(node)));
            }
        }
        {
            let mut peers = store.peers.write().unwrap();
            for peer in seed.peers {
                max_id = max_id.max(peer.id);
                if peers.values().any(|p| p.public_key == peer.public_key || p.assigned_ip == peer.assigned_ip) {
                    return Err(ArmorError::Conflict(format!(
                        "Seed peer {} duplicates a key or address",
                        peer.id
                    )));
                }
                peers.insert(peer.id, peer);
            }
        }
        {
            let mut rules = store.rules.write().unwrap();
            for rule in seed.firewall_rules {
                max_id = max_id.max(rule.id);
                rules.insert(rule.id, rule);
            }
        }
        *store.system.lock().unwrap() = seed.system_config;

        store.next_id.store(max_id + 1, Ordering::SeqCst);
        Ok(store)
    }

    /// Load a JSON seed file
    pub fn from_seed_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path)
            .map_err(|e| ArmorError::Store(format!("Failed to read seed file {:?}: {}", path, e)))?;
        let seed: Seed = serde_json::from_str(&contents)?;
        info!(
            path = ?path,
            nodes = seed.nodes.len(),
            peers = seed.peers.len(),
            rules = seed.firewall_rules.len(),
            "Loaded record store seed"
        );
        Self::with_seed(seed)
    }

    fn allocate_id(&self) -> u64 {
        self.next_id.fetch_add(1, Ordering::SeqCst)
    }

    fn node_row(&self, id: u64) -> Result<Arc<Mutex<Node>>> {
        self.nodes
            .read()
            .unwrap()
            .get(&id)
            .cloned()
            .ok_or_else(|| ArmorError::NotFound(format!("Node {}", id)))
    }

    fn insert_locked(&self, peers: &mut BTreeMap<u64, Peer>, mut peer: Peer) -> Result<Peer> {
        if peers.values().any(|p| p.public_key == peer.public_key) {
            return Err(ArmorError::Conflict("Public key already registered".to_string()));
        }
        if peers.values().any(|p| p.assigned_ip == peer.assigned_ip) {
            return Err(ArmorError::Conflict(format!(
                "Address {} already assigned",
                peer.assigned_ip
            )));
        }
        if peer.id == 0 {
            peer.id = self.allocate_id();
        }
        peers.insert(peer.id, peer.clone());
        Ok(peer)
    }

    fn update_peer<F>(&self, id: u64, f: F) -> Result<Peer>
    where
        F: FnOnce(&mut Peer),
    {
        let mut peers = self.peers.write().unwrap();
        let peer = peers
            .get_mut(&id)
            .ok_or_else(|| ArmorError::NotFound(format!("Peer {}", id)))?;
        f(peer);
        Ok(peer.clone())
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl RecordStore for MemoryStore {
    async fn list_nodes(&self) -> Result<Vec<Node>> {
        let rows: Vec<_> = self.nodes.read().unwrap().values().cloned().collect();
        Ok(rows.iter().map(|row| row.lock().unwrap().clone()).collect())
    }

    async fn get_node(&self, id: u64) -> Result<Node> {
        let row = self.node_row(id)?;
        let node = row.lock().unwrap().clone();
        Ok(node)
    }

    async fn insert_node(&self, mut node: Node) -> Result<Node> {
        let mut nodes = self.nodes.write().unwrap();
        if nodes.values().any(|row| row.lock().unwrap().name == node.name) {
            return Err(ArmorError::Conflict(format!("Node name '{}' already exists", node.name)));
        }
        if node.id == 0 {
            node.id = self.allocate_id();
        }
        nodes.insert(node.id, Arc::new(Mutex::new(node.clone())));
        Ok(node)
    }

    async fn record_observation(&self, id: u64, observation: NodeObservation) -> Result<Node> {
        let row = self.node_row(id)?;
        let mut node = row.lock().unwrap();
        if node.status != NodeStatus::Syncing {
            node.status = observation.status;
        }
        if let Some(seen) = observation.last_seen {
            node.last_seen = Some(seen);
        }
        if let Some(fp) = observation.observed_fingerprint {
            node.observed_fingerprint = Some(fp);
        }
        if let Some(key) = observation.public_key {
            node.public_key = Some(key);
        }
        Ok(node.clone())
    }

    async fn set_node_status(&self, id: u64, status: NodeStatus) -> Result<()> {
        let row = self.node_row(id)?;
        row.lock().unwrap().status = status;
        Ok(())
    }

    async fn set_desired_fingerprint(&self, id: u64, fingerprint: &str) -> Result<()> {
        let row = self.node_row(id)?;
        row.lock().unwrap().desired_fingerprint = Some(fingerprint.to_string());
        Ok(())
    }

    async fn list_peers(&self) -> Result<Vec<Peer>> {
        Ok(self.peers.read().unwrap().values().cloned().collect())
    }

    async fn get_peer(&self, id: u64) -> Result<Peer> {
        self.peers
            .read()
            .unwrap()
            .get(&id)
            .cloned()
            .ok_or_else(|| ArmorError::NotFound(format!("Peer {}", id)))
    }

    async fn find_peer_by_key(&self, public_key: &str) -> Result<Option<Peer>> {
        Ok(self
            .peers
            .read()
            .unwrap()
            .values()
            .find(|p| p.public_key == public_key)
            .cloned())
    }

    async fn insert_peer(&self, peer: Peer) -> Result<Peer> {
        let mut peers = self.peers.write().unwrap();
        self.insert_locked(&mut peers, peer)
    }

    async fn insert_peer_within_limit(&self, peer: Peer, limit: usize) -> Result<Peer> {
        let mut peers = self.peers.write().unwrap();
        if peer.is_active() && active_count(&peers, peer.user_id) >= limit {
            return Err(device_limit_reached(limit));
        }
        self.insert_locked(&mut peers, peer)
    }

    async fn rotate_peer_key(&self, id: u64, public_key: &str, rotated_at: DateTime<Utc>) -> Result<Peer> {
        if self
            .peers
            .read()
            .unwrap()
            .values()
            .any(|p| p.id != id && p.public_key == public_key)
        {
            return Err(ArmorError::Conflict("Public key already registered".to_string()));
        }
        self.update_peer(id, |peer| {
            peer.public_key = public_key.to_string();
            peer.rotated_at = Some(rotated_at);
        })
    }

    async fn set_peer_status(&self, id: u64, status: PeerStatus) -> Result<Peer> {
        self.update_peer(id, |peer| peer.status = status)
    }

    async fn reactivate_peer_within_limit(&self, id: u64, limit: usize) -> Result<Peer> {
        let mut peers = self.peers.write().unwrap();
        let owner = match peers.get(&id) {
            Some(peer) if peer.is_active() => return Ok(peer.clone()),
            Some(peer) => peer.user_id,
            None => return Err(ArmorError::NotFound(format!("Peer {}", id))),
        };
        if active_count(&peers, owner) >= limit {
            return Err(device_limit_reached(limit));
        }
        let peer = peers
            .get_mut(&id)
            .ok_or_else(|| ArmorError::NotFound(format!("Peer {}", id)))?;
        peer.status = PeerStatus::Active;
        Ok(peer.clone())
    }

    async fn delete_peer(&self, id: u64) -> Result<Peer> {
        self.peers
            .write()
            .unwrap()
            .remove(&id)
            .ok_or_else(|| ArmorError::NotFound(format!("Peer {}", id)))
    }

    async fn count_active_peers(&self, user_id: u64) -> Result<usize> {
        Ok(active_count(&self.peers.read().unwrap(), user_id))
    }

    async fn list_firewall_rules(&self) -> Result<Vec<FirewallRule>> {
        Ok(self.rules.read().unwrap().values().cloned().collect())
    }

    async fn replace_firewall_rules(&self, rules: Vec<FirewallRule>) -> Result<Vec<FirewallRule>> {
        let mut table = self.rules.write().unwrap();
        table.clear();
        let mut stored = Vec::with_capacity(rules.len());
        for mut rule in rules {
            rule.id = self.allocate_id();
            table.insert(rule.id, rule.clone());
            stored.push(rule);
        }
        Ok(stored)
    }

    async fn insert_firewall_rule(&self, mut rule: FirewallRule) -> Result<FirewallRule> {
        rule.id = self.allocate_id();
        self.rules.write().unwrap().insert(rule.id, rule.clone());
        Ok(rule)
    }

    async fn delete_firewall_rule(&self, id: u64) -> Result<()> {
        self.rules
            .write()
            .unwrap()
            .remove(&id)
            .map(|_| ())
            .ok_or_else(|| ArmorError::NotFound(format!("Firewall rule {}", id)))
    }

    async fn get_or_create_system_config(&self) -> Result<SystemConfig> {
        let mut system = self.system.lock().unwrap();
        Ok(system.get_or_insert_with(SystemConfig::default).clone())
    }

    async fn save_system_config(&self, config: SystemConfig) -> Result<()> {
        *self.system.lock().unwrap() = Some(config);
        Ok(())
    }

    async fn insert_metrics(&self, samples: Vec<PeerMetric>) -> Result<()> {
        let mut metrics = self.metrics.lock().unwrap();
        for mut sample in samples {
            sample.id = self.allocate_id();
            metrics.push(sample);
        }
        Ok(())
    }

    async fn list_metrics(&self) -> Result<Vec<PeerMetric>> {
        Ok(self.metrics.lock().unwrap().clone())
    }

    async fn log_action(
        &self,
        actor_id: u64,
        action: &str,
        resource_id: &str,
        payload: &str,
        source_ip: &str,
    ) -> Result<()> {
        let entry = AuditEntry {
            id: self.allocate_id(),
            timestamp: Utc::now(),
            actor_id,
            action: action.to_string(),
            resource_id: resource_id.to_string(),
            payload: payload.to_string(),
            source_ip: source_ip.to_string(),
        };
        self.audit.lock().unwrap().push(entry);
        Ok(())
    }

    async fn list_audit(&self) -> Result<Vec<AuditEntry>> {
        Ok(self.audit.lock().unwrap().clone())
    }

    async fn create_notification(
        &self,
        user_id: u64,
        kind: NotificationKind,
        title: &str,
        message: &str,
    ) -> Result<()> {
        let notification = Notification {
            id: self.allocate_id(),
            user_id,
            kind,
            title: title.to_string(),
            message: message.to_string(),
            is_read: false,
            created_at: Utc::now(),
        };
        self.notifications.lock().unwrap().push(notification);
        Ok(())
    }

    async fn list_notifications(&self) -> Result<Vec<Notification>> {
        Ok(self.notifications.lock().unwrap().clone())
    }

    async fn prune(
        &self,
        metrics_before: DateTime<Utc>,
        audit_before: DateTime<Utc>,
        notifications_before: DateTime<Utc>,
    ) -> Result<PruneReport> {
        fn retain<T>(rows: &mut Vec<T>, keep: impl Fn(&T) -> bool) -> usize {
            let before = rows.len();
            rows.retain(|row| keep(row));
            before - rows.len()
        }

        Ok(PruneReport {
            metrics: retain(&mut self.metrics.lock().unwrap(), |m| m.timestamp >= metrics_before),
            audit: retain(&mut self.audit.lock().unwrap(), |a| a.timestamp >= audit_before),
            notifications: retain(&mut self.notifications.lock().unwrap(), |n| {
                n.created_at >= notifications_before
            }),
        })
    }
}

fn active_count(peers: &BTreeMap<u64, Peer>, user_id: u64) -> usize {
    peers
        .values()
        .filter(|p| p.user_id == user_id && p.is_active())
        .count()
}
