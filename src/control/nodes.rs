//! Node-level operations: device targets, peer-set pushes, manual sync, log relay

use super::{Actor, ControlPlane};
use crate::agent::logs::{heartbeat_events, sse_frame};
use crate::error::{ArmorError, Result};
use crate::fingerprint::fingerprint;
use crate::models::{Node, NodeStatus, Peer, PeerSpec, PeerStatus};
use crate::orchestrator::LogStream;
use futures::stream::StreamExt;
use serde_json::json;
use std::net::IpAddr;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

/// Heartbeat period of the core node's local event stream
const CORE_LOG_HEARTBEAT: Duration = Duration::from_secs(3);

/// Where a peer lives
pub(super) enum Target {
    /// Local device driven by the tunnel controller
    Core { interface: String },
    /// Remote node driven through its agent
    Edge(Node),
}

impl ControlPlane {
    /// Resolve the device a peer assigned to `node_id` lives on
    pub(super) async fn target(&self, node_id: Option<u64>) -> Result<Target> {
        match node_id {
            None => Ok(Target::Core {
                interface: self.settings.core_interface.clone(),
            }),
            Some(id) => {
                let node = self.store.get_node(id).await?;
                if node.is_core() {
                    Ok(Target::Core {
                        interface: node.interface_name,
                    })
                } else {
                    Ok(Target::Edge(node))
                }
            }
        }
    }

    /// Server public key placed in client configs
    pub(super) async fn server_key(&self, target: &Target) -> Result<String> {
        match target {
            Target::Core { interface } => self.controller.public_key(interface).await,
            Target::Edge(node) => node
                .public_key
                .clone()
                .filter(|k| !k.is_empty())
                .ok_or_else(|| {
                    ArmorError::InvalidState(format!(
                        "Node '{}' has not reported its public key yet",
                        node.name
                    ))
                }),
        }
    }

    /// Host and port placed in client configs
    pub(super) fn endpoint(&self, target: &Target) -> (String, u16) {
        match target {
            Target::Core { .. } => (self.settings.endpoint.clone(), self.settings.listen_port),
            Target::Edge(node) => (node.public_ip.clone(), node.listen_port),
        }
    }

    /// Put one peer on its device
    pub(super) async fn apply_peer(&self, target: &Target, peer: &Peer) -> Result<()> {
        match target {
            Target::Core { interface } => {
                self.controller
                    .sync_peer(interface, &peer.public_key, &peer.device_allowed_ips())
                    .await
            }
            Target::Edge(node) => self.push_node_peers(node).await.map(|_| ()),
        }
    }

    /// Take a peer off its device and drop its address.
    ///
    /// Returns whether the drop rule was installed.
    pub(super) async fn remove_peer(&self, target: &Target, public_key: &str, address: IpAddr) -> Result<bool> {
        match target {
            Target::Core { interface } => self
                .controller
                .revoke_peer(interface, public_key, address)
                .await
                .map(|r| r.drop_rule_applied),
            Target::Edge(node) => self
                .agent
                .revoke_peer(node, public_key, address)
                .await
                .map(|r| r.drop_rule_applied),
        }
    }

    /// Peers assigned to a node. Unassigned peers belong to the core node.
    pub async fn peers_for_node(&self, node: &Node) -> Result<Vec<Peer>> {
        let core = node.is_core();
        Ok(self
            .store
            .list_peers()
            .await?
            .into_iter()
            .filter(|p| match p.node_id {
                Some(id) => id == node.id,
                None => core,
            })
            .collect())
    }

    /// The peer set pushed to a node
    pub async fn node_peer_specs(&self, node: &Node) -> Result<Vec<PeerSpec>> {
        Ok(self
            .peers_for_node(node)
            .await?
            .iter()
            .map(PeerSpec::from)
            .collect())
    }

    /// Push a node's peer set and record its fingerprint as desired.
    ///
    /// Core peers are synced one at a time and the first failure aborts.
    pub async fn push_node_peers(&self, node: &Node) -> Result<String> {
        let specs = self.node_peer_specs(node).await?;
        let hash = fingerprint(&specs)?;

        if node.is_core() {
            for spec in specs.iter().filter(|s| s.status == PeerStatus::Active) {
                self.controller
                    .sync_peer(&node.interface_name, &spec.public_key, &spec.device_allowed_ips())
                    .await
                    .map_err(|e| {
                        ArmorError::DeviceConfig(format!("Failed to sync peer {}: {}", spec.public_key, e))
                    })?;
            }
        } else {
            let response = self.agent.push_peers(node, &specs).await?;
            if response.hash != hash {
                warn!(node = %node.name, local = %hash, remote = %response.hash, "Agent fingerprint differs from local");
            }
        }

        self.store.set_desired_fingerprint(node.id, &hash).await?;
        Ok(hash)
    }

    /// Push a node's peers, then the firewall rule set
    pub async fn push_node(&self, node: &Node) -> Result<String> {
        let hash = self.push_node_peers(node).await?;
        let rules = self.store.list_firewall_rules().await?;
        if node.is_core() {
            self.controller.set_firewall_rules(&rules).await?;
        } else {
            self.agent.push_firewall(node, &rules).await?;
        }
        Ok(hash)
    }

    /// Manual "sync this node now".
    ///
    /// The node is `syncing` while the push runs, then `online` or `offline`.
    pub async fn sync_node(&self, actor: &Actor, node_id: u64) -> Result<String> {
        let node = self.store.get_node(node_id).await?;
        self.store.set_node_status(node.id, NodeStatus::Syncing).await?;
        info!(node = %node.name, "Manual sync started");

        let result = self.push_node(&node).await;

        let status = if result.is_ok() {
            NodeStatus::Online
        } else {
            NodeStatus::Offline
        };
        self.store.set_node_status(node.id, status).await?;

        let payload = match &result {
            Ok(hash) => json!({ "node": node.name, "hash": hash }),
            Err(e) => json!({ "node": node.name, "error": e.to_string() }),
        };
        self.audit(actor, "SYNC_NODE", &node.id.to_string(), payload).await;

        match &result {
            Ok(hash) => info!(node = %node.name, hash = %hash, "Manual sync completed"),
            Err(e) => warn!(node = %node.name, error = %e, "Manual sync failed"),
        }
        result
    }

    /// Relay a node's event stream.
    ///
    /// Edge nodes are relayed byte for byte from their agent; the core node
    /// yields local heartbeat events in the same wire shape.
    pub async fn stream_node_logs(&self, node_id: u64, cancel: CancellationToken) -> Result<LogStream> {
        let node = self.store.get_node(node_id).await?;
        if !node.is_core() {
            return self.agent.stream_logs(&node, cancel).await;
        }

        let stream = heartbeat_events(node.name.clone(), CORE_LOG_HEARTBEAT)
            .map(|event| Ok(sse_frame(&event)))
            .take_until(cancel.cancelled_owned())
            .boxed();
        Ok(stream)
    }
}
