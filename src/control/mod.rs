//! Control plane operations
//!
//! [`ControlPlane`] is what the API layer calls: peer provisioning and
//! lifecycle, key rotation, manual node sync, firewall and system-config
//! updates, and startup hydration. Durable state always goes through the
//! [`RecordStore`]; enforcement goes to the local [`TunnelController`] for
//! the core node and to the [`NodeAgent`] for edge nodes.
//!
//! Durable updates and enforcement are independent: an enforcement failure
//! is logged, audited where relevant and reported as a flag, but never
//! rolls back the durable change.

mod nodes;
mod peers;

pub use peers::{PeerOutcome, Provisioned};

use crate::config::ControlConfig;
use crate::error::Result;
use crate::firewall;
use crate::ipam::AddressAllocator;
use crate::models::{FirewallRule, Node, NodeStatus, PeerStatus, SystemConfig, SystemConfigUpdate};
use crate::orchestrator::NodeAgent;
use crate::store::RecordStore;
use crate::wireguard::TunnelController;
use futures::future::join_all;
use serde_json::json;
use std::net::IpAddr;
use std::sync::Arc;
use tracing::{info, warn};

/// Settings the control plane needs from the daemon configuration
#[derive(Debug, Clone)]
pub struct ControlSettings {
    /// Tunnel device of the core node
    pub core_interface: String,
    /// Public host of the core node placed in client configs
    pub endpoint: String,
    /// Tunnel UDP port of the core node
    pub listen_port: u16,
    /// Resolver placed in client configs
    pub client_dns: String,
    /// Active peers a single account may hold
    pub max_devices_per_owner: usize,
    /// Mark the pool's first host used at hydration
    pub reserve_gateway: bool,
}

impl From<&ControlConfig> for ControlSettings {
    fn from(config: &ControlConfig) -> Self {
        Self {
            core_interface: config.core_interface.clone(),
            endpoint: config.endpoint.clone(),
            listen_port: config.listen_port,
            client_dns: config.client_dns.clone(),
            max_devices_per_owner: config.max_devices_per_owner,
            reserve_gateway: config.reserve_gateway,
        }
    }
}

impl Default for ControlSettings {
    fn default() -> Self {
        Self::from(&ControlConfig::default())
    }
}

/// Who triggered an operation, for the audit log
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Actor {
    /// Account id; 0 is the system itself
    pub id: u64,
    /// Source address of the request
    pub source_ip: String,
}

impl Actor {
    /// An authenticated account
    pub fn new(id: u64, source_ip: impl Into<String>) -> Self {
        Self {
            id,
            source_ip: source_ip.into(),
        }
    }

    /// Background jobs
    pub fn system() -> Self {
        Self::new(0, "127.0.0.1")
    }
}

/// A durable update plus whether it reached the local packet filter
#[derive(Debug, Clone)]
pub struct Applied<T> {
    /// The persisted value
    pub value: T,
    /// Whether the local filter accepted it
    pub enforced: bool,
}

/// What startup hydration restored
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HydrateReport {
    /// Peer addresses marked used
    pub addresses: usize,
    /// Revoked addresses whose drop rules were restored
    pub revoked: usize,
    /// Gateway host reserved, if any
    pub gateway: Option<IpAddr>,
    /// Id of the core node record
    pub core_node: u64,
}

/// Control plane over one record store, address pool and fleet
pub struct ControlPlane {
    store: Arc<dyn RecordStore>,
    allocator: Arc<AddressAllocator>,
    controller: Arc<TunnelController>,
    agent: Arc<dyn NodeAgent>,
    settings: ControlSettings,
}

impl ControlPlane {
    /// Create a control plane. Call [`hydrate`](Self::hydrate) before serving.
    pub fn new(
        store: Arc<dyn RecordStore>,
        allocator: Arc<AddressAllocator>,
        controller: Arc<TunnelController>,
        agent: Arc<dyn NodeAgent>,
        settings: ControlSettings,
    ) -> Self {
        Self {
            store,
            allocator,
            controller,
            agent,
            settings,
        }
    }

    /// The record store
    pub fn store(&self) -> &Arc<dyn RecordStore> {
        &self.store
    }

    /// The local tunnel controller
    pub fn controller(&self) -> &Arc<TunnelController> {
        &self.controller
    }

    /// The edge agent client
    pub fn agent(&self) -> &Arc<dyn NodeAgent> {
        &self.agent
    }

    /// The address pool
    pub fn allocator(&self) -> &Arc<AddressAllocator> {
        &self.allocator
    }

    /// Restore in-memory state from the record store and re-apply local policy.
    ///
    /// Filter failures are logged; the control plane still starts.
    pub async fn hydrate(&self) -> Result<HydrateReport> {
        let core_node = self.ensure_core_node().await?;
        let peers = self.store.list_peers().await?;
        for peer in &peers {
            self.allocator.mark_used(peer.assigned_ip);
        }

        let gateway = if self.settings.reserve_gateway {
            let host = self.allocator.first_host();
            if let Some(host) = host {
                self.allocator.mark_used(host);
            }
            host
        } else {
            None
        };

        let revoked: Vec<IpAddr> = peers
            .iter()
            .filter(|p| p.status == PeerStatus::Revoked)
            .map(|p| p.assigned_ip)
            .collect();
        let revoked_count = revoked.len();
        if let Err(e) = self.controller.restore_revocations(revoked).await {
            warn!(error = %e, "Failed to restore revocation drop rules");
        }

        let config = self.store.get_or_create_system_config().await?;
        if let Err(e) = self.controller.apply_system_config(&config).await {
            warn!(error = %e, "Failed to apply system policy at startup");
        }

        let rules = self.store.list_firewall_rules().await?;
        if let Err(e) = self.controller.set_firewall_rules(&rules).await {
            warn!(error = %e, "Failed to apply firewall rules at startup");
        }

        info!(
            addresses = peers.len(),
            revoked = revoked_count,
            gateway = ?gateway,
            pool = %self.allocator.subnet(),
            "Control plane hydrated"
        );

        Ok(HydrateReport {
            addresses: peers.len(),
            revoked: revoked_count,
            gateway,
            core_node,
        })
    }

    /// The core node record, created on first start
    async fn ensure_core_node(&self) -> Result<u64> {
        if let Some(core) = self.store.list_nodes().await?.into_iter().find(Node::is_core) {
            return Ok(core.id);
        }

        let mut core = Node::new(0, "core", "localhost");
        core.interface_name = self.settings.core_interface.clone();
        core.listen_port = self.settings.listen_port;
        core.tunnel_subnet = self.allocator.subnet().to_string();
        let core = self.store.insert_node(core).await?;
        info!(id = core.id, interface = %core.interface_name, "Core node registered");
        Ok(core.id)
    }

    /// Replace the whole firewall rule set
    pub async fn replace_firewall_rules(
        &self,
        actor: &Actor,
        rules: Vec<FirewallRule>,
    ) -> Result<Applied<Vec<FirewallRule>>> {
        firewall::compile_rules(&rules)?;
        let stored = self.store.replace_firewall_rules(rules).await?;
        self.audit(actor, "UPDATE_FIREWALL", "firewall", json!({ "rules": stored.len() }))
            .await;
        let enforced = self.enforce_firewall(&stored).await;
        Ok(Applied {
            value: stored,
            enforced,
        })
    }

    /// Add one rule and recompile
    pub async fn add_firewall_rule(&self, actor: &Actor, rule: FirewallRule) -> Result<Applied<FirewallRule>> {
        firewall::compile_rules(std::slice::from_ref(&rule))?;
        let stored = self.store.insert_firewall_rule(rule).await?;
        self.audit(
            actor,
            "ADD_FIREWALL_RULE",
            &stored.id.to_string(),
            json!({
                "source_ip": stored.source_ip,
                "destination": stored.destination,
                "port": stored.port,
                "protocol": stored.protocol,
                "action": stored.action,
            }),
        )
        .await;

        let rules = self.store.list_firewall_rules().await?;
        let enforced = self.enforce_firewall(&rules).await;
        Ok(Applied {
            value: stored,
            enforced,
        })
    }

    /// Remove one rule and recompile
    pub async fn delete_firewall_rule(&self, actor: &Actor, id: u64) -> Result<Applied<()>> {
        self.store.delete_firewall_rule(id).await?;
        self.audit(actor, "DELETE_FIREWALL_RULE", &id.to_string(), json!({}))
            .await;

        let rules = self.store.list_firewall_rules().await?;
        let enforced = self.enforce_firewall(&rules).await;
        Ok(Applied { value: (), enforced })
    }

    /// Apply a partial system-config update, persist it and re-apply local policy
    pub async fn update_system_config(
        &self,
        actor: &Actor,
        update: SystemConfigUpdate,
    ) -> Result<Applied<SystemConfig>> {
        let mut config = self.store.get_or_create_system_config().await?;
        config.apply(update);
        firewall::compile_system_policy(&config)?;
        self.store.save_system_config(config.clone()).await?;

        self.audit(
            actor,
            "UPDATE_SYSTEM_CONFIG",
            "system",
            json!({
                "internet_access_limited": config.internet_access_limited,
                "dns_filtering_active": config.dns_filtering_active,
                "wan_interface": config.wan_interface,
            }),
        )
        .await;

        let enforced = match self.controller.apply_system_config(&config).await {
            Ok(()) => true,
            Err(e) => {
                warn!(error = %e, "System config saved but not applied");
                false
            }
        };
        Ok(Applied {
            value: config,
            enforced,
        })
    }

    /// Recompile locally, then best-effort push to every reachable edge node
    async fn enforce_firewall(&self, rules: &[FirewallRule]) -> bool {
        let enforced = match self.controller.set_firewall_rules(rules).await {
            Ok(()) => true,
            Err(e) => {
                warn!(error = %e, "Firewall rules saved but not applied");
                false
            }
        };

        let edges: Vec<Node> = match self.store.list_nodes().await {
            Ok(nodes) => nodes
                .into_iter()
                .filter(|n| !n.is_core() && n.status == NodeStatus::Online)
                .collect(),
            Err(e) => {
                warn!(error = %e, "Could not list nodes for firewall fan-out");
                Vec::new()
            }
        };
        let pushes = edges.iter().map(|node| async move {
            if let Err(e) = self.agent.push_firewall(node, rules).await {
                warn!(node = %node.name, error = %e, "Firewall push to edge failed");
            }
        });
        join_all(pushes).await;

        enforced
    }

    /// Append an audit entry; a store failure is logged, never propagated
    async fn audit(&self, actor: &Actor, action: &str, resource: &str, payload: serde_json::Value) {
        if let Err(e) = self
            .store
            .log_action(actor.id, action, resource, &payload.to_string(), &actor.source_ip)
            .await
        {
            warn!(action, resource, error = %e, "Failed to write audit entry");
        }
    }
}
