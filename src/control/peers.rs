//! Peer lifecycle: provision, revoke, reactivate, delete, rotate

use super::nodes::Target;
use super::{Actor, ControlPlane};
use crate::error::{ArmorError, Result};
use crate::models::{Peer, PeerStatus};
use crate::store::device_limit_reached;
use crate::wireguard::{ClientConfig, PrivateKey};
use chrono::Utc;
use serde_json::json;
use tracing::{error, info, warn};

/// A peer together with its one-time client config.
///
/// The private key lives only in `config`; it is never persisted.
#[derive(Debug, Clone)]
pub struct Provisioned {
    /// The stored peer
    pub peer: Peer,
    /// Client config carrying the private key
    pub config: ClientConfig,
    /// Whether the peer reached its device
    pub device_synced: bool,
}

impl Provisioned {
    /// Rendered client config text
    pub fn client_config(&self) -> String {
        self.config.render()
    }
}

/// Result of a lifecycle change that touches a device
#[derive(Debug, Clone)]
pub struct PeerOutcome {
    /// The peer after the change
    pub peer: Peer,
    /// Whether the device step succeeded
    pub device_applied: bool,
    /// Whether a drop rule for the address was installed
    pub drop_rule_applied: bool,
}

impl ControlPlane {
    /// Create a peer for `actor` on a node (`None` = core) and return its client config once
    pub async fn provision_peer(
        &self,
        actor: &Actor,
        node_id: Option<u64>,
        device_name: &str,
    ) -> Result<Provisioned> {
        self.check_device_limit(actor.id).await?;

        let target = self.target(node_id).await?;
        let server_key = self.server_key(&target).await?;
        let keypair = self.controller.generate_keypair();
        let address = self.allocator.allocate()?;

        let peer = Peer {
            id: 0,
            user_id: actor.id,
            node_id,
            public_key: keypair.public.to_base64(),
            assigned_ip: address,
            allowed_ips: "0.0.0.0/0".to_string(),
            status: PeerStatus::Active,
            device_name: device_name.to_string(),
            is_provisioned: true,
            created_at: Utc::now(),
            rotated_at: None,
        };
        let limit = self.settings.max_devices_per_owner;
        let peer = match self.store.insert_peer_within_limit(peer, limit).await {
            Ok(peer) => peer,
            Err(e) => {
                self.allocator.release(address);
                return Err(e);
            }
        };

        let device_synced = self.apply_or_audit(actor, &target, &peer).await;
        self.audit(
            actor,
            "CREATE_PEER",
            &peer.id.to_string(),
            json!({ "device_name": peer.device_name, "assigned_ip": peer.assigned_ip }),
        )
        .await;
        info!(peer = %peer.public_key, address = %peer.assigned_ip, owner = actor.id, "Peer provisioned");

        Ok(Provisioned {
            config: self.client_config(&target, &keypair.private, &peer, server_key),
            peer,
            device_synced,
        })
    }

    /// Take a peer off its device and mark it revoked. The address is retained.
    pub async fn revoke_peer(&self, actor: &Actor, peer_id: u64) -> Result<PeerOutcome> {
        let peer = self.store.get_peer(peer_id).await?;
        if !peer.is_active() {
            return Err(ArmorError::InvalidState(format!("Peer {} is already revoked", peer.id)));
        }

        let target = self.target(peer.node_id).await?;
        let (device_applied, drop_rule_applied) =
            match self.remove_peer(&target, &peer.public_key, peer.assigned_ip).await {
                Ok(dropped) => (true, dropped),
                Err(e) => {
                    error!(peer = %peer.public_key, error = %e, "Device revocation failed");
                    (false, false)
                }
            };

        let peer = self.store.set_peer_status(peer.id, PeerStatus::Revoked).await?;
        self.audit(
            actor,
            "REVOKE_PEER",
            &peer.id.to_string(),
            json!({ "public_key": peer.public_key, "device_applied": device_applied }),
        )
        .await;
        info!(peer = %peer.public_key, address = %peer.assigned_ip, "Peer revoked");

        Ok(PeerOutcome {
            peer,
            device_applied,
            drop_rule_applied,
        })
    }

    /// Bring a revoked peer back with its retained address
    pub async fn reactivate_peer(&self, actor: &Actor, peer_id: u64) -> Result<PeerOutcome> {
        let peer = self.store.get_peer(peer_id).await?;
        if peer.is_active() {
            return Err(ArmorError::InvalidState(format!("Peer {} is already active", peer.id)));
        }
        self.check_device_limit(peer.user_id).await?;

        let target = self.target(peer.node_id).await?;
        let peer = self
            .store
            .reactivate_peer_within_limit(peer.id, self.settings.max_devices_per_owner)
            .await?;
        self.allocator.mark_used(peer.assigned_ip);
        let device_applied = self.apply_or_audit(actor, &target, &peer).await;

        self.audit(actor, "REACTIVATE_PEER", &peer.id.to_string(), json!({ "public_key": peer.public_key }))
            .await;
        info!(peer = %peer.public_key, address = %peer.assigned_ip, "Peer reactivated");

        Ok(PeerOutcome {
            peer,
            device_applied,
            drop_rule_applied: false,
        })
    }

    /// Remove a peer for good and release its address
    pub async fn delete_peer(&self, actor: &Actor, peer_id: u64) -> Result<PeerOutcome> {
        let peer = self.store.get_peer(peer_id).await?;

        let (device_applied, drop_rule_applied) = if peer.is_active() {
            let removed = match self.target(peer.node_id).await {
                Ok(target) => self.remove_peer(&target, &peer.public_key, peer.assigned_ip).await,
                Err(e) => Err(e),
            };
            match removed {
                Ok(dropped) => (true, dropped),
                Err(e) => {
                    warn!(peer = %peer.public_key, error = %e, "Device removal failed during delete");
                    (false, false)
                }
            }
        } else {
            (true, false)
        };

        let peer = self.store.delete_peer(peer.id).await?;
        self.allocator.release(peer.assigned_ip);
        self.audit(
            actor,
            "DELETE_PEER",
            &peer.id.to_string(),
            json!({ "public_key": peer.public_key, "assigned_ip": peer.assigned_ip }),
        )
        .await;
        info!(peer = %peer.public_key, address = %peer.assigned_ip, "Peer deleted");

        Ok(PeerOutcome {
            peer,
            device_applied,
            drop_rule_applied,
        })
    }

    /// Replace one active peer's key and return its new client config
    pub async fn rotate_peer(&self, actor: &Actor, peer_id: u64) -> Result<Provisioned> {
        let peer = self.store.get_peer(peer_id).await?;
        if !peer.is_active() {
            return Err(ArmorError::InvalidState(format!("Peer {} is revoked", peer.id)));
        }

        let target = self.target(peer.node_id).await?;
        let server_key = self.server_key(&target).await?;
        self.remove_peer(&target, &peer.public_key, peer.assigned_ip)
            .await?;

        let keypair = self.controller.generate_keypair();
        let old_key = peer.public_key.clone();
        let peer = self
            .store
            .rotate_peer_key(peer.id, &keypair.public.to_base64(), Utc::now())
            .await?;
        let device_synced = self.apply_or_audit(actor, &target, &peer).await;

        self.audit(
            actor,
            "ROTATE_KEYS",
            &peer.id.to_string(),
            json!({ "old_public_key": old_key, "new_public_key": peer.public_key }),
        )
        .await;
        info!(peer = peer.id, old = %old_key, new = %peer.public_key, "Peer key rotated");

        Ok(Provisioned {
            config: self.client_config(&target, &keypair.private, &peer, server_key),
            peer,
            device_synced,
        })
    }

    /// Rotate every active peer, continuing past failures. Returns the number rotated.
    pub async fn rotate_all(&self, actor: &Actor) -> Result<usize> {
        let active: Vec<Peer> = self
            .store
            .list_peers()
            .await?
            .into_iter()
            .filter(Peer::is_active)
            .collect();

        let mut rotated = 0;
        let mut failed = 0;
        for peer in &active {
            match self.rotate_peer(actor, peer.id).await {
                Ok(_) => rotated += 1,
                Err(e) => {
                    failed += 1;
                    warn!(peer = peer.id, error = %e, "Key rotation failed");
                }
            }
        }

        self.audit(actor, "ROTATE_ALL_KEYS", "all", json!({ "rotated": rotated, "failed": failed }))
            .await;
        info!(rotated, failed, "Fleet key rotation finished");
        Ok(rotated)
    }

    /// Early rejection before any keys or addresses are spent. The store
    /// enforces the limit again when the row is written.
    async fn check_device_limit(&self, owner: u64) -> Result<()> {
        let limit = self.settings.max_devices_per_owner;
        if self.store.count_active_peers(owner).await? >= limit {
            return Err(device_limit_reached(limit));
        }
        Ok(())
    }

    /// Sync a peer to its device; a failure is audited and reported as `false`
    async fn apply_or_audit(&self, actor: &Actor, target: &Target, peer: &Peer) -> bool {
        match self.apply_peer(target, peer).await {
            Ok(()) => true,
            Err(e) => {
                error!(peer = %peer.public_key, error = %e, "Device sync failed");
                self.audit(
                    actor,
                    "WG_SYNC_FAILED",
                    &peer.id.to_string(),
                    json!({ "public_key": peer.public_key, "error": e.to_string() }),
                )
                .await;
                false
            }
        }
    }

    fn client_config(&self, target: &Target, private: &PrivateKey, peer: &Peer, server_key: String) -> ClientConfig {
        let (endpoint_host, endpoint_port) = self.endpoint(target);
        ClientConfig {
            private_key: private.to_base64(),
            address: peer.assigned_ip,
            dns: self.settings.client_dns.clone(),
            server_public_key: server_key,
            endpoint_host,
            endpoint_port,
        }
    }
}
