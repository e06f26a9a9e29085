//! Shared fixtures for integration tests
//!
//! `FakeHost` stands in for the kernel: an in-memory tunnel device plus a
//! log of every packet-filter script applied. `FakeAgent` stands in for a
//! remote edge agent with a settable reported fingerprint.

#![allow(dead_code)]

use armor_control::agent::api::{RevokeResponse, StatusResponse, SyncResponse};
use armor_control::control::{ControlPlane, ControlSettings};
use armor_control::fingerprint::fingerprint;
use armor_control::ipam::AddressAllocator;
use armor_control::models::{FirewallRule, Node, PeerSpec};
use armor_control::orchestrator::{LogStream, NodeAgent};
use armor_control::platform::{DeviceDriver, Drivers, PacketFilter};
use armor_control::store::MemoryStore;
use armor_control::wireguard::{DevicePeer, KeyPair, TunnelController};
use armor_control::{ArmorError, Result};
use async_trait::async_trait;
use std::collections::{BTreeMap, HashMap};
use std::net::IpAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use tokio_util::sync::CancellationToken;

/// In-memory tunnel device and packet filter
#[derive(Default)]
pub struct FakeHost {
    devices: Mutex<HashMap<String, BTreeMap<String, DevicePeer>>>,
    scripts: Mutex<Vec<String>>,
    device_key: Mutex<Option<String>>,
}

impl FakeHost {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn drivers(self: &Arc<Self>) -> Drivers {
        Drivers::custom(self.clone(), self.clone())
    }

    pub fn device_keys(&self, interface: &str) -> Vec<String> {
        self.devices
            .lock()
            .unwrap()
            .get(interface)
            .map(|peers| peers.keys().cloned().collect())
            .unwrap_or_default()
    }

    pub fn scripts(&self) -> Vec<String> {
        self.scripts.lock().unwrap().clone()
    }

    pub fn last_script_containing(&self, needle: &str) -> Option<String> {
        self.scripts()
            .into_iter()
            .rev()
            .find(|s| s.contains(needle))
    }

    /// Set the byte counters of a peer already on a device
    pub fn set_counters(&self, interface: &str, public_key: &str, rx: u64, tx: u64) {
        if let Some(peer) = self
            .devices
            .lock()
            .unwrap()
            .get_mut(interface)
            .and_then(|peers| peers.get_mut(public_key))
        {
            peer.rx_bytes = rx;
            peer.tx_bytes = tx;
        }
    }
}

impl DeviceDriver for FakeHost {
    fn configure_peer(&self, interface: &str, public_key: &str, allowed_ips: &[String]) -> Result<()> {
        let mut devices = self.devices.lock().unwrap();
        let peers = devices.entry(interface.to_string()).or_default();
        let peer = peers.entry(public_key.to_string()).or_insert_with(|| DevicePeer {
            public_key: public_key.to_string(),
            ..Default::default()
        });
        peer.allowed_ips = allowed_ips.to_vec();
        Ok(())
    }

    fn remove_peer(&self, interface: &str, public_key: &str) -> Result<()> {
        if let Some(peers) = self.devices.lock().unwrap().get_mut(interface) {
            peers.remove(public_key);
        }
        Ok(())
    }

    fn peer_stats(&self, interface: &str) -> Result<Vec<DevicePeer>> {
        Ok(self
            .devices
            .lock()
            .unwrap()
            .get(interface)
            .map(|peers| peers.values().cloned().collect())
            .unwrap_or_default())
    }

    fn public_key(&self, _interface: &str) -> Result<String> {
        let mut key = self.device_key.lock().unwrap();
        Ok(key
            .get_or_insert_with(|| KeyPair::generate().public.to_base64())
            .clone())
    }
}

impl PacketFilter for FakeHost {
    fn apply(&self, script: &str) -> Result<()> {
        self.scripts.lock().unwrap().push(script.to_string());
        Ok(())
    }
}

/// Remote agent double
#[derive(Default)]
pub struct FakeAgent {
    pub reported_hash: Mutex<String>,
    pub device_peers: Mutex<Vec<DevicePeer>>,
    pub reachable: Mutex<bool>,
    pub pushes: AtomicUsize,
    pub firewall_pushes: AtomicUsize,
}

impl FakeAgent {
    pub fn new() -> Arc<Self> {
        let agent = Self::default();
        *agent.reachable.lock().unwrap() = true;
        Arc::new(agent)
    }

    pub fn report_hash(&self, hash: &str) {
        *self.reported_hash.lock().unwrap() = hash.to_string();
    }

    pub fn set_reachable(&self, reachable: bool) {
        *self.reachable.lock().unwrap() = reachable;
    }

    pub fn push_count(&self) -> usize {
        self.pushes.load(Ordering::SeqCst)
    }

    fn check(&self, node: &Node) -> Result<()> {
        if *self.reachable.lock().unwrap() {
            Ok(())
        } else {
            Err(ArmorError::AgentUnreachable {
                node: node.name.clone(),
                reason: "connection refused".to_string(),
            })
        }
    }
}

#[async_trait]
impl NodeAgent for FakeAgent {
    async fn push_peers(&self, node: &Node, peers: &[PeerSpec]) -> Result<SyncResponse> {
        self.check(node)?;
        let hash = fingerprint(peers)?;
        self.report_hash(&hash);
        self.pushes.fetch_add(1, Ordering::SeqCst);
        Ok(SyncResponse {
            status: "synchronized".to_string(),
            count: peers.len(),
            hash,
        })
    }

    async fn push_firewall(&self, node: &Node, _rules: &[FirewallRule]) -> Result<()> {
        self.check(node)?;
        self.firewall_pushes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn get_status(&self, node: &Node) -> Result<StatusResponse> {
        self.check(node)?;
        Ok(StatusResponse {
            interface: node.interface_name.clone(),
            peers: self.device_peers.lock().unwrap().clone(),
            online: true,
            last_sync_hash: self.reported_hash.lock().unwrap().clone(),
            public_key: Some("EDGEKEYEDGEKEYEDGEKEYEDGEKEYEDGEKEYEDGEKEY=".to_string()),
        })
    }

    async fn revoke_peer(&self, node: &Node, _public_key: &str, _address: IpAddr) -> Result<RevokeResponse> {
        self.check(node)?;
        Ok(RevokeResponse {
            status: "revoked".to_string(),
            drop_rule_applied: true,
        })
    }

    async fn stream_logs(&self, node: &Node, _cancel: CancellationToken) -> Result<LogStream> {
        self.check(node)?;
        Ok(Box::pin(futures::stream::empty()))
    }
}

/// A hydrated control plane over a fake host and agent
pub struct Fleet {
    pub plane: Arc<ControlPlane>,
    pub store: Arc<MemoryStore>,
    pub host: Arc<FakeHost>,
    pub agent: Arc<FakeAgent>,
}

pub async fn fleet(pool: &str, edges: &[&str]) -> Fleet {
    let store = Arc::new(MemoryStore::new());
    for (i, name) in edges.iter().enumerate() {
        let mut node = Node::new(0, *name, format!("198.51.100.{}", i + 10));
        node.public_key = Some("EDGEKEYEDGEKEYEDGEKEYEDGEKEYEDGEKEYEDGEKEY=".to_string());
        armor_control::store::RecordStore::insert_node(store.as_ref(), node)
            .await
            .unwrap();
    }

    let host = FakeHost::new();
    let agent = FakeAgent::new();
    let plane = Arc::new(ControlPlane::new(
        store.clone(),
        Arc::new(AddressAllocator::from_cidr(pool).unwrap()),
        Arc::new(TunnelController::new(host.drivers())),
        agent.clone(),
        ControlSettings::default(),
    ));
    plane.hydrate().await.unwrap();

    Fleet {
        plane,
        store,
        host,
        agent,
    }
}
