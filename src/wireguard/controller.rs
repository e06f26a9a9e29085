//! Kernel tunnel controller
//!
//! Owns the live state of the local tunnel devices and packet filter. Every
//! operation takes one controller-wide lock so device reconfigurations never
//! interleave, then runs the (blocking) driver call on the blocking pool.
//! The lock also guards the set of revoked addresses whose traffic is dropped.

use crate::error::{ArmorError, Result};
use crate::firewall;
use crate::models::{FirewallRule, SystemConfig};
use crate::platform::Drivers;
use crate::wireguard::{DevicePeer, KeyPair, PublicKey};
use ipnet::IpNet;
use std::collections::BTreeSet;
use std::net::IpAddr;
use tokio::sync::Mutex;
use tracing::{info, warn};

/// Outcome of a revocation whose device step succeeded
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RevokeReport {
    /// Whether the drop rule for the peer's address was installed
    pub drop_rule_applied: bool,
}

/// Controller for the tunnel devices and packet filter of this host
pub struct TunnelController {
    drivers: Drivers,
    revoked: Mutex<BTreeSet<IpAddr>>,
}

impl TunnelController {
    /// Create a controller over the given drivers
    pub fn new(drivers: Drivers) -> Self {
        Self {
            drivers,
            revoked: Mutex::new(BTreeSet::new()),
        }
    }

    /// Whether any driver is running in dev mode
    pub fn is_degraded(&self) -> bool {
        self.drivers.is_degraded()
    }

    /// Generate a fresh keypair. The private half is never stored here.
    pub fn generate_keypair(&self) -> KeyPair {
        KeyPair::generate()
    }

    /// Create or replace a peer's allowed-address set on a device.
    ///
    /// A host address that was previously revoked stops being dropped.
    pub async fn sync_peer(&self, interface: &str, public_key: &str, allowed_ips: &[String]) -> Result<()> {
        validate_device_args(interface, public_key)?;
        let allowed = normalize_allowed_ips(allowed_ips)?;
        let hosts: Vec<IpAddr> = allowed
            .iter()
            .filter_map(|a| a.parse::<IpNet>().ok())
            .filter(|n| n.prefix_len() == n.max_prefix_len())
            .map(|n| n.addr())
            .collect();

        let mut revoked = self.revoked.lock().await;
        let (iface, key) = (interface.to_string(), public_key.to_string());
        self.blocking(move |d| d.device.configure_peer(&iface, &key, &allowed))
            .await?;

        let before = revoked.len();
        revoked.retain(|addr| !hosts.contains(addr));
        if revoked.len() != before {
            let script = firewall::compile_revocations(revoked.iter());
            if let Err(e) = self.blocking(move |d| d.filter.apply(&script)).await {
                warn!(peer = %public_key, error = %e, "Drop rule for reinstated address not cleared");
            }
        }
        Ok(())
    }

    /// Remove a peer from a device, then drop any traffic still sourced from its address.
    ///
    /// Both steps are attempted. A device failure is returned as an error; a
    /// filter failure is logged and reported in the [`RevokeReport`].
    pub async fn revoke_peer(&self, interface: &str, public_key: &str, address: IpAddr) -> Result<RevokeReport> {
        validate_device_args(interface, public_key)?;

        let mut revoked = self.revoked.lock().await;
        let (iface, key) = (interface.to_string(), public_key.to_string());
        let device_result = self
            .blocking(move |d| d.device.remove_peer(&iface, &key))
            .await;

        revoked.insert(address);
        let script = firewall::compile_revocations(revoked.iter());
        let filter_result = self.blocking(move |d| d.filter.apply(&script)).await;

        if let Err(e) = &filter_result {
            warn!(peer = %public_key, address = %address, error = %e, "Drop rule for revoked peer not applied");
        }

        device_result?;
        info!(interface, peer = %public_key, address = %address, "Peer revoked");
        Ok(RevokeReport {
            drop_rule_applied: filter_result.is_ok(),
        })
    }

    /// Replace the set of dropped addresses, e.g. from durable state at startup
    pub async fn restore_revocations(&self, addrs: impl IntoIterator<Item = IpAddr>) -> Result<()> {
        let mut revoked = self.revoked.lock().await;
        *revoked = addrs.into_iter().collect();
        let count = revoked.len();
        let script = firewall::compile_revocations(revoked.iter());
        self.blocking(move |d| d.filter.apply(&script)).await?;
        info!(count, "Revocation drop rules restored");
        Ok(())
    }

    /// Addresses currently dropped
    pub async fn revoked_addresses(&self) -> Vec<IpAddr> {
        self.revoked.lock().await.iter().copied().collect()
    }

    /// Recompile the whole firewall rule set as one transaction
    pub async fn set_firewall_rules(&self, rules: &[FirewallRule]) -> Result<()> {
        let script = firewall::compile_rules(rules)?;

        let _guard = self.revoked.lock().await;
        self.blocking(move |d| d.filter.apply(&script)).await?;
        info!(rules = rules.len(), "Firewall rules applied");
        Ok(())
    }

    /// Recompile NAT, DNS redirect and outbound blocking as one transaction
    pub async fn apply_system_config(&self, config: &SystemConfig) -> Result<()> {
        let script = firewall::compile_system_policy(config)?;

        let _guard = self.revoked.lock().await;
        self.blocking(move |d| d.filter.apply(&script)).await?;
        info!(
            wan = %config.wan_interface,
            limited = config.internet_access_limited,
            dns_filter = config.dns_filtering_active,
            "System policy applied"
        );
        Ok(())
    }

    /// Peers currently on a device, with counters
    pub async fn device_peers(&self, interface: &str) -> Result<Vec<DevicePeer>> {
        firewall::validate_interface(interface)?;

        let _guard = self.revoked.lock().await;
        let iface = interface.to_string();
        self.blocking(move |d| d.device.peer_stats(&iface)).await
    }

    /// Public key of a device
    pub async fn public_key(&self, interface: &str) -> Result<String> {
        firewall::validate_interface(interface)?;

        let _guard = self.revoked.lock().await;
        let iface = interface.to_string();
        self.blocking(move |d| d.device.public_key(&iface)).await
    }

    async fn blocking<T, F>(&self, f: F) -> Result<T>
    where
        F: FnOnce(Drivers) -> Result<T> + Send + 'static,
        T: Send + 'static,
    {
        let drivers = self.drivers.clone();
        tokio::task::spawn_blocking(move || f(drivers))
            .await
            .map_err(|e| ArmorError::InvalidState(format!("Driver task failed: {}", e)))?
    }
}

fn validate_device_args(interface: &str, public_key: &str) -> Result<()> {
    firewall::validate_interface(interface)
        .map_err(|e| ArmorError::DeviceConfig(e.to_string()))?;
    PublicKey::from_base64(public_key)?;
    Ok(())
}

/// Bare addresses become host routes; anything else must be valid CIDR.
fn normalize_allowed_ips(allowed_ips: &[String]) -> Result<Vec<String>> {
    allowed_ips
        .iter()
        .map(|entry| {
            let entry = entry.trim();
            if let Ok(addr) = entry.parse::<IpAddr>() {
                return Ok(IpNet::from(addr).to_string());
            }
            entry
                .parse::<IpNet>()
                .map(|net| net.to_string())
                .map_err(|e| ArmorError::DeviceConfig(format!("Invalid allowed address '{}': {}", entry, e)))
        })
        .collect()
}
