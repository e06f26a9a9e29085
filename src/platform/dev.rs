//! No-op drivers for hosts without the kernel tunnel or packet filter
//!
//! Every mutating call logs what it would have done and succeeds, so the
//! control plane keeps working in agent-only or test deployments.

use crate::error::Result;
use crate::platform::{DeviceDriver, PacketFilter};
use crate::wireguard::DevicePeer;
use tracing::info;

/// Dev-mode tunnel device
#[derive(Debug, Default)]
pub struct DevDevice;

impl DeviceDriver for DevDevice {
    fn configure_peer(&self, interface: &str, public_key: &str, allowed_ips: &[String]) -> Result<()> {
        info!(
            interface,
            peer = %public_key,
            allowed_ips = %allowed_ips.join(","),
            "[dev mode] would configure peer"
        );
        Ok(())
    }

    fn remove_peer(&self, interface: &str, public_key: &str) -> Result<()> {
        info!(interface, peer = %public_key, "[dev mode] would remove peer");
        Ok(())
    }

    fn peer_stats(&self, _interface: &str) -> Result<Vec<DevicePeer>> {
        Ok(Vec::new())
    }

    fn public_key(&self, interface: &str) -> Result<String> {
        Ok(format!("DEV_MODE_PUBKEY_{}_BASE64_KEY_HOLDER", interface))
    }
}

/// Dev-mode packet filter
#[derive(Debug, Default)]
pub struct DevFilter;

impl PacketFilter for DevFilter {
    fn apply(&self, script: &str) -> Result<()> {
        info!(
            statements = script.lines().count(),
            "[dev mode] would apply filter transaction"
        );
        Ok(())
    }
}
