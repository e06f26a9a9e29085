//! Host drivers for the tunnel device and the packet filter
//!
//! The kernel tunnel controller talks to the host only through two narrow
//! interfaces: [`DeviceDriver`] for peer configuration on a tunnel device and
//! [`PacketFilter`] for atomic filter transactions. Each has a real
//! implementation backed by the `wg`/`nft` tools ([`linux`]) and a no-op
//! implementation ([`dev`]) that logs intent and reports success. Which one
//! is used is decided once at startup by [`select_drivers`].

pub mod detection;
pub mod dev;
pub mod linux;

pub use detection::{detect_environment, ContainerEnvironment, PlatformInfo};

use crate::error::Result;
use crate::wireguard::DevicePeer;
use std::sync::Arc;
use tracing::{info, warn};

/// Peer configuration on a tunnel device
#[cfg_attr(test, mockall::automock)]
pub trait DeviceDriver: Send + Sync {
    /// Create or replace a peer's allowed-address set
    fn configure_peer(&self, interface: &str, public_key: &str, allowed_ips: &[String]) -> Result<()>;

    /// Remove a peer; removing an absent peer succeeds
    fn remove_peer(&self, interface: &str, public_key: &str) -> Result<()>;

    /// Live peers and their counters
    fn peer_stats(&self, interface: &str) -> Result<Vec<DevicePeer>>;

    /// The device's own public key
    fn public_key(&self, interface: &str) -> Result<String>;
}

/// Atomic packet-filter transactions
#[cfg_attr(test, mockall::automock)]
pub trait PacketFilter: Send + Sync {
    /// Apply one script as a single transaction
    fn apply(&self, script: &str) -> Result<()>;
}

/// Which implementation backs a driver
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DriverMode {
    /// Real host tools
    Kernel,
    /// No-op, logs intent only
    Dev,
}

/// The driver pair handed to a tunnel controller
#[derive(Clone)]
pub struct Drivers {
    /// Tunnel device driver
    pub device: Arc<dyn DeviceDriver>,
    /// Packet filter driver
    pub filter: Arc<dyn PacketFilter>,
    /// Mode of the device driver
    pub device_mode: DriverMode,
    /// Mode of the filter driver
    pub filter_mode: DriverMode,
}

impl Drivers {
    /// Both drivers in dev mode
    pub fn dev() -> Self {
        Self {
            device: Arc::new(dev::DevDevice),
            filter: Arc::new(dev::DevFilter),
            device_mode: DriverMode::Dev,
            filter_mode: DriverMode::Dev,
        }
    }

    /// Wrap caller-supplied drivers
    pub fn custom(device: Arc<dyn DeviceDriver>, filter: Arc<dyn PacketFilter>) -> Self {
        Self {
            device,
            filter,
            device_mode: DriverMode::Kernel,
            filter_mode: DriverMode::Kernel,
        }
    }

    /// Whether either driver is a no-op
    pub fn is_degraded(&self) -> bool {
        self.device_mode == DriverMode::Dev || self.filter_mode == DriverMode::Dev
    }
}

/// Pick each driver independently from what the host offers
pub fn select_drivers(info: &PlatformInfo) -> Drivers {
    let mut drivers = Drivers::dev();

    if info.tunnel_available() {
        drivers.device = Arc::new(linux::WgCli::new());
        drivers.device_mode = DriverMode::Kernel;
    } else {
        warn!(
            privileged = info.is_privileged,
            wg_tool = info.has_wg_tool,
            "Kernel tunnel device unavailable, peer operations run in dev mode"
        );
    }

    if info.filter_available() {
        drivers.filter = Arc::new(linux::NftCli::new());
        drivers.filter_mode = DriverMode::Kernel;
    } else {
        warn!(
            privileged = info.is_privileged,
            nft_tool = info.has_nft_tool,
            "Packet filter unavailable, filter transactions run in dev mode"
        );
    }

    info!(
        device = ?drivers.device_mode,
        filter = ?drivers.filter_mode,
        "Host drivers selected"
    );
    drivers
}
