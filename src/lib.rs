//! armor-control: control plane for a fleet of WireGuard gateway nodes
//!
//! One local "core" node is driven directly through the kernel tunnel device
//! and packet filter. Remote "edge" nodes run the `armor-agent` binary and are
//! driven through an authenticated push/pull HTTP protocol. The control plane
//! keeps the declarative desired state (peers, firewall rules, NAT policy) and
//! a background scheduler reconciles every node against it.
//!
//! # Modules
//!
//! - `ipam`: tunnel address allocator
//! - `wireguard`: keys, device peer statistics, the kernel tunnel controller, client configs
//! - `firewall`: packet-filter transaction compilers
//! - `platform`: host probing and the device/filter driver interfaces
//! - `fingerprint`: peer-set fingerprints for drift detection
//! - `agent`: edge agent HTTP server and wire types
//! - `orchestrator`: client half of the agent protocol
//! - `control`: operations exposed to the API layer
//! - `scheduler`: heartbeat, drift remediation, metrics, rotation, pruning
//! - `store`: boundary to the durable record store
//! - `monitoring`: fleet counters and health
//! - `config`, `models`, `error`

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod agent;
pub mod config;
pub mod control;
pub mod error;
pub mod fingerprint;
pub mod firewall;
pub mod ipam;
pub mod models;
pub mod monitoring;
pub mod orchestrator;
pub mod platform;
pub mod scheduler;
pub mod store;
pub mod wireguard;

// Re-export commonly used types
pub use error::{ArmorError, Result};

/// Version information
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Application name
pub const APP_NAME: &str = env!("CARGO_PKG_NAME");
