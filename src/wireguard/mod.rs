//! WireGuard key material, device state and the kernel tunnel controller
//!
//! The controller never speaks to the kernel directly; it goes through the
//! drivers in [`crate::platform`].

pub mod client_config;
pub mod controller;
pub mod keys;
pub mod peer;

pub use client_config::ClientConfig;
pub use controller::{RevokeReport, TunnelController};
pub use keys::{KeyPair, PrivateKey, PublicKey};
pub use peer::DevicePeer;
