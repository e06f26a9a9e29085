//! Orchestrator: the client half of the push/pull protocol
//!
//! [`NodeAgent`] is what the control plane and scheduler call to reach an
//! edge node. [`HttpOrchestrator`] implements it over the agent HTTP API.
//! Calls are never retried here; retry policy belongs to the scheduler.

mod client;

pub use client::HttpOrchestrator;

use crate::agent::api::{RevokeResponse, StatusResponse, SyncResponse};
use crate::error::Result;
use crate::models::{FirewallRule, Node, PeerSpec};
use async_trait::async_trait;
use bytes::Bytes;
use futures::stream::BoxStream;
use std::net::IpAddr;
use tokio_util::sync::CancellationToken;

/// Byte stream relayed from an agent's log endpoint
pub type LogStream = BoxStream<'static, Result<Bytes>>;

/// Operations on a remote edge node
#[async_trait]
pub trait NodeAgent: Send + Sync {
    /// Replace the node's peer set on its device
    async fn push_peers(&self, node: &Node, peers: &[PeerSpec]) -> Result<SyncResponse>;

    /// Recompile the node's firewall rule set
    async fn push_firewall(&self, node: &Node, rules: &[FirewallRule]) -> Result<()>;

    /// Live device peers and the last persisted fingerprint
    async fn get_status(&self, node: &Node) -> Result<StatusResponse>;

    /// Remove one peer and drop its address
    async fn revoke_peer(&self, node: &Node, public_key: &str, address: IpAddr) -> Result<RevokeResponse>;

    /// Relay the node's event stream until either side closes or `cancel` fires
    async fn stream_logs(&self, node: &Node, cancel: CancellationToken) -> Result<LogStream>;
}
