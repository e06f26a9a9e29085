//! Agent wire protocol types
//!
//! Every request and response body of `/agent/v1` is JSON. These types are
//! shared by the agent server and the orchestrator client.

use crate::models::PeerSpec;
use crate::wireguard::DevicePeer;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::net::IpAddr;

/// Base path of the agent API
pub const BASE_PATH: &str = "/agent/v1";

/// Header carrying the shared secret
pub const TOKEN_HEADER: &str = "X-ARMOR-TOKEN";

/// File (under the agent state dir) holding the last sync fingerprint
pub const SYNC_HASH_FILE: &str = ".armor_sync_hash";

/// `POST /sync` body
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncRequest {
    /// Target tunnel device
    pub interface: String,
    /// Full peer set for the device
    pub peers: Vec<PeerSpec>,
}

/// `POST /sync` response
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncResponse {
    /// Always `synchronized`
    pub status: String,
    /// Peers configured on the device
    pub count: usize,
    /// Fingerprint of the received peer set
    pub hash: String,
}

/// `GET /status` query
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StatusQuery {
    /// Tunnel device; defaults to `wg0`
    #[serde(default)]
    pub interface: Option<String>,
}

/// `GET /status` response
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StatusResponse {
    /// Tunnel device queried
    pub interface: String,
    /// Live peers on the device
    pub peers: Vec<DevicePeer>,
    /// Always true when the agent answers
    pub online: bool,
    /// Last persisted sync fingerprint; empty if never synced
    #[serde(default)]
    pub last_sync_hash: String,
    /// The device's public key, when readable
    #[serde(default)]
    pub public_key: Option<String>,
}

/// `POST /revoke` body
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RevokeRequest {
    /// Tunnel device
    pub interface: String,
    /// Peer to remove
    pub public_key: String,
    /// Address to drop traffic from
    pub assigned_ip: IpAddr,
}

/// `POST /revoke` response
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RevokeResponse {
    /// Always `revoked`
    pub status: String,
    /// Whether the drop rule was installed
    #[serde(default = "default_true")]
    pub drop_rule_applied: bool,
}

/// Simple `{status}` acknowledgement
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StatusAck {
    /// e.g. `firewall_updated`
    pub status: String,
}

/// Error body returned with every non-success status
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorBody {
    /// Human-readable message
    pub error: String,
}

/// One streamed log line
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LogEvent {
    /// Emission time
    pub time: DateTime<Utc>,
    /// `INFO`, `WARN`, ...
    pub level: String,
    /// Rendered message
    pub message: String,
    /// Emitting node
    pub node: String,
}

fn default_true() -> bool {
    true
}
