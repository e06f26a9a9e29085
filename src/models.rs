//! Durable records shared between the control plane and the record store
//!
//! These are the shapes the external record store persists and the agent
//! protocol carries. Field names follow the JSON wire format.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::net::IpAddr;

/// Default tunnel listen port advertised in client configs
pub const DEFAULT_LISTEN_PORT: u16 = 51820;

/// Default tunnel device name
pub const DEFAULT_INTERFACE: &str = "wg0";

/// Lifecycle status of a gateway node
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum NodeStatus {
    /// Last heartbeat succeeded
    Online,
    /// Last heartbeat failed or the node was never reached
    #[default]
    Offline,
    /// A manual sync is in flight
    Syncing,
}

impl fmt::Display for NodeStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Online => write!(f, "online"),
            Self::Offline => write!(f, "offline"),
            Self::Syncing => write!(f, "syncing"),
        }
    }
}

/// A gateway node (core or edge)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Node {
    /// Record identity
    pub id: u64,
    /// Unique display name
    pub name: String,
    /// Address the agent is reachable on; empty or loopback for the core node
    #[serde(default)]
    pub public_ip: String,
    /// Tunnel UDP port
    #[serde(default = "default_listen_port")]
    pub listen_port: u16,
    /// Tunnel subnet served by this node
    #[serde(default)]
    pub tunnel_subnet: String,
    /// Tunnel device name on the node
    #[serde(default = "default_interface")]
    pub interface_name: String,
    /// Region tag
    #[serde(default = "default_region")]
    pub region: String,
    /// Geo tag
    #[serde(default, rename = "lat")]
    pub latitude: f64,
    /// Geo tag
    #[serde(default, rename = "lng")]
    pub longitude: f64,
    /// Lifecycle status
    #[serde(default)]
    pub status: NodeStatus,
    /// Whether the node takes part in metrics collection
    #[serde(default = "default_true")]
    pub is_active: bool,
    /// Last successful heartbeat
    #[serde(default)]
    pub last_seen: Option<DateTime<Utc>>,
    /// Fingerprint the node last reported
    #[serde(default, rename = "last_sync_hash")]
    pub observed_fingerprint: Option<String>,
    /// Fingerprint of the peer set last successfully pushed to the node
    #[serde(default, rename = "desired_hash")]
    pub desired_fingerprint: Option<String>,
    /// Tunnel device public key, as reported by the node
    #[serde(default)]
    pub public_key: Option<String>,
}

impl Node {
    /// Create an edge node record with defaults
    pub fn new(id: u64, name: impl Into<String>, public_ip: impl Into<String>) -> Self {
        Self {
            id,
            name: name.into(),
            public_ip: public_ip.into(),
            listen_port: DEFAULT_LISTEN_PORT,
            tunnel_subnet: String::new(),
            interface_name: default_interface(),
            region: default_region(),
            latitude: 0.0,
            longitude: 0.0,
            status: NodeStatus::Offline,
            is_active: true,
            last_seen: None,
            observed_fingerprint: None,
            desired_fingerprint: None,
            public_key: None,
        }
    }

    /// The core node is colocated with the control plane
    pub fn is_core(&self) -> bool {
        let ip = self.public_ip.trim();
        ip.is_empty() || ip == "localhost" || ip.parse::<IpAddr>().is_ok_and(|a| a.is_loopback())
    }

    /// Non-empty desired fingerprint, if any
    pub fn desired(&self) -> Option<&str> {
        self.desired_fingerprint.as_deref().filter(|h| !h.is_empty())
    }
}

/// Lifecycle status of a peer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum PeerStatus {
    /// Present on its device
    #[default]
    Active,
    /// Removed from its device; record and address retained
    Revoked,
}

impl fmt::Display for PeerStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Active => write!(f, "active"),
            Self::Revoked => write!(f, "revoked"),
        }
    }
}

/// A cryptographic tunnel identity owned by one account
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Peer {
    /// Record identity
    pub id: u64,
    /// Owning account
    pub user_id: u64,
    /// Assigned gateway; `None` means the core node
    #[serde(default)]
    pub node_id: Option<u64>,
    /// Base64 public key (unique)
    pub public_key: String,
    /// Tunnel address drawn from the allocator (unique)
    pub assigned_ip: IpAddr,
    /// Client-side allowed addresses
    #[serde(default = "default_allowed_ips")]
    pub allowed_ips: String,
    /// Lifecycle status
    #[serde(default)]
    pub status: PeerStatus,
    /// Free-form device label
    #[serde(default)]
    pub device_name: String,
    /// Created through self-provisioning
    #[serde(default)]
    pub is_provisioned: bool,
    /// Creation time
    pub created_at: DateTime<Utc>,
    /// Last key rotation
    #[serde(default)]
    pub rotated_at: Option<DateTime<Utc>>,
}

impl Peer {
    /// Whether the peer should be present on its device
    pub fn is_active(&self) -> bool {
        self.status == PeerStatus::Active
    }

    /// Host route the tunnel device accepts from this peer
    pub fn device_allowed_ips(&self) -> Vec<String> {
        let prefix = if self.assigned_ip.is_ipv4() { 32 } else { 128 };
        vec![format!("{}/{}", self.assigned_ip, prefix)]
    }
}

/// Descriptor of a peer as pushed to a node; the unit of fingerprinting
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PeerSpec {
    /// Base64 public key
    pub public_key: String,
    /// Tunnel address
    pub assigned_ip: IpAddr,
    /// Client-side allowed addresses
    #[serde(default = "default_allowed_ips")]
    pub allowed_ips: String,
    /// Lifecycle status
    #[serde(default)]
    pub status: PeerStatus,
}

impl From<&Peer> for PeerSpec {
    fn from(peer: &Peer) -> Self {
        Self {
            public_key: peer.public_key.clone(),
            assigned_ip: peer.assigned_ip,
            allowed_ips: peer.allowed_ips.clone(),
            status: peer.status,
        }
    }
}

impl PeerSpec {
    /// Host route the tunnel device accepts from this peer
    pub fn device_allowed_ips(&self) -> Vec<String> {
        let prefix = if self.assigned_ip.is_ipv4() { 32 } else { 128 };
        vec![format!("{}/{}", self.assigned_ip, prefix)]
    }
}

/// Firewall verdict
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
pub enum RuleAction {
    /// Accept matching traffic
    #[default]
    #[serde(rename = "ALLOW", alias = "allow")]
    Allow,
    /// Drop matching traffic
    #[serde(rename = "DENY", alias = "deny")]
    Deny,
}

/// Declarative forward-filter statement
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FirewallRule {
    /// Record identity
    #[serde(default)]
    pub id: u64,
    /// Free-form note
    #[serde(default)]
    pub description: String,
    /// Source address/CIDR or `any`
    #[serde(default = "default_any")]
    pub source_ip: String,
    /// Destination address/CIDR or `any`
    #[serde(default = "default_any")]
    pub destination: String,
    /// Destination port, range, or `any`
    #[serde(default = "default_any")]
    pub port: String,
    /// `tcp`, `udp` or `any`
    #[serde(default = "default_any")]
    pub protocol: String,
    /// Verdict
    #[serde(default)]
    pub action: RuleAction,
    /// Creation time
    #[serde(default = "Utc::now")]
    pub created_at: DateTime<Utc>,
}

impl FirewallRule {
    /// Build a rule with the given match and verdict
    pub fn new(source_ip: &str, destination: &str, port: &str, protocol: &str, action: RuleAction) -> Self {
        Self {
            id: 0,
            description: String::new(),
            source_ip: source_ip.to_string(),
            destination: destination.to_string(),
            port: port.to_string(),
            protocol: protocol.to_string(),
            action,
            created_at: Utc::now(),
        }
    }
}

/// Process-wide NAT and outreach policy (singleton record)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SystemConfig {
    /// Deployment display name
    #[serde(default = "default_matrix_name")]
    pub matrix_name: String,
    /// Support contact
    #[serde(default = "default_support_email")]
    pub support_email: String,
    /// Public address of the core gateway
    #[serde(default = "default_loopback")]
    pub public_gateway_ip: String,
    /// Internal subnet label
    #[serde(default = "default_internal_subnet")]
    pub internal_subnet: String,
    /// Redirect DNS to `pihole_address`
    #[serde(default)]
    pub dns_filtering_active: bool,
    /// DNS filter target
    #[serde(default = "default_loopback")]
    pub pihole_address: String,
    /// Stealth endpoint toggle
    #[serde(default)]
    pub stealth_apn_active: bool,
    /// Stealth endpoint host
    #[serde(default)]
    pub stealth_apn_host: String,
    /// Blackout: no masquerade, WAN forwarding dropped
    #[serde(default)]
    pub internet_access_limited: bool,
    /// Uplink interface
    #[serde(default = "default_wan")]
    pub wan_interface: String,
    /// Last modification
    #[serde(default = "Utc::now")]
    pub updated_at: DateTime<Utc>,
}

impl Default for SystemConfig {
    fn default() -> Self {
        Self {
            matrix_name: default_matrix_name(),
            support_email: default_support_email(),
            public_gateway_ip: default_loopback(),
            internal_subnet: default_internal_subnet(),
            dns_filtering_active: false,
            pihole_address: default_loopback(),
            stealth_apn_active: false,
            stealth_apn_host: String::new(),
            internet_access_limited: false,
            wan_interface: default_wan(),
            updated_at: Utc::now(),
        }
    }
}

/// Partial update of the system config; `None` leaves a field untouched
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SystemConfigUpdate {
    #[allow(missing_docs)]
    pub matrix_name: Option<String>,
    #[allow(missing_docs)]
    pub support_email: Option<String>,
    #[allow(missing_docs)]
    pub public_gateway_ip: Option<String>,
    #[allow(missing_docs)]
    pub internal_subnet: Option<String>,
    #[allow(missing_docs)]
    pub dns_filtering_active: Option<bool>,
    #[allow(missing_docs)]
    pub pihole_address: Option<String>,
    #[allow(missing_docs)]
    pub stealth_apn_active: Option<bool>,
    #[allow(missing_docs)]
    pub stealth_apn_host: Option<String>,
    #[allow(missing_docs)]
    pub internet_access_limited: Option<bool>,
    #[allow(missing_docs)]
    pub wan_interface: Option<String>,
}

impl SystemConfig {
    /// Apply a partial update. Empty strings are ignored.
    pub fn apply(&mut self, update: SystemConfigUpdate) {
        fn set(target: &mut String, value: Option<String>) {
            if let Some(v) = value.filter(|v| !v.is_empty()) {
                *target = v;
            }
        }

        set(&mut self.matrix_name, update.matrix_name);
        set(&mut self.support_email, update.support_email);
        set(&mut self.public_gateway_ip, update.public_gateway_ip);
        set(&mut self.internal_subnet, update.internal_subnet);
        set(&mut self.pihole_address, update.pihole_address);
        set(&mut self.stealth_apn_host, update.stealth_apn_host);
        set(&mut self.wan_interface, update.wan_interface);
        if let Some(v) = update.dns_filtering_active {
            self.dns_filtering_active = v;
        }
        if let Some(v) = update.stealth_apn_active {
            self.stealth_apn_active = v;
        }
        if let Some(v) = update.internet_access_limited {
            self.internet_access_limited = v;
        }
        self.updated_at = Utc::now();
    }
}

/// One byte-counter sample for a peer on a node
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PeerMetric {
    #[allow(missing_docs)]
    pub id: u64,
    #[allow(missing_docs)]
    pub peer_id: u64,
    #[allow(missing_docs)]
    pub node_id: u64,
    #[allow(missing_docs)]
    pub timestamp: DateTime<Utc>,
    #[allow(missing_docs)]
    pub rx_bytes: u64,
    #[allow(missing_docs)]
    pub tx_bytes: u64,
}

/// Append-only audit record
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditEntry {
    #[allow(missing_docs)]
    pub id: u64,
    #[allow(missing_docs)]
    pub timestamp: DateTime<Utc>,
    /// Acting account; 0 for the system itself
    pub actor_id: u64,
    /// e.g. `CREATE_PEER`, `REVOKE_PEER`
    pub action: String,
    #[allow(missing_docs)]
    pub resource_id: String,
    #[allow(missing_docs)]
    pub payload: String,
    #[allow(missing_docs)]
    pub source_ip: String,
}

/// Notification severity
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum NotificationKind {
    #[allow(missing_docs)]
    #[default]
    Info,
    #[allow(missing_docs)]
    Warning,
    #[allow(missing_docs)]
    Error,
    #[allow(missing_docs)]
    Success,
}

/// User-facing notification; `user_id == 0` addresses everyone
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Notification {
    #[allow(missing_docs)]
    pub id: u64,
    #[allow(missing_docs)]
    pub user_id: u64,
    #[allow(missing_docs)]
    #[serde(rename = "type")]
    pub kind: NotificationKind,
    #[allow(missing_docs)]
    pub title: String,
    #[allow(missing_docs)]
    pub message: String,
    #[allow(missing_docs)]
    pub is_read: bool,
    #[allow(missing_docs)]
    pub created_at: DateTime<Utc>,
}

fn default_listen_port() -> u16 {
    DEFAULT_LISTEN_PORT
}

fn default_interface() -> String {
    DEFAULT_INTERFACE.to_string()
}

fn default_region() -> String {
    "Global".to_string()
}

fn default_true() -> bool {
    true
}

fn default_allowed_ips() -> String {
    "0.0.0.0/0".to_string()
}

fn default_any() -> String {
    "any".to_string()
}

fn default_matrix_name() -> String {
    "ARMOR-X1 COMMAND".to_string()
}

fn default_support_email() -> String {
    "support@armor-x1.local".to_string()
}

fn default_loopback() -> String {
    "127.0.0.1".to_string()
}

fn default_internal_subnet() -> String {
    "10.9.0.0/22".to_string()
}

fn default_wan() -> String {
    "eth0".to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_core_node_detection() {
        assert!(Node::new(1, "core", "").is_core());
        assert!(Node::new(1, "core", "127.0.0.1").is_core());
        assert!(Node::new(1, "core", "localhost").is_core());
        assert!(Node::new(1, "core", "::1").is_core());
        assert!(!Node::new(2, "edge", "203.0.113.7").is_core());
    }

    #[test]
    fn test_empty_desired_fingerprint_is_none() {
        let mut node = Node::new(2, "edge", "203.0.113.7");
        node.desired_fingerprint = Some(String::new());
        assert!(node.desired().is_none());
        node.desired_fingerprint = Some("abc".to_string());
        assert_eq!(node.desired(), Some("abc"));
    }

    #[test]
    fn test_rule_action_wire_format() {
        let rule: FirewallRule = serde_json::from_str(
            r#"{"source_ip":"10.8.0.2","destination":"any","port":"22","protocol":"tcp","action":"DENY"}"#,
        )
        .unwrap();
        assert_eq!(rule.action, RuleAction::Deny);
        assert_eq!(serde_json::to_value(RuleAction::Allow).unwrap(), "ALLOW");
    }

    #[test]
    fn test_system_config_partial_update() {
        let mut config = SystemConfig::default();
        config.apply(SystemConfigUpdate {
            internet_access_limited: Some(true),
            wan_interface: Some(String::new()),
            pihole_address: Some("10.8.0.53".to_string()),
            ..Default::default()
        });
        assert!(config.internet_access_limited);
        assert_eq!(config.wan_interface, "eth0");
        assert_eq!(config.pihole_address, "10.8.0.53");
    }

    #[test]
    fn test_node_wire_names() {
        let mut node = Node::new(3, "edge-3", "198.51.100.3");
        node.desired_fingerprint = Some("h1".to_string());
        let json = serde_json::to_value(&node).unwrap();
        assert_eq!(json["desired_hash"], "h1");
        assert_eq!(json["status"], "offline");
        assert_eq!(json["interface_name"], "wg0");
    }
}
