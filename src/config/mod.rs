//! Configuration management
//!
//! Static TOML configuration for the control-plane daemon
//! ([`ControlConfig`]) and the edge agent ([`AgentConfig`]). Files are parsed
//! with serde defaults, then environment overrides are applied, then the
//! result is validated.

mod toml_parser;
mod validation;

pub use toml_parser::{load_file, parse_str};

use crate::error::Result;
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::warn;

/// Token every agent accepts until one is configured
pub const INSECURE_DEFAULT_TOKEN: &str = "DEFAULT_INSECURE_AGENT_TOKEN_CHANGE_ME";

/// Default agent port
pub const DEFAULT_AGENT_PORT: u16 = 5000;

/// Control-plane daemon configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ControlConfig {
    /// Tunnel address pool
    #[serde(default = "default_pool")]
    pub pool_cidr: String,

    /// Mark the pool's first host used at startup (it is the core gateway)
    #[serde(default = "default_true")]
    pub reserve_gateway: bool,

    /// Tunnel device of the core node
    #[serde(default = "default_interface")]
    pub core_interface: String,

    /// Tunnel UDP port advertised to clients of the core node
    #[serde(default = "default_listen_port")]
    pub listen_port: u16,

    /// Public host of the core node placed in client configs
    #[serde(default = "default_endpoint")]
    pub endpoint: String,

    /// Resolver placed in client configs
    #[serde(default = "default_client_dns")]
    pub client_dns: String,

    /// Shared secret sent to every agent
    #[serde(default = "default_token")]
    pub agent_token: String,

    /// Port agents listen on
    #[serde(default = "default_agent_port")]
    pub agent_port: u16,

    /// Per-request timeout for agent calls
    #[serde(default = "default_agent_timeout")]
    pub agent_timeout_secs: u64,

    /// Bind address of the health/metrics endpoint
    #[serde(default = "default_http_bind")]
    pub http_bind: String,

    /// Active peers a single account may hold
    #[serde(default = "default_max_devices")]
    pub max_devices_per_owner: usize,

    /// JSON file preloading the record store
    #[serde(default)]
    pub seed_path: Option<PathBuf>,

    /// Background timer intervals
    #[serde(default)]
    pub schedule: ScheduleConfig,

    /// Retention windows for pruning
    #[serde(default)]
    pub retention: RetentionConfig,
}

/// Background timer intervals, in seconds
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScheduleConfig {
    /// Node heartbeat
    #[serde(default = "default_heartbeat")]
    pub heartbeat_secs: u64,
    /// Traffic sample collection
    #[serde(default = "default_metrics")]
    pub metrics_secs: u64,
    /// Retention pruning
    #[serde(default = "default_pruning")]
    pub pruning_secs: u64,
    /// Fleet-wide key rotation
    #[serde(default = "default_rotation")]
    pub rotation_secs: u64,
}

/// Retention windows, in days
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetentionConfig {
    /// Traffic samples
    #[serde(default = "default_metrics_days")]
    pub metrics_days: u32,
    /// Audit entries
    #[serde(default = "default_audit_days")]
    pub audit_days: u32,
    /// Notifications
    #[serde(default = "default_notification_days")]
    pub notification_days: u32,
}

/// Edge agent configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentConfig {
    /// Listen address
    #[serde(default = "default_agent_bind")]
    pub bind: String,

    /// Shared secret expected in `X-ARMOR-TOKEN`
    #[serde(default = "default_token")]
    pub token: String,

    /// Node name stamped on streamed log events
    #[serde(default = "default_node_name")]
    pub node_name: String,

    /// Directory holding the persisted sync fingerprint
    #[serde(default = "default_state_dir")]
    pub state_dir: PathBuf,

    /// Interval of the log stream heartbeat event
    #[serde(default = "default_stream_heartbeat")]
    pub heartbeat_secs: u64,
}

impl ControlConfig {
    /// Load, apply environment overrides, and validate
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let mut config: Self = load_file(path)?;
        config.apply_env();
        config.validate()?;
        Ok(config)
    }

    /// Parse from a TOML string without environment overrides
    pub fn parse(toml: &str) -> Result<Self> {
        let config: Self = parse_str(toml)?;
        config.validate()?;
        Ok(config)
    }

    /// Apply `ARMOR_AGENT_TOKEN`, `ARMOR_ENDPOINT` and `ARMOR_AGENT_PORT`
    pub fn apply_env(&mut self) {
        if let Some(token) = env_nonempty("ARMOR_AGENT_TOKEN") {
            self.agent_token = token;
        }
        if let Some(endpoint) = env_nonempty("ARMOR_ENDPOINT") {
            self.endpoint = endpoint;
        }
        if let Some(port) = env_nonempty("ARMOR_AGENT_PORT") {
            match port.parse() {
                Ok(port) => self.agent_port = port,
                Err(_) => warn!(value = %port, "Ignoring invalid ARMOR_AGENT_PORT"),
            }
        }
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<()> {
        validation::validate_cidr(&self.pool_cidr)?;
        validation::validate_interface_name(&self.core_interface)?;
        validation::validate_port(self.listen_port)?;
        validation::validate_port(self.agent_port)?;
        validation::validate_ip_address(&self.client_dns)?;
        validation::validate_host(&self.endpoint)?;
        validation::validate_socket_addr(&self.http_bind)?;
        validation::validate_token(&self.agent_token)?;
        validation::validate_positive("agent_timeout_secs", self.agent_timeout_secs)?;
        validation::validate_positive("max_devices_per_owner", self.max_devices_per_owner as u64)?;
        self.schedule.validate()?;
        Ok(())
    }

    /// Whether agents are being addressed with the well-known default token
    pub fn uses_insecure_token(&self) -> bool {
        self.agent_token == INSECURE_DEFAULT_TOKEN
    }

    /// Per-request agent timeout
    pub fn agent_timeout(&self) -> Duration {
        Duration::from_secs(self.agent_timeout_secs)
    }
}

impl Default for ControlConfig {
    fn default() -> Self {
        Self {
            pool_cidr: default_pool(),
            reserve_gateway: true,
            core_interface: default_interface(),
            listen_port: default_listen_port(),
            endpoint: default_endpoint(),
            client_dns: default_client_dns(),
            agent_token: default_token(),
            agent_port: default_agent_port(),
            agent_timeout_secs: default_agent_timeout(),
            http_bind: default_http_bind(),
            max_devices_per_owner: default_max_devices(),
            seed_path: None,
            schedule: ScheduleConfig::default(),
            retention: RetentionConfig::default(),
        }
    }
}

impl ScheduleConfig {
    fn validate(&self) -> Result<()> {
        validation::validate_positive("schedule.heartbeat_secs", self.heartbeat_secs)?;
        validation::validate_positive("schedule.metrics_secs", self.metrics_secs)?;
        validation::validate_positive("schedule.pruning_secs", self.pruning_secs)?;
        validation::validate_positive("schedule.rotation_secs", self.rotation_secs)?;
        Ok(())
    }
}

impl Default for ScheduleConfig {
    fn default() -> Self {
        Self {
            heartbeat_secs: default_heartbeat(),
            metrics_secs: default_metrics(),
            pruning_secs: default_pruning(),
            rotation_secs: default_rotation(),
        }
    }
}

impl Default for RetentionConfig {
    fn default() -> Self {
        Self {
            metrics_days: default_metrics_days(),
            audit_days: default_audit_days(),
            notification_days: default_notification_days(),
        }
    }
}

impl AgentConfig {
    /// Load, apply environment overrides, and validate
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let mut config: Self = load_file(path)?;
        config.apply_env();
        config.validate()?;
        Ok(config)
    }

    /// Apply `ARMOR_AGENT_TOKEN` and `ARMOR_AGENT_PORT`
    pub fn apply_env(&mut self) {
        if let Some(token) = env_nonempty("ARMOR_AGENT_TOKEN") {
            self.token = token;
        }
        if let Some(port) = env_nonempty("ARMOR_AGENT_PORT") {
            match (self.bind.parse::<SocketAddr>(), port.parse::<u16>()) {
                (Ok(mut addr), Ok(port)) => {
                    addr.set_port(port);
                    self.bind = addr.to_string();
                }
                _ => warn!(value = %port, "Ignoring invalid ARMOR_AGENT_PORT"),
            }
        }
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<()> {
        validation::validate_socket_addr(&self.bind)?;
        validation::validate_token(&self.token)?;
        validation::validate_positive("heartbeat_secs", self.heartbeat_secs)?;
        Ok(())
    }

    /// Whether the agent accepts the well-known default token
    pub fn uses_insecure_token(&self) -> bool {
        self.token == INSECURE_DEFAULT_TOKEN
    }
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            bind: default_agent_bind(),
            token: default_token(),
            node_name: default_node_name(),
            state_dir: default_state_dir(),
            heartbeat_secs: default_stream_heartbeat(),
        }
    }
}

fn env_nonempty(key: &str) -> Option<String> {
    std::env::var(key).ok().filter(|v| !v.trim().is_empty())
}

// Default value functions for serde
fn default_pool() -> String {
    "10.8.0.0/22".to_string()
}

fn default_true() -> bool {
    true
}

fn default_interface() -> String {
    crate::models::DEFAULT_INTERFACE.to_string()
}

fn default_listen_port() -> u16 {
    crate::models::DEFAULT_LISTEN_PORT
}

fn default_endpoint() -> String {
    "127.0.0.1".to_string()
}

fn default_client_dns() -> String {
    crate::wireguard::client_config::DEFAULT_CLIENT_DNS.to_string()
}

fn default_token() -> String {
    INSECURE_DEFAULT_TOKEN.to_string()
}

fn default_agent_port() -> u16 {
    DEFAULT_AGENT_PORT
}

fn default_agent_timeout() -> u64 {
    10
}

fn default_http_bind() -> String {
    "127.0.0.1:8080".to_string()
}

fn default_max_devices() -> usize {
    5
}

fn default_heartbeat() -> u64 {
    30
}

fn default_metrics() -> u64 {
    5 * 60
}

fn default_pruning() -> u64 {
    24 * 60 * 60
}

fn default_rotation() -> u64 {
    30 * 24 * 60 * 60
}

fn default_metrics_days() -> u32 {
    7
}

fn default_audit_days() -> u32 {
    30
}

fn default_notification_days() -> u32 {
    7
}

fn default_agent_bind() -> String {
    format!("0.0.0.0:{}", DEFAULT_AGENT_PORT)
}

fn default_node_name() -> String {
    "ARMOR-EDGE".to_string()
}

fn default_state_dir() -> PathBuf {
    PathBuf::from("/var/lib/armor")
}

fn default_stream_heartbeat() -> u64 {
    3
}
