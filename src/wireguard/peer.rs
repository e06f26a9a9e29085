//! Live peer statistics read from a tunnel device
//!
//! This module parses the tab-separated output of `wg show <iface> dump`
//! into [`DevicePeer`] records. The same records are what the agent reports
//! over `GET /agent/v1/status`.

use crate::error::{ArmorError, Result};
use chrono::{DateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// One peer as currently configured on a tunnel device
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct DevicePeer {
    /// Base64 public key
    pub public_key: String,
    /// Last known remote endpoint
    #[serde(default)]
    pub endpoint: Option<String>,
    /// Allowed addresses configured on the device
    #[serde(default)]
    pub allowed_ips: Vec<String>,
    /// Last completed handshake
    #[serde(default)]
    pub last_handshake: Option<DateTime<Utc>>,
    /// Total bytes received from this peer
    #[serde(default)]
    pub rx_bytes: u64,
    /// Total bytes transmitted to this peer
    #[serde(default)]
    pub tx_bytes: u64,
    /// Keepalive interval in seconds
    #[serde(default)]
    pub persistent_keepalive: Option<u16>,
}

impl DevicePeer {
    /// Check if the peer had a recent handshake (within last 3 minutes)
    pub fn has_recent_handshake(&self) -> bool {
        self.last_handshake
            .and_then(|last| (Utc::now() - last).to_std().ok())
            .is_some_and(|elapsed| elapsed < Duration::from_secs(180))
    }
}

/// Parse the peer lines of `wg show <iface> dump`.
///
/// The first line describes the interface itself and is skipped.
pub fn parse_dump(output: &str) -> Result<Vec<DevicePeer>> {
    output
        .lines()
        .skip(1)
        .filter(|line| !line.trim().is_empty())
        .map(parse_peer_line)
        .collect()
}

/// Fields: public-key, preshared-key, endpoint, allowed-ips, latest-handshake,
/// transfer-rx, transfer-tx, persistent-keepalive.
fn parse_peer_line(line: &str) -> Result<DevicePeer> {
    let fields: Vec<&str> = line.split('\t').collect();
    if fields.len() < 8 {
        return Err(ArmorError::DeviceConfig(format!(
            "Malformed peer line in device dump: expected 8 fields, got {}",
            fields.len()
        )));
    }

    let number = |idx: usize, what: &str| -> Result<u64> {
        fields[idx].parse::<u64>().map_err(|e| {
            ArmorError::DeviceConfig(format!("Invalid {} '{}' in device dump: {}", what, fields[idx], e))
        })
    };

    let handshake_secs = number(4, "handshake timestamp")?;
    let last_handshake = match handshake_secs {
        0 => None,
        secs => i64::try_from(secs)
            .ok()
            .and_then(|s| Utc.timestamp_opt(s, 0).single()),
    };

    Ok(DevicePeer {
        public_key: fields[0].to_string(),
        endpoint: none_if_unset(fields[2]),
        allowed_ips: match none_if_unset(fields[3]) {
            Some(list) => list.split(',').map(|s| s.trim().to_string()).collect(),
            None => Vec::new(),
        },
        last_handshake,
        rx_bytes: number(5, "rx counter")?,
        tx_bytes: number(6, "tx counter")?,
        persistent_keepalive: fields[7].parse::<u16>().ok().filter(|k| *k > 0),
    })
}

fn none_if_unset(field: &str) -> Option<String> {
    match field {
        "" | "(none)" | "off" => None,
        value => Some(value.to_string()),
    }
}
