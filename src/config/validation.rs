//! Configuration validation functions

use crate::error::{ArmorError, Result};
use ipnet::IpNet;
use std::net::{IpAddr, SocketAddr};

/// Validate interface name (alphanumeric, max 15 chars)
pub fn validate_interface_name(name: &str) -> Result<()> {
    if name.is_empty() {
        return Err(ArmorError::Config("Interface name cannot be empty".to_string()));
    }

    if name.len() > 15 {
        return Err(ArmorError::Config(format!(
            "Interface name '{}' exceeds maximum length of 15 characters",
            name
        )));
    }

    if !name.chars().all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-') {
        return Err(ArmorError::Config(format!(
            "Interface name '{}' contains invalid characters (only alphanumeric, '_', and '-' allowed)",
            name
        )));
    }

    Ok(())
}

/// Validate IP address
pub fn validate_ip_address(ip: &str) -> Result<()> {
    ip.parse::<IpAddr>()
        .map_err(|_| ArmorError::Config(format!("Invalid IP address: {}", ip)))?;
    Ok(())
}

/// Validate CIDR notation (IP/prefix)
pub fn validate_cidr(cidr: &str) -> Result<()> {
    let net: IpNet = cidr.parse().map_err(|_| {
        ArmorError::Config(format!(
            "Invalid CIDR notation: {} (expected format: IP/prefix)",
            cidr
        ))
    })?;

    // /31 and /32 (or /127, /128) leave nothing once network and broadcast are excluded
    if net.prefix_len() + 1 >= net.max_prefix_len() {
        return Err(ArmorError::Config(format!("CIDR {} has no host addresses", cidr)));
    }
    Ok(())
}

/// Validate a `host:port` bind address
pub fn validate_socket_addr(addr: &str) -> Result<()> {
    addr.parse::<SocketAddr>()
        .map_err(|_| ArmorError::Config(format!("Invalid bind address: {} (expected IP:port)", addr)))?;
    Ok(())
}

/// Validate a hostname or IP placed in client configs
pub fn validate_host(host: &str) -> Result<()> {
    if host.parse::<IpAddr>().is_ok() {
        return Ok(());
    }

    let valid = !host.is_empty()
        && host.len() <= 253
        && host.split('.').all(|label| {
            !label.is_empty()
                && label.len() <= 63
                && label.chars().all(|c| c.is_ascii_alphanumeric() || c == '-')
                && !label.starts_with('-')
                && !label.ends_with('-')
        });

    if valid {
        Ok(())
    } else {
        Err(ArmorError::Config(format!("Invalid endpoint host: {}", host)))
    }
}

/// Validate port number
pub fn validate_port(port: u16) -> Result<()> {
    if port == 0 {
        return Err(ArmorError::Config("Port cannot be 0".to_string()));
    }
    Ok(())
}

/// Validate the shared agent token
pub fn validate_token(token: &str) -> Result<()> {
    if token.trim().is_empty() {
        return Err(ArmorError::Config("Agent token cannot be empty".to_string()));
    }
    if !token.chars().all(|c| c.is_ascii_graphic()) {
        return Err(ArmorError::Config(
            "Agent token must be printable ASCII without spaces".to_string(),
        ));
    }
    Ok(())
}

/// Validate a value that must be non-zero
pub fn validate_positive(field: &str, value: u64) -> Result<()> {
    if value == 0 {
        return Err(ArmorError::Config(format!("{} must be greater than 0", field)));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validate_interface_name() {
        assert!(validate_interface_name("wg0").is_ok());
        assert!(validate_interface_name("wg-armor_1").is_ok());
        assert!(validate_interface_name("").is_err());
        assert!(validate_interface_name("this_is_way_too_long").is_err());
        assert!(validate_interface_name("wg0!").is_err());
    }

    #[test]
    fn test_validate_cidr() {
        assert!(validate_cidr("10.8.0.0/22").is_ok());
        assert!(validate_cidr("fd00::/64").is_ok());
        assert!(validate_cidr("10.8.0.0").is_err());
        assert!(validate_cidr("10.8.0.0/33").is_err());
        assert!(validate_cidr("10.8.0.1/32").is_err());
    }

    #[test]
    fn test_validate_host() {
        assert!(validate_host("203.0.113.10").is_ok());
        assert!(validate_host("vpn.example.net").is_ok());
        assert!(validate_host("bad host").is_err());
        assert!(validate_host("-leading.example").is_err());
        assert!(validate_host("").is_err());
    }

    #[test]
    fn test_validate_token() {
        assert!(validate_token("abc123").is_ok());
        assert!(validate_token("   ").is_err());
        assert!(validate_token("with space").is_err());
    }

    #[test]
    fn test_validate_socket_addr() {
        assert!(validate_socket_addr("0.0.0.0:5000").is_ok());
        assert!(validate_socket_addr("localhost").is_err());
    }
}
