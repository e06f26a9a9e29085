//! Client tunnel config artifact
//!
//! The rendered text is consumed by stock WireGuard clients and must keep
//! this exact shape, including the absence of a trailing newline.

use std::fmt;
use std::net::IpAddr;

/// Default resolver placed in client configs
pub const DEFAULT_CLIENT_DNS: &str = "1.1.1.1";

/// Keepalive interval placed in client configs, in seconds
pub const KEEPALIVE_SECS: u16 = 25;

/// Inputs for one client config
#[derive(Clone)]
pub struct ClientConfig {
    /// Client private key, base64
    pub private_key: String,
    /// Client tunnel address
    pub address: IpAddr,
    /// Client resolver
    pub dns: String,
    /// Gateway device public key, base64
    pub server_public_key: String,
    /// Gateway host
    pub endpoint_host: String,
    /// Gateway UDP port
    pub endpoint_port: u16,
}

impl ClientConfig {
    /// Render the `[Interface]`/`[Peer]` text block
    pub fn render(&self) -> String {
        let prefix = if self.address.is_ipv4() { 32 } else { 128 };
        format!(
            "[Interface]\n\
             PrivateKey = {}\n\
             Address = {}/{}\n\
             DNS = {}\n\
             \n\
             [Peer]\n\
             PublicKey = {}\n\
             Endpoint = {}:{}\n\
             AllowedIPs = 0.0.0.0/0\n\
             PersistentKeepalive = {}",
            self.private_key,
            self.address,
            prefix,
            self.dns,
            self.server_public_key,
            self.endpoint_host,
            self.endpoint_port,
            KEEPALIVE_SECS
        )
    }
}

impl fmt::Debug for ClientConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ClientConfig")
            .field("private_key", &"[REDACTED]")
            .field("address", &self.address)
            .field("server_public_key", &self.server_public_key)
            .field("endpoint", &format!("{}:{}", self.endpoint_host, self.endpoint_port))
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_render_exact_shape() {
        let config = ClientConfig {
            private_key: "cHJpdmF0ZQ==".to_string(),
            address: "10.8.0.2".parse().unwrap(),
            dns: DEFAULT_CLIENT_DNS.to_string(),
            server_public_key: "c2VydmVy".to_string(),
            endpoint_host: "vpn.example.net".to_string(),
            endpoint_port: 51820,
        };

        let expected = "[Interface]\nPrivateKey = cHJpdmF0ZQ==\nAddress = 10.8.0.2/32\nDNS = 1.1.1.1\n\n[Peer]\nPublicKey = c2VydmVy\nEndpoint = vpn.example.net:51820\nAllowedIPs = 0.0.0.0/0\nPersistentKeepalive = 25";
        assert_eq!(config.render(), expected);
    }

    #[test]
    fn test_debug_redacts_private_key() {
        let config = ClientConfig {
            private_key: "c2VjcmV0".to_string(),
            address: "10.8.0.9".parse().unwrap(),
            dns: DEFAULT_CLIENT_DNS.to_string(),
            server_public_key: "c2VydmVy".to_string(),
            endpoint_host: "127.0.0.1".to_string(),
            endpoint_port: 51820,
        };
        assert!(!format!("{:?}", config).contains("c2VjcmV0"));
    }
}
