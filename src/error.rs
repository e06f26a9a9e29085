//! Error types for armor-control
//!
//! This module defines the error types used throughout the control plane and
//! the edge agent. We use `thiserror` for ergonomic error definitions and
//! `anyhow` for error propagation in the binaries.

use thiserror::Error;

/// Main error type for control-plane and agent operations
#[derive(Error, Debug)]
pub enum ArmorError {
    /// The address pool has no free host address left
    #[error("Address pool {subnet} exhausted")]
    PoolExhausted {
        /// The pool CIDR
        subnet: String,
    },

    /// Malformed key/CIDR or the local tunnel device could not be configured
    #[error("Device configuration error: {0}")]
    DeviceConfig(String),

    /// The packet-filter transaction failed
    #[error("Firewall sync failed: {0}")]
    FirewallSync(String),

    /// Network failure talking to an edge agent
    #[error("Agent on node '{node}' unreachable: {reason}")]
    AgentUnreachable {
        /// Node name
        node: String,
        /// Underlying transport failure
        reason: String,
    },

    /// The edge agent answered with a non-success status or a malformed body
    #[error("Agent on node '{node}' returned {status}: {message}")]
    AgentError {
        /// Node name
        node: String,
        /// HTTP status code (0 when the body, not the status, was the problem)
        status: u16,
        /// Error message reported by the agent
        message: String,
    },

    /// Configuration-related errors
    #[error("Configuration error: {0}")]
    Config(String),

    /// Input validation errors
    #[error("Validation error: {0}")]
    Validation(String),

    /// Not found errors
    #[error("Not found: {0}")]
    NotFound(String),

    /// A policy limit or uniqueness constraint was hit
    #[error("Conflict: {0}")]
    Conflict(String),

    /// Invalid state errors
    #[error("Invalid state: {0}")]
    InvalidState(String),

    /// Record store failures
    #[error("Record store error: {0}")]
    Store(String),

    /// I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization/deserialization errors
    #[error("Serialization error: {0}")]
    Serialization(String),
}

impl ArmorError {
    /// Whether this error means the node could not be talked to at all
    pub fn is_unreachable(&self) -> bool {
        matches!(self, ArmorError::AgentUnreachable { .. })
    }
}

/// Result type alias using ArmorError
pub type Result<T> = std::result::Result<T, ArmorError>;

impl From<serde_json::Error> for ArmorError {
    fn from(err: serde_json::Error) -> Self {
        ArmorError::Serialization(err.to_string())
    }
}

impl From<toml::de::Error> for ArmorError {
    fn from(err: toml::de::Error) -> Self {
        ArmorError::Config(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pool_exhausted_message() {
        let err = ArmorError::PoolExhausted {
            subnet: "10.8.0.0/30".to_string(),
        };
        assert_eq!(err.to_string(), "Address pool 10.8.0.0/30 exhausted");
    }

    #[test]
    fn test_toml_error_maps_to_config() {
        let err: ArmorError = toml::from_str::<toml::Value>("= broken").unwrap_err().into();
        assert!(matches!(err, ArmorError::Config(_)));
    }

    #[test]
    fn test_unreachable_classification() {
        let err = ArmorError::AgentUnreachable {
            node: "edge-1".to_string(),
            reason: "connection refused".to_string(),
        };
        assert!(err.is_unreachable());
        assert!(!ArmorError::NotFound("x".to_string()).is_unreachable());
    }
}
