//! TOML configuration file loading

use crate::error::{ArmorError, Result};
use serde::de::DeserializeOwned;
use std::fs;
use std::path::Path;
use tracing::debug;

/// Load and deserialize a TOML file
pub fn load_file<T: DeserializeOwned, P: AsRef<Path>>(path: P) -> Result<T> {
    let path = path.as_ref();
    let contents = fs::read_to_string(path).map_err(|e| {
        ArmorError::Config(format!("Failed to read config file {:?}: {}", path, e))
    })?;

    debug!(path = ?path, "Loaded configuration file");
    toml::from_str(&contents)
        .map_err(|e| ArmorError::Config(format!("Failed to parse TOML config {:?}: {}", path, e)))
}

/// Deserialize a TOML string
pub fn parse_str<T: DeserializeOwned>(toml: &str) -> Result<T> {
    toml::from_str(toml).map_err(|e| ArmorError::Config(format!("Failed to parse TOML: {}", e)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ControlConfig;

    #[test]
    fn test_missing_file() {
        let err = load_file::<ControlConfig, _>("/nonexistent/armor/control.toml").unwrap_err();
        assert!(err.to_string().contains("Failed to read config file"));
    }

    #[test]
    fn test_malformed_toml() {
        let err = parse_str::<ControlConfig>("pool_cidr = ").unwrap_err();
        assert!(matches!(err, ArmorError::Config(_)));
    }

    #[test]
    fn test_wrong_type() {
        assert!(parse_str::<ControlConfig>("agent_port = \"five thousand\"").is_err());
    }
}
