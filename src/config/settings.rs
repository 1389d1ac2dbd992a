//! Gateway settings: server, serial device, and access list sections

use crate::core::acl::AccessList;
use crate::core::server::ServerConfig;
use crate::core::transport::SerialConfig;
use serde::{Deserialize, Serialize};
use std::net::IpAddr;
use std::path::Path;
use thiserror::Error;

/// Configuration errors
#[derive(Error, Debug)]
pub enum ConfigError {
    /// Could not read or write the configuration file
    #[error("Config file error: {0}")]
    Io(#[from] std::io::Error),

    /// Configuration file is not valid TOML
    #[error("Config parse error: {0}")]
    Parse(#[from] toml::de::Error),

    /// Configuration could not be serialized
    #[error("Config serialize error: {0}")]
    Serialize(#[from] toml::ser::Error),

    /// An access list entry is not a valid IP address
    #[error("Invalid address in access list: {0}")]
    InvalidAddress(String),
}

/// Access list section
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AclConfig {
    /// Whether the access list is consulted at all
    pub enabled: bool,
    /// Client addresses admitted when enabled
    pub allow: Vec<String>,
}

impl AclConfig {
    /// Build the runtime predicate from this section
    pub fn access_list(&self) -> Result<AccessList, ConfigError> {
        if !self.enabled {
            return Ok(AccessList::disabled());
        }

        let addrs = self
            .allow
            .iter()
            .map(|s| {
                s.parse::<IpAddr>()
                    .map_err(|_| ConfigError::InvalidAddress(s.clone()))
            })
            .collect::<Result<Vec<_>, _>>()?;

        Ok(AccessList::new(addrs))
    }
}

/// Full gateway configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct GatewayConfig {
    /// Listening socket settings
    pub server: ServerConfig,
    /// Serial device settings
    pub serial: SerialConfig,
    /// Access list settings
    pub acl: AclConfig,
}

impl GatewayConfig {
    /// Load configuration from a TOML file
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        Ok(toml::from_str(&content)?)
    }

    /// Save configuration to a TOML file
    pub fn save(&self, path: &Path) -> Result<(), ConfigError> {
        let content = toml::to_string_pretty(self)?;
        std::fs::write(path, content)?;
        Ok(())
    }
}
