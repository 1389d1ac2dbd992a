//! Configuration module
//!
//! Handles the gateway's TOML configuration file

mod settings;

pub use settings::{AclConfig, ConfigError, GatewayConfig};
