//! # Portgate Core Library
//!
//! A serial-to-TCP gateway: one RS-232/USB-serial device served to many TCP
//! clients with strict request/response pairing per write.
//!
//! ## How it works
//!
//! - A single worker thread owns the serial device and services a FIFO of
//!   pending writes: write the payload, drain the device's response, complete
//!   the write's correlation token.
//! - A single-threaded TCP front accepts clients, reads one request burst at
//!   a time, submits it to the serial transport, and routes the correlated
//!   response back to the submitting client only.
//! - An optional access list filters clients by address before a handler is
//!   created.
//!
//! ## Example
//!
//! ```rust,no_run
//! use portgate_core::{AccessList, DrainTiming, Gateway, SerialConfig, SerialTransport, ServerConfig};
//! use std::sync::Arc;
//!
//! #[tokio::main(flavor = "current_thread")]
//! async fn main() -> anyhow::Result<()> {
//!     let serial = SerialConfig::new("/dev/ttyUSB0", 9600);
//!     let timing = DrainTiming::from(&serial);
//!     let device = serial.open()?;
//!
//!     let transport = Arc::new(SerialTransport::start(device, timing));
//!     let gateway = Gateway::new(ServerConfig::default(), transport, AccessList::disabled());
//!     gateway.run().await?;
//!     Ok(())
//! }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod config;
pub mod core;

// Re-exports for convenience
pub use crate::config::{AclConfig, ConfigError, GatewayConfig};
pub use crate::core::acl::AccessList;
pub use crate::core::server::{Gateway, GatewayError, GatewayStats, ServerConfig};
pub use crate::core::transport::{
    list_ports, DeviceLink, DrainTiming, SerialConfig, SerialFlowControl, SerialParity,
    SerialTransport, TransportError,
};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Library name
pub const NAME: &str = env!("CARGO_PKG_NAME");
