//! TCP front of the gateway
//!
//! Accepts client connections, filters them through the access list, and
//! runs one [`ConnectionHandler`] task per client. All socket I/O is
//! cooperative on the runtime's thread; the serial worker is the only other
//! thread in the process.

mod handler;

pub use handler::ConnectionHandler;

use crate::core::acl::AccessList;
use crate::core::transport::SerialTransport;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::sync::Arc;
use thiserror::Error;
use tokio::net::{TcpListener, TcpSocket};
use tracing::{debug, info};

/// Gateway server errors
#[derive(Error, Debug)]
pub enum GatewayError {
    /// Invalid bind address
    #[error("Invalid bind address: {0}")]
    InvalidAddress(String),

    /// Failed to bind the listening socket
    #[error("Failed to bind {addr}: {source}")]
    Bind {
        /// Address that could not be bound
        addr: SocketAddr,
        /// Underlying socket error
        source: std::io::Error,
    },

    /// I/O error on an accepted connection or the listener
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Listening socket configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Bind host
    pub host: String,
    /// Bind port
    pub port: u16,
    /// Listen backlog
    pub backlog: u32,
    /// Set `SO_REUSEADDR` before binding
    pub reuse_addr: bool,
}

impl ServerConfig {
    /// Create a configuration for the given host and port
    pub fn new(host: &str, port: u16) -> Self {
        Self {
            host: host.to_string(),
            port,
            backlog: 5,
            reuse_addr: true,
        }
    }

    /// Set the listen backlog
    #[must_use]
    pub fn backlog(mut self, backlog: u32) -> Self {
        self.backlog = backlog;
        self
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self::new("0.0.0.0", 9100)
    }
}

/// Gateway counters
#[derive(Debug, Clone, Default)]
pub struct GatewayStats {
    /// Connections admitted past the access list
    pub connections_accepted: u64,
    /// Connections dropped by the access list
    pub connections_rejected: u64,
    /// Requests forwarded to the serial transport
    pub requests_forwarded: u64,
    /// Bytes received from clients and forwarded to the device
    pub bytes_tcp_to_serial: u64,
    /// Response bytes delivered back to clients
    pub bytes_serial_to_tcp: u64,
}

/// The listener: accepts clients and multiplexes them onto one serial
/// transport.
///
/// The transport is constructed by the caller and injected here; every
/// handler shares the same instance.
pub struct Gateway {
    config: ServerConfig,
    transport: Arc<SerialTransport>,
    acl: AccessList,
    stats: Arc<Mutex<GatewayStats>>,
}

impl Gateway {
    /// Create a gateway serving `transport` behind `config`'s socket
    pub fn new(config: ServerConfig, transport: Arc<SerialTransport>, acl: AccessList) -> Self {
        Self {
            config,
            transport,
            acl,
            stats: Arc::new(Mutex::new(GatewayStats::default())),
        }
    }

    /// Snapshot of the gateway counters
    pub fn stats(&self) -> GatewayStats {
        self.stats.lock().clone()
    }

    /// Bind the listening socket with the configured backlog and
    /// address-reuse flag
    pub fn bind(&self) -> Result<TcpListener, GatewayError> {
        let addr: SocketAddr = format!("{}:{}", self.config.host, self.config.port)
            .parse()
            .map_err(|_| {
                GatewayError::InvalidAddress(format!(
                    "{}:{}",
                    self.config.host, self.config.port
                ))
            })?;

        let socket = if addr.is_ipv4() {
            TcpSocket::new_v4()
        } else {
            TcpSocket::new_v6()
        }?;

        if self.config.reuse_addr {
            socket.set_reuseaddr(true)?;
        }

        socket
            .bind(addr)
            .map_err(|source| GatewayError::Bind { addr, source })?;
        let listener = socket
            .listen(self.config.backlog)
            .map_err(|source| GatewayError::Bind { addr, source })?;

        info!(
            "Listening on {} (backlog {})",
            listener.local_addr()?,
            self.config.backlog
        );

        Ok(listener)
    }

    /// Accept clients on `listener` until the task is cancelled.
    ///
    /// Rejected clients are dropped immediately; nothing is written to them.
    pub async fn serve(&self, listener: TcpListener) -> Result<(), GatewayError> {
        loop {
            let (stream, peer) = listener.accept().await?;

            if !self.acl.allowed(peer.ip()) {
                self.stats.lock().connections_rejected += 1;
                info!(%peer, "rejected by access list");
                continue;
            }
            self.stats.lock().connections_accepted += 1;
            info!(%peer, "client connected");

            stream.set_nodelay(true).ok();

            let handler = ConnectionHandler::new(
                stream,
                peer,
                self.transport.clone(),
                self.stats.clone(),
            );
            tokio::spawn(async move {
                if let Err(e) = handler.run().await {
                    debug!(%peer, "connection error: {}", e);
                }
                info!(%peer, "client disconnected");
            });
        }
    }

    /// Bind and serve; runs until the process is stopped
    pub async fn run(&self) -> Result<(), GatewayError> {
        let listener = self.bind()?;
        self.serve(listener).await
    }
}
