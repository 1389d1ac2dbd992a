//! Per-connection request/response cycle

use super::{GatewayError, GatewayStats};
use crate::core::transport::SerialTransport;
use bytes::BytesMut;
use parking_lot::Mutex;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tracing::{debug, trace};

/// Inbound buffer starting capacity
const READ_CAPACITY: usize = 4096;

/// One TCP client of the gateway.
///
/// Owns its socket and buffers exclusively. Each read burst becomes one
/// request: whatever bytes arrive in a single read are submitted as a unit,
/// and the correlated response is written back before the next burst is
/// read. A multi-packet request that spans two read bursts is therefore
/// forwarded as two requests; clients must frame their traffic so that one
/// burst is one logical command.
pub struct ConnectionHandler {
    stream: TcpStream,
    peer: SocketAddr,
    transport: Arc<SerialTransport>,
    stats: Arc<Mutex<GatewayStats>>,
}

impl ConnectionHandler {
    pub(crate) fn new(
        stream: TcpStream,
        peer: SocketAddr,
        transport: Arc<SerialTransport>,
        stats: Arc<Mutex<GatewayStats>>,
    ) -> Self {
        Self {
            stream,
            peer,
            transport,
            stats,
        }
    }

    /// Drive the connection until the peer closes or an error occurs.
    ///
    /// The socket is released when the handler returns; a response still in
    /// flight at that point is discarded by the dead reply channel.
    pub async fn run(mut self) -> Result<(), GatewayError> {
        let mut inbound = BytesMut::with_capacity(READ_CAPACITY);

        loop {
            let n = self.stream.read_buf(&mut inbound).await?;
            if n == 0 {
                debug!(peer = %self.peer, "peer closed connection");
                return Ok(());
            }

            let request = inbound.split().freeze();
            trace!(peer = %self.peer, len = request.len(), "forwarding request");
            {
                let mut stats = self.stats.lock();
                stats.requests_forwarded += 1;
                stats.bytes_tcp_to_serial += request.len() as u64;
            }

            let reply = self.transport.submit(request);
            match reply.await {
                Ok(response) => {
                    trace!(peer = %self.peer, len = response.len(), "delivering response");
                    if !response.is_empty() {
                        self.stream.write_all(&response).await?;
                        self.stats.lock().bytes_serial_to_tcp += response.len() as u64;
                    }
                }
                Err(_) => {
                    // Transport shut down while our write was queued.
                    debug!(peer = %self.peer, "serial transport unavailable; closing");
                    return Ok(());
                }
            }
        }
    }
}
