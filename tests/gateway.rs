//! End-to-end gateway tests against an in-memory serial device

use bytes::Bytes;
use portgate_core::{
    AccessList, DeviceLink, DrainTiming, Gateway, GatewayStats, SerialTransport, ServerConfig,
};
use std::io;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;

/// In-memory device: answers each write with a transform of it.
struct MockDevice {
    pending: Vec<u8>,
    transform: fn(&[u8]) -> Vec<u8>,
    response_delay: Duration,
    delay_pending: bool,
}

impl MockDevice {
    fn new(transform: fn(&[u8]) -> Vec<u8>) -> Self {
        Self {
            pending: Vec::new(),
            transform,
            response_delay: Duration::ZERO,
            delay_pending: false,
        }
    }

    fn with_delay(transform: fn(&[u8]) -> Vec<u8>, delay: Duration) -> Self {
        Self {
            response_delay: delay,
            ..Self::new(transform)
        }
    }
}

impl DeviceLink for MockDevice {
    fn write_all(&mut self, buf: &[u8]) -> io::Result<()> {
        self.pending.extend_from_slice(&(self.transform)(buf));
        self.delay_pending = !self.response_delay.is_zero();
        Ok(())
    }

    fn read_chunk(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if self.delay_pending {
            std::thread::sleep(self.response_delay);
            self.delay_pending = false;
        }
        if self.pending.is_empty() {
            std::thread::sleep(Duration::from_millis(1));
            return Err(io::Error::from(io::ErrorKind::TimedOut));
        }
        let n = buf.len().min(self.pending.len());
        buf[..n].copy_from_slice(&self.pending[..n]);
        self.pending.drain(..n);
        Ok(n)
    }
}

fn fast_timing() -> DrainTiming {
    DrainTiming {
        response_timeout: Duration::from_millis(200),
        inter_char_timeout: Duration::from_millis(5),
    }
}

/// Start a gateway on an ephemeral port; returns its address and a handle
/// for stats.
async fn start_gateway(device: MockDevice, acl: AccessList) -> (SocketAddr, Arc<Gateway>) {
    let transport = Arc::new(SerialTransport::start(device, fast_timing()));
    let gateway = Arc::new(Gateway::new(
        ServerConfig::new("127.0.0.1", 0),
        transport,
        acl,
    ));

    let listener = gateway.bind().expect("bind");
    let addr = listener.local_addr().expect("local addr");

    let serving = gateway.clone();
    tokio::spawn(async move {
        let _ = serving.serve(listener).await;
    });

    (addr, gateway)
}

async fn read_response(stream: &mut TcpStream, expected_len: usize) -> Vec<u8> {
    let mut buf = vec![0u8; expected_len];
    tokio::time::timeout(Duration::from_secs(2), stream.read_exact(&mut buf))
        .await
        .expect("timed out waiting for response")
        .expect("read failed");
    buf
}

#[tokio::test]
async fn ping_pong_twice_on_one_connection() {
    let (addr, _gateway) = start_gateway(
        MockDevice::new(|_| b"PONG".to_vec()),
        AccessList::disabled(),
    )
    .await;

    let mut client = TcpStream::connect(addr).await.unwrap();

    client.write_all(b"PING").await.unwrap();
    assert_eq!(read_response(&mut client, 4).await, b"PONG");

    // Connection stays usable for a second cycle.
    client.write_all(b"PING").await.unwrap();
    assert_eq!(read_response(&mut client, 4).await, b"PONG");
}

#[tokio::test]
async fn two_clients_get_their_own_responses() {
    // Device echoes input reversed, so responses are distinguishable.
    let (addr, _gateway) = start_gateway(
        MockDevice::new(|data| data.iter().rev().copied().collect()),
        AccessList::disabled(),
    )
    .await;

    let mut a = TcpStream::connect(addr).await.unwrap();
    let mut b = TcpStream::connect(addr).await.unwrap();

    a.write_all(b"abc").await.unwrap();
    b.write_all(b"xyz").await.unwrap();

    assert_eq!(read_response(&mut a, 3).await, b"cba");
    assert_eq!(read_response(&mut b, 3).await, b"zyx");
}

#[tokio::test]
async fn interleaved_requests_stay_correlated() {
    // Slow device so B's request queues behind A's in-flight one.
    let (addr, _gateway) = start_gateway(
        MockDevice::with_delay(
            |data| {
                let mut out = b"R:".to_vec();
                out.extend_from_slice(data);
                out
            },
            Duration::from_millis(50),
        ),
        AccessList::disabled(),
    )
    .await;

    let mut a = TcpStream::connect(addr).await.unwrap();
    let mut b = TcpStream::connect(addr).await.unwrap();

    a.write_all(b"1").await.unwrap();
    // B submits before A's response arrives.
    tokio::time::sleep(Duration::from_millis(10)).await;
    b.write_all(b"2").await.unwrap();

    assert_eq!(read_response(&mut a, 3).await, b"R:1");
    assert_eq!(read_response(&mut b, 3).await, b"R:2");
}

#[tokio::test]
async fn rejected_client_is_closed_without_a_handler() {
    // Allow only an address no test client will have.
    let acl = AccessList::new(["203.0.113.1".parse::<std::net::IpAddr>().unwrap()]);
    let (addr, gateway) = start_gateway(MockDevice::new(|_| b"NO".to_vec()), acl).await;

    let mut client = TcpStream::connect(addr).await.unwrap();
    // The socket may already be closed server-side; a failed write is fine.
    let _ = client.write_all(b"PING").await;

    // The gateway closes without sending anything.
    let mut buf = [0u8; 16];
    let n = tokio::time::timeout(Duration::from_secs(2), client.read(&mut buf))
        .await
        .expect("timed out waiting for close")
        .unwrap_or(0);
    assert_eq!(n, 0);

    let stats: GatewayStats = gateway.stats();
    assert_eq!(stats.connections_rejected, 1);
    assert_eq!(stats.connections_accepted, 0);
    assert_eq!(stats.requests_forwarded, 0);
}

#[tokio::test]
async fn client_gone_mid_flight_does_not_break_others() {
    let (addr, _gateway) = start_gateway(
        MockDevice::with_delay(|data| data.to_vec(), Duration::from_millis(50)),
        AccessList::disabled(),
    )
    .await;

    // First client submits and disconnects before its response is ready.
    {
        let mut doomed = TcpStream::connect(addr).await.unwrap();
        doomed.write_all(b"abandoned").await.unwrap();
        tokio::time::sleep(Duration::from_millis(10)).await;
    }

    // Worker must survive and serve the next client.
    let mut client = TcpStream::connect(addr).await.unwrap();
    client.write_all(b"hello").await.unwrap();
    assert_eq!(read_response(&mut client, 5).await, b"hello");
}

#[tokio::test]
async fn stats_count_traffic() {
    let (addr, gateway) = start_gateway(
        MockDevice::new(|data| data.to_vec()),
        AccessList::disabled(),
    )
    .await;

    let mut client = TcpStream::connect(addr).await.unwrap();
    client.write_all(b"12345").await.unwrap();
    assert_eq!(read_response(&mut client, 5).await, b"12345");

    let stats = gateway.stats();
    assert_eq!(stats.connections_accepted, 1);
    assert_eq!(stats.requests_forwarded, 1);
    assert_eq!(stats.bytes_tcp_to_serial, 5);
    assert_eq!(stats.bytes_serial_to_tcp, 5);
}

#[tokio::test]
async fn submissions_are_serviced_fifo() {
    // Bypass the TCP layer and drive the transport directly: queue three
    // writes while the device is slow, then check completion order.
    let transport = Arc::new(SerialTransport::start(
        MockDevice::with_delay(|data| data.to_vec(), Duration::from_millis(20)),
        fast_timing(),
    ));

    let first = transport.submit(Bytes::from_static(b"first"));
    let second = transport.submit(Bytes::from_static(b"second"));
    let third = transport.submit(Bytes::from_static(b"third"));

    // Completing in FIFO order means by the time a later receiver resolves,
    // the earlier ones already have.
    let (r1, r2, r3) = tokio::join!(first, second, third);
    assert_eq!(r1.unwrap(), Bytes::from_static(b"first"));
    assert_eq!(r2.unwrap(), Bytes::from_static(b"second"));
    assert_eq!(r3.unwrap(), Bytes::from_static(b"third"));
}
