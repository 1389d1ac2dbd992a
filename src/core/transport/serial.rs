//! Serial transport: device configuration and the correlation worker

use super::{DeviceLink, TransportError};
use bytes::{Bytes, BytesMut};
use crossbeam_channel::{Receiver, RecvTimeoutError, Sender};
use serde::{Deserialize, Serialize};
use serialport::{DataBits, FlowControl, Parity, SerialPort, StopBits};
use std::io::{self, Read, Write};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};
use tokio::sync::oneshot;
use tracing::{debug, error, trace};

/// Serial port flow control type
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum SerialFlowControl {
    /// No flow control
    #[default]
    None,
    /// Hardware flow control (RTS/CTS)
    Hardware,
    /// Software flow control (XON/XOFF)
    Software,
}

impl std::str::FromStr for SerialFlowControl {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "hardware" | "hw" | "rtscts" => Ok(Self::Hardware),
            "software" | "sw" | "xonxoff" => Ok(Self::Software),
            _ => Ok(Self::None),
        }
    }
}

/// Serial port parity
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum SerialParity {
    /// No parity
    #[default]
    None,
    /// Odd parity
    Odd,
    /// Even parity
    Even,
}

impl std::str::FromStr for SerialParity {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "none" | "n" => Ok(Self::None),
            "odd" | "o" => Ok(Self::Odd),
            "even" | "e" => Ok(Self::Even),
            _ => Ok(Self::None),
        }
    }
}

/// Serial device configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SerialConfig {
    /// Port name (e.g., COM3, /dev/ttyUSB0)
    pub port: String,
    /// Baud rate
    pub baud_rate: u32,
    /// Data bits (5, 6, 7, 8)
    pub data_bits: u8,
    /// Stop bits (1, 2)
    pub stop_bits: u8,
    /// Parity
    pub parity: SerialParity,
    /// Flow control
    pub flow_control: SerialFlowControl,
    /// Write timeout in milliseconds
    pub write_timeout_ms: u64,
    /// How long to wait for the first response byte, in milliseconds
    pub response_timeout_ms: u64,
    /// Inter-character timeout: the response is complete once this much
    /// time passes with no further bytes, in milliseconds
    pub inter_char_timeout_ms: u64,
}

impl SerialConfig {
    /// Create a new serial configuration with default settings
    pub fn new(port: &str, baud_rate: u32) -> Self {
        Self {
            port: port.to_string(),
            baud_rate,
            data_bits: 8,
            stop_bits: 1,
            parity: SerialParity::None,
            flow_control: SerialFlowControl::None,
            write_timeout_ms: 1000,
            response_timeout_ms: 1000,
            inter_char_timeout_ms: 50,
        }
    }

    /// Set data bits
    #[must_use]
    pub fn data_bits(mut self, bits: u8) -> Self {
        self.data_bits = bits;
        self
    }

    /// Set stop bits
    #[must_use]
    pub fn stop_bits(mut self, bits: u8) -> Self {
        self.stop_bits = bits;
        self
    }

    /// Set parity
    #[must_use]
    pub fn parity(mut self, parity: SerialParity) -> Self {
        self.parity = parity;
        self
    }

    /// Set flow control
    #[must_use]
    pub fn flow_control(mut self, flow: SerialFlowControl) -> Self {
        self.flow_control = flow;
        self
    }

    /// Set response timeout
    #[must_use]
    pub fn response_timeout_ms(mut self, ms: u64) -> Self {
        self.response_timeout_ms = ms;
        self
    }

    /// Open the configured port and wrap it as a [`DeviceLink`]
    pub fn open(&self) -> Result<SerialPortLink, TransportError> {
        let data_bits = match self.data_bits {
            5 => DataBits::Five,
            6 => DataBits::Six,
            7 => DataBits::Seven,
            _ => DataBits::Eight,
        };

        let stop_bits = match self.stop_bits {
            2 => StopBits::Two,
            _ => StopBits::One,
        };

        let parity = match self.parity {
            SerialParity::Odd => Parity::Odd,
            SerialParity::Even => Parity::Even,
            SerialParity::None => Parity::None,
        };

        let flow_control = match self.flow_control {
            SerialFlowControl::Hardware => FlowControl::Hardware,
            SerialFlowControl::Software => FlowControl::Software,
            SerialFlowControl::None => FlowControl::None,
        };

        let port = serialport::new(&self.port, self.baud_rate)
            .data_bits(data_bits)
            .stop_bits(stop_bits)
            .parity(parity)
            .flow_control(flow_control)
            .timeout(Duration::from_millis(self.inter_char_timeout_ms.max(1)))
            .open()
            .map_err(|e| match e.kind() {
                serialport::ErrorKind::NoDevice => TransportError::PortNotFound(self.port.clone()),
                serialport::ErrorKind::Io(io::ErrorKind::PermissionDenied) => {
                    TransportError::PermissionDenied(self.port.clone())
                }
                _ => TransportError::ConnectionFailed(e.to_string()),
            })?;

        Ok(SerialPortLink {
            port,
            write_timeout: Duration::from_millis(self.write_timeout_ms.max(1)),
            read_slice: Duration::from_millis(self.inter_char_timeout_ms.max(1)),
        })
    }

    /// Human-readable settings summary (e.g. `/dev/ttyUSB0 @ 9600 8N1`)
    pub fn summary(&self) -> String {
        format!(
            "{} @ {} {}{}{}",
            self.port,
            self.baud_rate,
            self.data_bits,
            match self.parity {
                SerialParity::None => "N",
                SerialParity::Odd => "O",
                SerialParity::Even => "E",
            },
            self.stop_bits,
        )
    }
}

impl Default for SerialConfig {
    fn default() -> Self {
        Self::new("/dev/ttyUSB0", 9600)
    }
}

/// A real serial port wrapped as a [`DeviceLink`].
///
/// The port carries a single timeout for both directions, so the link
/// switches it before each operation: the configured write timeout for
/// writes, the inter-character slice for reads.
pub struct SerialPortLink {
    port: Box<dyn SerialPort>,
    write_timeout: Duration,
    read_slice: Duration,
}

impl DeviceLink for SerialPortLink {
    fn write_all(&mut self, buf: &[u8]) -> io::Result<()> {
        self.port
            .set_timeout(self.write_timeout)
            .map_err(|e| io::Error::other(e.to_string()))?;
        self.port.write_all(buf)?;
        self.port.flush()
    }

    fn read_chunk(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.port
            .set_timeout(self.read_slice)
            .map_err(|e| io::Error::other(e.to_string()))?;
        self.port.read(buf)
    }
}

/// Timing for the response drain discipline
#[derive(Debug, Clone, Copy)]
pub struct DrainTiming {
    /// How long to wait for the first response byte
    pub response_timeout: Duration,
    /// The response is complete once this much time passes with no data
    pub inter_char_timeout: Duration,
}

impl Default for DrainTiming {
    fn default() -> Self {
        Self {
            response_timeout: Duration::from_millis(1000),
            inter_char_timeout: Duration::from_millis(50),
        }
    }
}

impl From<&SerialConfig> for DrainTiming {
    fn from(config: &SerialConfig) -> Self {
        Self {
            response_timeout: Duration::from_millis(config.response_timeout_ms),
            inter_char_timeout: Duration::from_millis(config.inter_char_timeout_ms),
        }
    }
}

/// Read chunk size while draining a response
const DRAIN_CHUNK: usize = 1024;

/// How often the idle worker wakes to check the alive flag
const IDLE_WAKE: Duration = Duration::from_millis(100);

/// A write queued for the device, awaiting service by the worker.
///
/// Owned exclusively by the transport queue until dispatched; destroyed once
/// the reply has been delivered (or its receiver was found gone).
struct PendingWrite {
    token: u64,
    payload: Bytes,
    reply: oneshot::Sender<Bytes>,
}

/// The single worker-owned path to the physical device.
///
/// All device I/O is serialized through one thread: writes are serviced
/// strictly in submission order, and each write's response is fully drained
/// before the next write is touched. Completion is delivered per write over
/// a one-shot channel, keyed internally by a monotonic token.
pub struct SerialTransport {
    queue: Sender<PendingWrite>,
    alive: Arc<AtomicBool>,
    next_token: AtomicU64,
    worker: parking_lot::Mutex<Option<thread::JoinHandle<()>>>,
}

impl SerialTransport {
    /// Start the transport over the given device link.
    ///
    /// Spawns the worker thread; the device moves into it and is closed when
    /// the worker exits.
    pub fn start<D: DeviceLink + 'static>(device: D, timing: DrainTiming) -> Self {
        let (queue, rx) = crossbeam_channel::unbounded();
        let alive = Arc::new(AtomicBool::new(true));

        let worker_alive = alive.clone();
        let handle = thread::spawn(move || worker_loop(device, &rx, &worker_alive, timing));

        Self {
            queue,
            alive,
            next_token: AtomicU64::new(0),
            worker: parking_lot::Mutex::new(Some(handle)),
        }
    }

    /// Enqueue a payload for the device. Never blocks; returns immediately.
    ///
    /// The returned receiver resolves with the device's response once the
    /// worker has serviced this write. If the transport has been shut down
    /// the receiver resolves to a closed-channel error instead; callers must
    /// tolerate that (there is no ordering guarantee with shutdown).
    pub fn submit(&self, payload: Bytes) -> oneshot::Receiver<Bytes> {
        let (reply, reply_rx) = oneshot::channel();

        if !self.alive.load(Ordering::Relaxed) {
            debug!("submit on dead transport; dropping write");
            return reply_rx;
        }

        let token = self.next_token.fetch_add(1, Ordering::Relaxed);
        let pending = PendingWrite {
            token,
            payload,
            reply,
        };
        if self.queue.send(pending).is_err() {
            debug!(token, "serial queue closed; dropping write");
        }

        reply_rx
    }

    /// Whether the worker is still accepting writes
    pub fn is_alive(&self) -> bool {
        self.alive.load(Ordering::Relaxed)
    }

    /// Stop the worker after its in-flight write, then join it.
    ///
    /// New submissions fail silently from this point on. Idempotent.
    pub fn shutdown(&self) {
        self.alive.store(false, Ordering::Relaxed);
        if let Some(handle) = self.worker.lock().take() {
            let _ = handle.join();
        }
    }
}

impl Drop for SerialTransport {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn worker_loop<D: DeviceLink>(
    mut device: D,
    queue: &Receiver<PendingWrite>,
    alive: &AtomicBool,
    timing: DrainTiming,
) {
    while alive.load(Ordering::Relaxed) {
        let pending = match queue.recv_timeout(IDLE_WAKE) {
            Ok(p) => p,
            Err(RecvTimeoutError::Timeout) => continue,
            Err(RecvTimeoutError::Disconnected) => break,
        };

        trace!(
            token = pending.token,
            len = pending.payload.len(),
            data = %hex_preview(&pending.payload),
            "servicing write"
        );

        if let Err(e) = device.write_all(&pending.payload) {
            // Drop the reply so the submitter sees a closed channel.
            error!(token = pending.token, "device write failed: {}", e);
            continue;
        }

        let response = drain_response(&mut device, timing);
        trace!(
            token = pending.token,
            len = response.len(),
            data = %hex_preview(&response),
            "response drained"
        );

        if pending.reply.send(response).is_err() {
            // Submitter is gone (connection closed while queued). Harmless.
            debug!(token = pending.token, "no receiver for response");
        }
    }

    debug!("serial worker stopped");
}

/// Collect the device's response to the write just issued.
///
/// Waits up to `response_timeout` for the first byte, then keeps reading
/// chunks until `inter_char_timeout` passes with no data. Returns whatever
/// was collected, possibly nothing.
fn drain_response<D: DeviceLink>(device: &mut D, timing: DrainTiming) -> Bytes {
    let mut response = BytesMut::new();
    let mut chunk = [0u8; DRAIN_CHUNK];
    let deadline = Instant::now() + timing.response_timeout;
    let mut last_data = Instant::now();

    loop {
        match device.read_chunk(&mut chunk) {
            Ok(0) => break,
            Ok(n) => {
                response.extend_from_slice(&chunk[..n]);
                last_data = Instant::now();
            }
            Err(ref e)
                if e.kind() == io::ErrorKind::TimedOut
                    || e.kind() == io::ErrorKind::WouldBlock =>
            {
                if response.is_empty() {
                    if Instant::now() >= deadline {
                        break;
                    }
                } else if last_data.elapsed() >= timing.inter_char_timeout {
                    break;
                }
            }
            Err(e) => {
                error!("device read failed: {}", e);
                break;
            }
        }
    }

    response.freeze()
}

/// First bytes of a payload as hex, for trace logs
fn hex_preview(data: &[u8]) -> String {
    const PREVIEW: usize = 16;
    if data.len() <= PREVIEW {
        hex::encode(data)
    } else {
        format!("{}..", hex::encode(&data[..PREVIEW]))
    }
}

/// List available serial ports
pub fn list_ports() -> Result<Vec<serialport::SerialPortInfo>, TransportError> {
    serialport::available_ports().map_err(|e| TransportError::ConnectionFailed(e.to_string()))
}
