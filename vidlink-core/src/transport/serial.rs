//! USB serial transport (Pi gadget link).
//!
//! The character device is opened at a fixed baud rate with a short
//! read timeout; blocking reads run under `spawn_blocking` so the
//! session loop stays async. Silence on an open link is tracked here:
//! once no bytes have arrived for the idle window (default 5s) the
//! transport reports [`StreamError::IdleTimeout`], a soft failure that
//! lets the failover controller reconnect quickly instead of entering
//! a full backoff cycle.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use bytes::Bytes;
use serialport::{DataBits, FlowControl, Parity, SerialPort, StopBits};
use tokio::sync::Mutex;
use tracing::{debug, info};

use crate::error::StreamError;
use crate::transport::{ReadEvent, Transport, TransportKind};

/// Default idle window before a silent link is declared stale.
pub const DEFAULT_IDLE_TIMEOUT: Duration = Duration::from_secs(5);

/// Per-read buffer size. Serial links are slow relative to TCP; 4 KiB
/// chunks keep read latency low.
const READ_CHUNK_BYTES: usize = 4096;

/// Blocking read timeout on the underlying port.
const PORT_TIMEOUT: Duration = Duration::from_millis(200);

// ── Device discovery ─────────────────────────────────────────────

/// Candidate device-name prefixes under `/dev`, gadget mode first.
const DEVICE_PREFIXES: [&str; 3] = ["ttyGS", "ttyUSB", "ttyACM"];

/// Scan for candidate serial devices.
///
/// Pure environment query: returns zero or more device paths, with the
/// USB gadget port (`/dev/ttyGS0`) preferred when present. The result
/// feeds [`SerialTransport::open`]; nothing here touches the protocol.
pub fn discover_devices(dev_root: &Path) -> Vec<PathBuf> {
    let mut found: Vec<PathBuf> = Vec::new();

    if let Ok(entries) = std::fs::read_dir(dev_root) {
        for entry in entries.flatten() {
            let name = entry.file_name();
            let name = name.to_string_lossy();
            if DEVICE_PREFIXES.iter().any(|p| name.starts_with(p)) {
                found.push(entry.path());
            }
        }
    }

    // Stable by-id symlinks, when the platform provides them.
    if let Ok(entries) = std::fs::read_dir(dev_root.join("serial/by-id")) {
        for entry in entries.flatten() {
            found.push(entry.path());
        }
    }

    found.sort();
    found.dedup();

    // Gadget port first: it is the dedicated host link.
    let gadget = dev_root.join("ttyGS0");
    if let Some(pos) = found.iter().position(|p| *p == gadget) {
        found.swap(0, pos);
    }

    found
}

// ── SerialTransport ──────────────────────────────────────────────

/// One open serial device.
pub struct SerialTransport {
    port: Arc<Mutex<Box<dyn SerialPort>>>,
    path: String,
    idle_timeout: Duration,
    last_data: Instant,
}

impl SerialTransport {
    /// Open `path` at `baud`, 8N1, no flow control.
    pub fn open(path: &str, baud: u32, idle_timeout: Duration) -> Result<Self, StreamError> {
        let port = serialport::new(path, baud)
            .data_bits(DataBits::Eight)
            .parity(Parity::None)
            .stop_bits(StopBits::One)
            .flow_control(FlowControl::None)
            .timeout(PORT_TIMEOUT)
            .open()
            .map_err(|e| StreamError::TransportOpen {
                kind: "serial",
                reason: format!("{path}: {e}"),
            })?;

        info!("opened serial device {path} at {baud} baud");

        Ok(Self {
            port: Arc::new(Mutex::new(port)),
            path: path.to_string(),
            idle_timeout,
            last_data: Instant::now(),
        })
    }
}

#[async_trait]
impl Transport for SerialTransport {
    async fn read(&mut self) -> Result<ReadEvent, StreamError> {
        let port = Arc::clone(&self.port);

        let chunk: Result<Option<Bytes>, std::io::Error> =
            tokio::task::spawn_blocking(move || {
                let mut port = port.blocking_lock();
                let mut buf = [0u8; READ_CHUNK_BYTES];
                match port.read(&mut buf) {
                    Ok(0) => Ok(None),
                    Ok(n) => Ok(Some(Bytes::copy_from_slice(&buf[..n]))),
                    Err(e) if e.kind() == std::io::ErrorKind::TimedOut => Ok(None),
                    Err(e) => Err(e),
                }
            })
            .await
            .map_err(|e| std::io::Error::other(e))?;

        match chunk? {
            Some(data) => {
                self.last_data = Instant::now();
                Ok(ReadEvent::Data(data))
            }
            None => {
                let silent = self.last_data.elapsed();
                if silent > self.idle_timeout {
                    debug!("serial link {} idle for {silent:?}", self.path);
                    Err(StreamError::IdleTimeout(silent))
                } else {
                    Ok(ReadEvent::Idle)
                }
            }
        }
    }

    async fn write(&mut self, data: &[u8]) -> Result<(), StreamError> {
        let port = Arc::clone(&self.port);
        let data = data.to_vec();
        tokio::task::spawn_blocking(move || {
            let mut port = port.blocking_lock();
            port.write_all(&data)?;
            port.flush()
        })
        .await
        .map_err(|e| StreamError::Io(std::io::Error::other(e)))?
        .map_err(StreamError::Io)
    }

    fn kind(&self) -> TransportKind {
        TransportKind::Serial
    }

    fn describe(&self) -> String {
        format!("serial:{}", self.path)
    }
}

// ── Tests ────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn discovery_prefers_gadget_port() {
        let dir = tempfile::tempdir().unwrap();
        for name in ["ttyACM0", "ttyUSB0", "ttyGS0", "sda1", "null"] {
            std::fs::write(dir.path().join(name), b"").unwrap();
        }

        let devices = discover_devices(dir.path());
        assert_eq!(devices.len(), 3);
        assert_eq!(devices[0], dir.path().join("ttyGS0"));
        assert!(devices.contains(&dir.path().join("ttyACM0")));
        assert!(devices.contains(&dir.path().join("ttyUSB0")));
    }

    #[test]
    fn discovery_empty_when_nothing_matches() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("loop0"), b"").unwrap();
        assert!(discover_devices(dir.path()).is_empty());
    }

    #[test]
    fn open_missing_device_is_transport_open() {
        let result = SerialTransport::open(
            "/dev/vidlink-does-not-exist",
            115_200,
            DEFAULT_IDLE_TIMEOUT,
        );
        assert!(matches!(
            result,
            Err(StreamError::TransportOpen { kind: "serial", .. })
        ));
    }
}
