//! Transport selection, retry backoff, and the top-level receive loops.
//!
//! The controller owns which transport gets to feed the decoder. Four
//! modes:
//!
//! - `network`: TCP listener only.
//! - `usb`: serial device only (configured path or discovery scan).
//! - `hybrid`: USB probed first every cycle; when no device turns up,
//!   a short-timeout TCP accept runs before USB is probed again.
//! - `all`: independent USB and network workers in parallel; whichever
//!   streams drives the display signal.
//!
//! Open and decoder-selection failures back off multiplicatively
//! (floor 1s, x1.5, capped at 15s); any session that actually streamed
//! resets the backoff. A serial idle timeout reconnects immediately.

use std::path::PathBuf;
use std::str::FromStr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use tracing::{debug, info, warn};

use crate::decoder::{select_and_start, DisplayProbe, PipelineDescriptor, SupervisorConfig};
use crate::error::StreamError;
use crate::framing::{Deframer, FrameCodec, MAX_FRAME_BYTES};
use crate::metrics::MetricsWindow;
use crate::session::{DisplayGate, SessionEnd, StreamSession};
use crate::transport::serial::{discover_devices, SerialTransport};
use crate::transport::tcp::TcpAcceptor;
use crate::transport::Transport;

// ── RetryState ───────────────────────────────────────────────────

/// Multiplicative backoff for transport opens and decoder selection.
#[derive(Debug, Clone)]
pub struct RetryState {
    delay: Duration,
    floor: Duration,
    max_delay: Duration,
    multiplier: f64,
}

impl Default for RetryState {
    fn default() -> Self {
        Self::new(Duration::from_secs(1), Duration::from_secs(15), 1.5)
    }
}

impl RetryState {
    pub fn new(floor: Duration, max_delay: Duration, multiplier: f64) -> Self {
        Self {
            delay: floor,
            floor,
            max_delay,
            multiplier,
        }
    }

    /// Delay to sleep for this failure; the next one will be longer.
    pub fn next_delay(&mut self) -> Duration {
        let current = self.delay;
        self.delay = self.delay.mul_f64(self.multiplier).min(self.max_delay);
        current
    }

    /// A session streamed: start the next cycle from the floor.
    pub fn reset(&mut self) {
        self.delay = self.floor;
    }

    pub fn current(&self) -> Duration {
        self.delay
    }
}

// ── FailoverMode ─────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailoverMode {
    Network,
    Usb,
    Hybrid,
    All,
}

impl std::fmt::Display for FailoverMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Network => "network",
            Self::Usb => "usb",
            Self::Hybrid => "hybrid",
            Self::All => "all",
        };
        write!(f, "{s}")
    }
}

impl FromStr for FailoverMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "network" | "tcp" => Ok(Self::Network),
            "usb" | "serial" => Ok(Self::Usb),
            "hybrid" => Ok(Self::Hybrid),
            "all" => Ok(Self::All),
            other => Err(format!(
                "unknown mode '{other}' (expected network, usb, hybrid, or all)"
            )),
        }
    }
}

// ── FailoverOptions ──────────────────────────────────────────────

/// Everything the controller needs, resolved from config and CLI by
/// the binary. No process-global state.
#[derive(Debug, Clone)]
pub struct FailoverOptions {
    pub mode: FailoverMode,
    /// TCP listen address.
    pub host: String,
    pub port: u16,
    /// Accept timeout when network is the only transport being waited
    /// on.
    pub accept_timeout: Duration,
    /// Shorter accept timeout used in hybrid mode so USB is re-probed
    /// promptly.
    pub hybrid_accept_timeout: Duration,
    /// Bounded per-read timeout on accepted TCP streams.
    pub read_timeout: Duration,
    /// Explicit serial device; `None` enables discovery.
    pub serial_device: Option<PathBuf>,
    pub baud: u32,
    pub idle_timeout: Duration,
    /// Directory scanned for serial candidates. `/dev` in production.
    pub dev_root: PathBuf,
    /// Per-session resync budget for the deframer.
    pub max_resyncs: u64,
    pub supervisor: SupervisorConfig,
}

impl Default for FailoverOptions {
    fn default() -> Self {
        Self {
            mode: FailoverMode::Hybrid,
            host: "0.0.0.0".to_string(),
            port: 5600,
            accept_timeout: Duration::from_secs(5),
            hybrid_accept_timeout: Duration::from_secs(2),
            read_timeout: Duration::from_millis(500),
            serial_device: None,
            baud: 6_000_000,
            idle_timeout: crate::transport::serial::DEFAULT_IDLE_TIMEOUT,
            dev_root: PathBuf::from("/dev"),
            max_resyncs: crate::framing::DEFAULT_MAX_RESYNCS,
            supervisor: SupervisorConfig::default(),
        }
    }
}

// ── FailoverController ───────────────────────────────────────────

/// Drives transports, decoder selection, and sessions until the
/// running flag is cleared.
pub struct FailoverController {
    options: FailoverOptions,
    catalog: Vec<PipelineDescriptor>,
    probe: DisplayProbe,
    running: Arc<AtomicBool>,
}

/// Outcome of one connection attempt on a transport worker.
enum Attempt {
    /// A session ran to completion.
    Streamed(SessionEnd),
    /// Nothing connected within the bounded wait.
    NoPeer,
}

impl FailoverController {
    pub fn new(
        options: FailoverOptions,
        catalog: Vec<PipelineDescriptor>,
        probe: DisplayProbe,
        running: Arc<AtomicBool>,
    ) -> Self {
        Self {
            options,
            catalog,
            probe,
            running,
        }
    }

    fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Sleep for `delay`, waking early when the running flag clears.
    async fn pause(&self, delay: Duration) {
        let deadline = Instant::now() + delay;
        while self.is_running() {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return;
            }
            tokio::time::sleep(remaining.min(Duration::from_millis(100))).await;
        }
    }

    /// Run until shutdown. Per-session errors never escape; only the
    /// cleared running flag ends this.
    pub async fn run(&self, gate: &dyn DisplayGate) {
        info!(mode = %self.options.mode, "receiver starting");
        match self.options.mode {
            FailoverMode::Network => self.network_loop(gate).await,
            FailoverMode::Usb => self.usb_loop(gate).await,
            FailoverMode::Hybrid => self.hybrid_loop(gate).await,
            FailoverMode::All => {
                futures::join!(self.network_loop(gate), self.usb_loop(gate));
            }
        }
        info!("receiver stopped");
    }

    // ── Per-mode loops ───────────────────────────────────────────

    async fn network_loop(&self, gate: &dyn DisplayGate) {
        let mut retry = RetryState::default();
        while self.is_running() {
            match self
                .network_attempt(gate, self.options.accept_timeout)
                .await
            {
                Ok(Attempt::Streamed(end)) => {
                    debug!(?end, "network session ended");
                    retry.reset();
                }
                Ok(Attempt::NoPeer) => {
                    // Keep listening; an empty accept window is not a
                    // failure.
                }
                Err(e) => {
                    let delay = retry.next_delay();
                    warn!("network attempt failed: {e}, retrying in {delay:?}");
                    self.pause(delay).await;
                }
            }
        }
    }

    async fn usb_loop(&self, gate: &dyn DisplayGate) {
        let mut retry = RetryState::default();
        while self.is_running() {
            match self.usb_attempt(gate).await {
                Ok(end) => {
                    debug!(?end, "usb session ended");
                    retry.reset();
                    if end == SessionEnd::IdleTimeout {
                        // Reconnect right away: the device is present,
                        // the host just went quiet.
                        continue;
                    }
                }
                Err(e) => {
                    let delay = retry.next_delay();
                    warn!("usb attempt failed: {e}, retrying in {delay:?}");
                    self.pause(delay).await;
                }
            }
        }
    }

    /// USB-first with network fallback. Device discovery failures back
    /// off on their own, slower-growing schedule so a box with no USB
    /// link doesn't spin on `/dev` scans.
    async fn hybrid_loop(&self, gate: &dyn DisplayGate) {
        let mut retry = RetryState::default();
        let mut scan_retry = RetryState::new(Duration::from_secs(2), Duration::from_secs(30), 2.0);

        while self.is_running() {
            match self.usb_attempt(gate).await {
                Ok(end) => {
                    debug!(?end, "usb session ended");
                    retry.reset();
                    scan_retry.reset();
                    continue;
                }
                Err(StreamError::NoSerialDevice) => {
                    debug!("no serial device, falling back to network");
                }
                Err(e) => {
                    let delay = retry.next_delay();
                    warn!("usb attempt failed: {e}, retrying in {delay:?}");
                    self.pause(delay).await;
                    continue;
                }
            }

            match self
                .network_attempt(gate, self.options.hybrid_accept_timeout)
                .await
            {
                Ok(Attempt::Streamed(end)) => {
                    debug!(?end, "network session ended");
                    retry.reset();
                    scan_retry.reset();
                }
                Ok(Attempt::NoPeer) => {
                    let delay = scan_retry.next_delay();
                    debug!("no peer on either transport, next scan in {delay:?}");
                    self.pause(delay).await;
                }
                Err(e) => {
                    let delay = retry.next_delay();
                    warn!("network attempt failed: {e}, retrying in {delay:?}");
                    self.pause(delay).await;
                }
            }
        }
    }

    // ── Attempts ─────────────────────────────────────────────────

    async fn network_attempt(
        &self,
        gate: &dyn DisplayGate,
        accept_timeout: Duration,
    ) -> Result<Attempt, StreamError> {
        let acceptor = TcpAcceptor::bind(
            &self.options.host,
            self.options.port,
            self.options.read_timeout,
        )?;

        let Some(mut transport) = acceptor.accept(accept_timeout).await? else {
            return Ok(Attempt::NoPeer);
        };

        let end = self.run_session(&mut transport, gate).await?;
        Ok(Attempt::Streamed(end))
    }

    async fn usb_attempt(&self, gate: &dyn DisplayGate) -> Result<SessionEnd, StreamError> {
        let candidates = self.usb_candidates();
        if candidates.is_empty() {
            return Err(StreamError::NoSerialDevice);
        }

        let mut transport = None;
        for path in &candidates {
            match SerialTransport::open(
                &path.to_string_lossy(),
                self.options.baud,
                self.options.idle_timeout,
            ) {
                Ok(t) => {
                    transport = Some(t);
                    break;
                }
                Err(e) => debug!("serial candidate {} rejected: {e}", path.display()),
            }
        }

        // Candidate exhaustion counts as a single failed open.
        let Some(mut transport) = transport else {
            return Err(StreamError::NoSerialDevice);
        };

        self.run_session(&mut transport, gate).await
    }

    /// Serial device paths to try this cycle, most preferred first.
    pub fn usb_candidates(&self) -> Vec<PathBuf> {
        match &self.options.serial_device {
            Some(path) => vec![path.clone()],
            None => discover_devices(&self.options.dev_root),
        }
    }

    /// One full session on an open transport: select a decoder, pump
    /// frames, tear the decoder down.
    async fn run_session(
        &self,
        transport: &mut dyn Transport,
        gate: &dyn DisplayGate,
    ) -> Result<SessionEnd, StreamError> {
        let mut session = StreamSession::new(
            Deframer::new(FrameCodec::new(MAX_FRAME_BYTES, self.options.max_resyncs)),
            MetricsWindow::default(),
        );
        session.decoder_starting()?;

        let mut decoder =
            select_and_start(&self.catalog, &self.probe, &self.options.supervisor).await?;

        let end = session
            .pump(transport, &mut decoder, gate, &self.running)
            .await;
        decoder.terminate(self.options.supervisor.grace).await;
        end
    }
}

// ── Tests ────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn retry_grows_by_half_each_failure() {
        let mut retry = RetryState::default();
        assert_eq!(retry.next_delay(), Duration::from_secs(1));
        assert_eq!(retry.next_delay(), Duration::from_millis(1500));
        assert_eq!(retry.next_delay(), Duration::from_millis(2250));
    }

    #[test]
    fn retry_caps_at_max() {
        let mut retry = RetryState::default();
        for _ in 0..50 {
            retry.next_delay();
        }
        assert_eq!(retry.current(), Duration::from_secs(15));
    }

    #[test]
    fn retry_resets_on_success() {
        let mut retry = RetryState::default();
        retry.next_delay();
        retry.next_delay();
        retry.reset();
        assert_eq!(retry.next_delay(), Duration::from_secs(1));
    }

    #[test]
    fn mode_parses_with_aliases() {
        assert_eq!("network".parse(), Ok(FailoverMode::Network));
        assert_eq!("tcp".parse(), Ok(FailoverMode::Network));
        assert_eq!("USB".parse(), Ok(FailoverMode::Usb));
        assert_eq!("hybrid".parse(), Ok(FailoverMode::Hybrid));
        assert_eq!("all".parse(), Ok(FailoverMode::All));
        assert!("udp".parse::<FailoverMode>().is_err());
    }

    #[test]
    fn explicit_device_overrides_discovery() {
        let options = FailoverOptions {
            serial_device: Some(PathBuf::from("/dev/ttyUSB7")),
            ..Default::default()
        };
        let controller = FailoverController::new(
            options,
            Vec::new(),
            DisplayProbe::default(),
            Arc::new(AtomicBool::new(true)),
        );
        assert_eq!(
            controller.usb_candidates(),
            vec![PathBuf::from("/dev/ttyUSB7")]
        );
    }

    #[test]
    fn discovery_candidates_from_dev_root() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("ttyGS0"), b"").unwrap();
        std::fs::write(dir.path().join("ttyACM1"), b"").unwrap();

        let options = FailoverOptions {
            dev_root: dir.path().to_path_buf(),
            ..Default::default()
        };
        let controller = FailoverController::new(
            options,
            Vec::new(),
            DisplayProbe::default(),
            Arc::new(AtomicBool::new(true)),
        );
        let candidates = controller.usb_candidates();
        assert_eq!(candidates[0], dir.path().join("ttyGS0"));
        assert_eq!(candidates.len(), 2);
    }

    #[tokio::test]
    async fn pause_wakes_on_shutdown() {
        let running = Arc::new(AtomicBool::new(true));
        let controller = FailoverController::new(
            FailoverOptions::default(),
            Vec::new(),
            DisplayProbe::default(),
            Arc::clone(&running),
        );

        let started = Instant::now();
        let stopper = {
            let running = Arc::clone(&running);
            tokio::spawn(async move {
                tokio::time::sleep(Duration::from_millis(50)).await;
                running.store(false, Ordering::SeqCst);
            })
        };
        controller.pause(Duration::from_secs(30)).await;
        assert!(started.elapsed() < Duration::from_secs(5));
        stopper.await.unwrap();
    }
}
