//! Per-connection stream lifecycle.
//!
//! Each accepted transport gets one `StreamSession` that walks the
//! phase machine below, pumping bytes from the transport through the
//! deframer into the frame sink (normally the selected decoder
//! process) strictly in arrival order.
//!
//! ```text
//!  Connecting ──► DecoderStarting ──► Streaming ──► Draining ──► Closed
//!       │                │                                          ▲
//!       └────────────────┴──────────────────────────────────────────┘
//! ```
//!
//! Entering `Streaming` emits a "stream started" signal to the display
//! gate (so the external kiosk coordinator can hide the idle UI);
//! leaving it emits "stream ended". The gate is only signalled after
//! the decoder survived its confirmation window — a decoder that
//! silently failed never hides the idle screen.

use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Instant;

use async_trait::async_trait;
use tracing::{info, warn};

use crate::error::StreamError;
use crate::framing::Deframer;
use crate::metrics::MetricsWindow;
use crate::transport::{ReadEvent, Transport};

// ── SessionPhase ─────────────────────────────────────────────────

/// The current phase of one stream session.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum SessionPhase {
    /// Transport open, nothing started yet. Initial state.
    #[default]
    Connecting,

    /// Selecting and confirming a decoder pipeline.
    DecoderStarting,

    /// Frames are flowing to the decoder.
    Streaming {
        /// When streaming began.
        since: Instant,
    },

    /// Tearing down the decoder and transport.
    Draining,

    /// Terminal state.
    Closed,
}

impl std::fmt::Display for SessionPhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Connecting => write!(f, "Connecting"),
            Self::DecoderStarting => write!(f, "DecoderStarting"),
            Self::Streaming { .. } => write!(f, "Streaming"),
            Self::Draining => write!(f, "Draining"),
            Self::Closed => write!(f, "Closed"),
        }
    }
}

impl SessionPhase {
    pub fn is_streaming(&self) -> bool {
        matches!(self, Self::Streaming { .. })
    }

    // ── Transitions ──────────────────────────────────────────────

    /// Valid from: `Connecting`.
    pub fn begin_decoder(&mut self) -> Result<(), StreamError> {
        match self {
            Self::Connecting => {
                *self = Self::DecoderStarting;
                Ok(())
            }
            _ => Err(StreamError::InvalidTransition(
                "cannot start decoder: not in Connecting phase",
            )),
        }
    }

    /// Valid from: `DecoderStarting`.
    pub fn begin_streaming(&mut self) -> Result<(), StreamError> {
        match self {
            Self::DecoderStarting => {
                *self = Self::Streaming {
                    since: Instant::now(),
                };
                Ok(())
            }
            _ => Err(StreamError::InvalidTransition(
                "cannot stream: not in DecoderStarting phase",
            )),
        }
    }

    /// Valid from: any non-terminal phase (teardown can start at any
    /// point once something failed).
    pub fn begin_drain(&mut self) -> Result<(), StreamError> {
        match self {
            Self::Closed => Err(StreamError::InvalidTransition(
                "cannot drain: session already closed",
            )),
            _ => {
                *self = Self::Draining;
                Ok(())
            }
        }
    }

    /// Valid from: `Draining`.
    pub fn finish(&mut self) -> Result<(), StreamError> {
        match self {
            Self::Draining => {
                *self = Self::Closed;
                Ok(())
            }
            _ => Err(StreamError::InvalidTransition(
                "cannot close: not in Draining phase",
            )),
        }
    }
}

// ── Seams ────────────────────────────────────────────────────────

/// Where decoded-stream payloads go. Implemented by
/// [`DecoderProcess`](crate::decoder::DecoderProcess); tests substitute
/// a collecting sink.
#[async_trait]
pub trait FrameSink: Send {
    async fn write_frame(&mut self, payload: &[u8]) -> Result<(), StreamError>;

    /// Name for logs (pipeline name for real decoders).
    fn name(&self) -> &str;
}

#[async_trait]
impl FrameSink for crate::decoder::DecoderProcess {
    async fn write_frame(&mut self, payload: &[u8]) -> Result<(), StreamError> {
        crate::decoder::DecoderProcess::write_frame(self, payload).await
    }

    fn name(&self) -> &str {
        crate::decoder::DecoderProcess::name(self)
    }
}

/// Visibility signals to the external kiosk coordinator.
///
/// The coordinator is a black box: it is only required to eventually
/// converge on the requested visibility.
#[async_trait]
pub trait DisplayGate: Send + Sync {
    /// A stream is live; the idle display should be hidden.
    async fn stream_started(&self);

    /// No stream is live; the idle display should be shown.
    async fn stream_ended(&self);
}

/// Gate that does nothing (tests, headless runs).
pub struct NullGate;

#[async_trait]
impl DisplayGate for NullGate {
    async fn stream_started(&self) {}
    async fn stream_ended(&self) {}
}

// ── SessionEnd ───────────────────────────────────────────────────

/// Why a session's pump loop returned.
#[derive(Debug, PartialEq, Eq)]
pub enum SessionEnd {
    /// The peer closed the stream (EOF).
    PeerClosed,
    /// The serial link went silent past the idle window; reconnect
    /// without a full backoff cycle.
    IdleTimeout,
    /// A transport read failed mid-session.
    TransportError,
    /// The resync budget was exhausted; the stream is garbage.
    CorruptStream,
    /// Writing to the decoder failed (broken pipe).
    DecoderDied,
    /// The global running flag was cleared.
    Shutdown,
}

// ── StreamSession ────────────────────────────────────────────────

/// One transport's streaming session: deframer, metrics, and phase.
pub struct StreamSession {
    phase: SessionPhase,
    deframer: Deframer,
    metrics: MetricsWindow,
}

impl Default for StreamSession {
    fn default() -> Self {
        Self::new(Deframer::default(), MetricsWindow::default())
    }
}

impl StreamSession {
    pub fn new(deframer: Deframer, metrics: MetricsWindow) -> Self {
        Self {
            phase: SessionPhase::default(),
            deframer,
            metrics,
        }
    }

    pub fn phase(&self) -> &SessionPhase {
        &self.phase
    }

    /// Metrics for the current window (primarily for tests; reporting
    /// happens inline during the pump).
    pub fn metrics(&self) -> &MetricsWindow {
        &self.metrics
    }

    /// Mark the decoder-selection step. Call before
    /// [`pump`](Self::pump); kept separate so the caller can tear down
    /// cleanly when selection fails.
    pub fn decoder_starting(&mut self) -> Result<(), StreamError> {
        self.phase.begin_decoder()
    }

    /// Pump the transport into the sink until the session ends.
    ///
    /// Emits the display-gate signals on entry to and exit from
    /// `Streaming`. Always leaves the phase machine in `Closed`.
    pub async fn pump(
        &mut self,
        transport: &mut dyn Transport,
        sink: &mut dyn FrameSink,
        gate: &dyn DisplayGate,
        running: &AtomicBool,
    ) -> Result<SessionEnd, StreamError> {
        let transport_desc = transport.describe();
        let transport_kind = transport.kind().to_string();

        self.phase.begin_streaming()?;
        info!(
            transport = %transport_desc,
            sink = sink.name(),
            "streaming started"
        );
        gate.stream_started().await;

        let end = self.pump_inner(transport, sink, running, &transport_kind).await;

        self.phase.begin_drain()?;
        gate.stream_ended().await;
        self.phase.finish()?;

        info!(
            transport = %transport_desc,
            end = ?end,
            pending = self.deframer.pending(),
            "streaming ended"
        );
        Ok(end)
    }

    async fn pump_inner(
        &mut self,
        transport: &mut dyn Transport,
        sink: &mut dyn FrameSink,
        running: &AtomicBool,
        transport_kind: &str,
    ) -> SessionEnd {
        loop {
            if !running.load(Ordering::SeqCst) {
                return SessionEnd::Shutdown;
            }

            let chunk = match transport.read().await {
                Ok(ReadEvent::Data(chunk)) => chunk,
                Ok(ReadEvent::Idle) => continue,
                Ok(ReadEvent::Closed) => return SessionEnd::PeerClosed,
                Err(StreamError::IdleTimeout(silent)) => {
                    info!("stream idle for {silent:?}, reconnecting");
                    return SessionEnd::IdleTimeout;
                }
                Err(e) => {
                    warn!("transport error: {e}");
                    return SessionEnd::TransportError;
                }
            };

            self.deframer.feed(&chunk);

            loop {
                match self.deframer.next_frame() {
                    Ok(Some(frame)) => {
                        if let Err(e) = sink.write_frame(&frame).await {
                            warn!("decoder write failed: {e}");
                            return SessionEnd::DecoderDied;
                        }
                        self.metrics.record(frame.len());
                        self.metrics.maybe_report(transport_kind);
                    }
                    Ok(None) => break,
                    Err(e) => {
                        warn!(
                            dropped = self.deframer.resync_count(),
                            "framing unrecoverable: {e}"
                        );
                        return SessionEnd::CorruptStream;
                    }
                }
            }
        }
    }
}

// ── Tests ────────────────────────────────────────────────────────
