//! # vidlink-core
//!
//! Core library for the vidlink hybrid H.264 stream receiver.
//!
//! This crate contains:
//! - **Framing**: `FrameCodec`/`Deframer` for the length-prefixed wire
//!   format via `tokio_util`
//! - **Transport**: the `Transport` trait with TCP-listener and
//!   USB-serial implementations, plus device discovery and a scripted
//!   mock for tests
//! - **Decoder**: the ordered GStreamer pipeline catalog,
//!   probe-and-select, and child-process supervision
//! - **Failover**: per-transport retry backoff and the
//!   network/usb/hybrid/all receive loops
//! - **Session**: the per-connection phase machine and frame pump
//! - **Metrics**: windowed fps/bitrate accounting
//! - **Error**: `StreamError` — typed, `thiserror`-based error hierarchy
//!
//! The receiver binary lives in the sibling `vidlink-receiver` crate;
//! this crate holds no CLI, no config parsing, and no process-global
//! state.

pub mod decoder;
pub mod error;
pub mod failover;
pub mod framing;
pub mod metrics;
pub mod session;
pub mod transport;

// ── Re-exports for ergonomic usage ───────────────────────────────

pub use decoder::{
    builtin_catalog, select_and_start, DecoderProcess, DisplayProbe, Feasibility,
    PipelineDescriptor, SupervisorConfig,
};
pub use error::StreamError;
pub use failover::{FailoverController, FailoverMode, FailoverOptions, RetryState};
pub use framing::{Deframer, FrameCodec, DEFAULT_MAX_RESYNCS, MAX_FRAME_BYTES};
pub use metrics::{MetricsWindow, REPORT_INTERVAL};
pub use session::{DisplayGate, FrameSink, NullGate, SessionEnd, SessionPhase, StreamSession};
pub use transport::{ReadEvent, Transport, TransportKind};
