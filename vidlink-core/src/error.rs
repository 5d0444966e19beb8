//! Domain-specific error types for the receiver core.
//!
//! All fallible operations return `Result<T, StreamError>`.
//! Expected conditions (timeouts, idle links) and fatal conditions are
//! distinct variants so callers can match on them instead of inspecting
//! strings.

use std::time::Duration;
use thiserror::Error;

/// The canonical error type for the receiver core.
#[derive(Debug, Error)]
pub enum StreamError {
    // ── Framing errors ───────────────────────────────────────────
    /// Too many resync attempts in one session; the stream is treated
    /// as corrupt and the session must be torn down.
    #[error("stream corrupt: {dropped} bytes dropped while resyncing")]
    CorruptStream { dropped: u64 },

    // ── Transport errors ─────────────────────────────────────────
    /// Opening a transport failed (bind/listen, accept, device open).
    /// Retried with backoff by the failover controller.
    #[error("transport open failed ({kind}): {reason}")]
    TransportOpen { kind: &'static str, reason: String },

    /// No serial device candidate could be found or opened.
    #[error("no usable serial device")]
    NoSerialDevice,

    /// A mid-session read or write failed, or the peer closed the
    /// stream. Ends the session.
    #[error("transport I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// No bytes arrived on an open serial link for longer than the
    /// configured idle window. Soft failure: reconnect without a full
    /// backoff cycle.
    #[error("link idle for {0:?}")]
    IdleTimeout(Duration),

    // ── Decoder errors ───────────────────────────────────────────
    /// Every candidate pipeline was infeasible or exited during its
    /// confirmation window. Retried with backoff; never permanently
    /// fatal.
    #[error("all {tried} decoder pipelines failed")]
    AllPipelinesFailed { tried: usize },

    /// Writing a frame to a running decoder failed (broken pipe).
    /// Ends the session; the same process is never retried.
    #[error("decoder '{pipeline}' died: {reason}")]
    DecoderIo { pipeline: String, reason: String },

    // ── Lifecycle errors ─────────────────────────────────────────
    /// An invalid session state transition was requested.
    #[error("invalid transition: {0}")]
    InvalidTransition(&'static str),

    /// The receiver is shutting down.
    #[error("shutdown requested")]
    Shutdown,
}

// ── Tests ────────────────────────────────────────────────────────
