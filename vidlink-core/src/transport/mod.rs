//! Byte-stream transports carrying the frame protocol.
//!
//! A [`Transport`] unifies "read the next chunk" and "write" semantics
//! across the TCP and USB-serial links so the session layer never
//! inspects what kind of channel it is talking to. Exactly one
//! transport handle is active for decoding at any instant; the
//! failover controller decides which.
//!
//! Transports never retry: any I/O error or EOF ends the session, and
//! reconnection is driven one layer up.

pub mod mock;
pub mod serial;
pub mod tcp;

use async_trait::async_trait;
use bytes::Bytes;

use crate::error::StreamError;

/// Which kind of channel a transport handle wraps.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportKind {
    Tcp,
    Serial,
}

impl std::fmt::Display for TransportKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Tcp => write!(f, "tcp"),
            Self::Serial => write!(f, "serial"),
        }
    }
}

/// Outcome of a single bounded read.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReadEvent {
    /// One chunk of received bytes (never empty).
    Data(Bytes),
    /// The read timed out with no data; the link may still be healthy.
    Idle,
    /// The peer closed the stream.
    Closed,
}

/// A live byte-stream channel.
///
/// Reads are bounded: they return within the transport's configured
/// timeout so callers can observe a shutdown flag promptly.
#[async_trait]
pub trait Transport: Send {
    /// Read the next chunk, waiting at most the configured timeout.
    ///
    /// Serial transports additionally surface
    /// [`StreamError::IdleTimeout`] once the link has been silent for
    /// longer than the idle window — a soft failure that should trigger
    /// a fast reconnect rather than a full backoff cycle.
    async fn read(&mut self) -> Result<ReadEvent, StreamError>;

    /// Write raw bytes to the channel.
    async fn write(&mut self, data: &[u8]) -> Result<(), StreamError>;

    fn kind(&self) -> TransportKind;

    /// Human-readable peer/device description for logs.
    fn describe(&self) -> String;
}
