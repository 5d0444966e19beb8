//! Length-prefixed frame extraction.
//!
//! ## Wire format
//!
//! ```text
//! length:  u32  (4, big-endian)
//! payload: [u8] (length bytes of H.264 Annex-B data)
//! ```
//!
//! No handshake, no acknowledgments, no multiplexing — the stream is a
//! plain concatenation of frames. A header whose length is zero or
//! larger than [`MAX_FRAME_BYTES`] marks a framing error; recovery is
//! to drop exactly one byte and try again, bounded by a per-session
//! resync budget so sustained garbage cannot degrade into endless
//! rescanning.

use bytes::{Buf, Bytes, BytesMut};
use tokio_util::codec::Decoder;
use tracing::warn;

use crate::error::StreamError;

/// Upper bound on a single frame payload (10 MiB).
pub const MAX_FRAME_BYTES: usize = 10_485_760;

/// Wire header size.
const LEN_PREFIX: usize = 4;

/// Default resync budget: bytes that may be dropped per session before
/// the stream is declared corrupt.
pub const DEFAULT_MAX_RESYNCS: u64 = 65_536;

// ── FrameCodec ───────────────────────────────────────────────────

/// Incremental decoder for the length-prefixed frame stream.
///
/// Implements [`tokio_util::codec::Decoder`]; repeated `decode` calls
/// against one buffer drain every complete frame it holds, so multiple
/// frames arriving in a single chunk are all extracted.
pub struct FrameCodec {
    max_frame: usize,
    max_resyncs: u64,
    resyncs: u64,
}

impl Default for FrameCodec {
    fn default() -> Self {
        Self::new(MAX_FRAME_BYTES, DEFAULT_MAX_RESYNCS)
    }
}

impl FrameCodec {
    pub fn new(max_frame: usize, max_resyncs: u64) -> Self {
        Self {
            max_frame,
            max_resyncs,
            resyncs: 0,
        }
    }

    /// Bytes dropped so far while resynchronizing.
    pub fn resync_count(&self) -> u64 {
        self.resyncs
    }
}

impl Decoder for FrameCodec {
    type Item = Bytes;
    type Error = StreamError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Bytes>, StreamError> {
        loop {
            if src.len() < LEN_PREFIX {
                return Ok(None);
            }

            let length =
                u32::from_be_bytes(src[..LEN_PREFIX].try_into().expect("peeked 4 bytes")) as usize;

            if length == 0 || length > self.max_frame {
                // Framing error: drop one byte and rescan.
                self.resyncs += 1;
                if self.resyncs == 1 || self.resyncs.is_power_of_two() {
                    warn!(length, dropped = self.resyncs, "invalid frame length, resyncing");
                }
                if self.resyncs > self.max_resyncs {
                    return Err(StreamError::CorruptStream {
                        dropped: self.resyncs,
                    });
                }
                src.advance(1);
                continue;
            }

            if src.len() < LEN_PREFIX + length {
                // Partial frame: wait for more data.
                src.reserve(LEN_PREFIX + length - src.len());
                return Ok(None);
            }

            src.advance(LEN_PREFIX);
            return Ok(Some(src.split_to(length).freeze()));
        }
    }
}

// ── Deframer ─────────────────────────────────────────────────────

/// Owns the per-session byte buffer and drives [`FrameCodec`].
///
/// One `Deframer` exists per transport session; it is discarded on
/// teardown, so no bytes carry over between sessions.
pub struct Deframer {
    codec: FrameCodec,
    buf: BytesMut,
}

impl Default for Deframer {
    fn default() -> Self {
        Self::new(FrameCodec::default())
    }
}

impl Deframer {
    pub fn new(codec: FrameCodec) -> Self {
        Self {
            codec,
            buf: BytesMut::with_capacity(256 * 1024),
        }
    }

    /// Append a received chunk to the buffer.
    pub fn feed(&mut self, chunk: &[u8]) {
        self.buf.extend_from_slice(chunk);
    }

    /// Extract the next complete frame, if any.
    ///
    /// Call in a loop after each [`feed`](Self::feed) until it returns
    /// `Ok(None)`.
    pub fn next_frame(&mut self) -> Result<Option<Bytes>, StreamError> {
        self.codec.decode(&mut self.buf)
    }

    /// Bytes currently buffered but not yet resolved into frames.
    pub fn pending(&self) -> usize {
        self.buf.len()
    }

    /// Bytes dropped so far while resynchronizing.
    pub fn resync_count(&self) -> u64 {
        self.codec.resync_count()
    }
}

// ── Tests ────────────────────────────────────────────────────────
