//! Scripted transport for session and failover tests.
//!
//! Plays back a fixed sequence of read outcomes and records every
//! write, so lifecycle behavior (idle timeouts, peer close, mid-stream
//! errors) can be exercised without sockets or devices.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;

use crate::error::StreamError;
use crate::transport::{ReadEvent, Transport, TransportKind};

/// One scripted read outcome.
pub enum MockRead {
    Data(Bytes),
    Idle,
    Closed,
    IdleTimeout(Duration),
    Error(std::io::ErrorKind),
}

/// Transport that replays a script of [`MockRead`] outcomes.
///
/// Once the script is exhausted, every further read reports `Closed`.
pub struct MockTransport {
    kind: TransportKind,
    script: VecDeque<MockRead>,
    writes: Arc<Mutex<Vec<Bytes>>>,
}

impl MockTransport {
    pub fn new(kind: TransportKind) -> Self {
        Self {
            kind,
            script: VecDeque::new(),
            writes: Arc::new(Mutex::new(Vec::new())),
        }
    }

    pub fn push(mut self, item: MockRead) -> Self {
        self.script.push_back(item);
        self
    }

    pub fn push_data(self, data: &[u8]) -> Self {
        self.push(MockRead::Data(Bytes::copy_from_slice(data)))
    }

    /// Handle for inspecting captured writes after the transport has
    /// been consumed by a session.
    pub fn writes(&self) -> Arc<Mutex<Vec<Bytes>>> {
        Arc::clone(&self.writes)
    }
}

#[async_trait]
impl Transport for MockTransport {
    async fn read(&mut self) -> Result<ReadEvent, StreamError> {
        match self.script.pop_front() {
            None | Some(MockRead::Closed) => Ok(ReadEvent::Closed),
            Some(MockRead::Data(data)) => Ok(ReadEvent::Data(data)),
            Some(MockRead::Idle) => Ok(ReadEvent::Idle),
            Some(MockRead::IdleTimeout(silent)) => Err(StreamError::IdleTimeout(silent)),
            Some(MockRead::Error(kind)) => {
                Err(StreamError::Io(std::io::Error::new(kind, "scripted error")))
            }
        }
    }

    async fn write(&mut self, data: &[u8]) -> Result<(), StreamError> {
        self.writes
            .lock()
            .expect("writes lock")
            .push(Bytes::copy_from_slice(data));
        Ok(())
    }

    fn kind(&self) -> TransportKind {
        self.kind
    }

    fn describe(&self) -> String {
        format!("mock:{}", self.kind)
    }
}

// ── Tests ────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn script_plays_back_in_order() {
        let mut t = MockTransport::new(TransportKind::Serial)
            .push_data(b"one")
            .push(MockRead::Idle)
            .push_data(b"two");

        assert_eq!(
            t.read().await.unwrap(),
            ReadEvent::Data(Bytes::from_static(b"one"))
        );
        assert_eq!(t.read().await.unwrap(), ReadEvent::Idle);
        assert_eq!(
            t.read().await.unwrap(),
            ReadEvent::Data(Bytes::from_static(b"two"))
        );
        assert_eq!(t.read().await.unwrap(), ReadEvent::Closed);
    }

    #[tokio::test]
    async fn writes_are_captured() {
        let mut t = MockTransport::new(TransportKind::Tcp);
        let writes = t.writes();
        t.write(b"ack").await.unwrap();
        assert_eq!(writes.lock().unwrap().as_slice(), &[Bytes::from_static(b"ack")]);
    }
}
