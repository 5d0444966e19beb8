//! TCP transport: single-connection listener with low-latency socket
//! options.
//!
//! The listener accepts exactly one inbound connection at a time (the
//! sender is a single host machine). `SO_REUSEADDR` and an enlarged
//! receive buffer are applied before `listen`; `TCP_NODELAY` is set on
//! the accepted stream before the first read. A bind failure is
//! reported to the caller — backoff and retry belong to the failover
//! controller.

use std::net::SocketAddr;
use std::time::Duration;

use async_trait::async_trait;
use bytes::BytesMut;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpSocket, TcpStream};
use tracing::{debug, info};

use crate::error::StreamError;
use crate::transport::{ReadEvent, Transport, TransportKind};

/// Receive buffer requested on the listening socket (2 MiB).
const RECV_BUFFER_BYTES: u32 = 2 * 1024 * 1024;

/// Per-read chunk capacity.
const READ_CHUNK_BYTES: usize = 256 * 1024;

// ── TcpAcceptor ──────────────────────────────────────────────────

/// A bound, listening socket that hands out one [`TcpTransport`] per
/// accepted connection.
pub struct TcpAcceptor {
    listener: TcpListener,
    read_timeout: Duration,
}

impl TcpAcceptor {
    /// Bind and listen on `host:port`.
    pub fn bind(host: &str, port: u16, read_timeout: Duration) -> Result<Self, StreamError> {
        let addr: SocketAddr = format!("{host}:{port}").parse().map_err(|e| {
            StreamError::TransportOpen {
                kind: "tcp",
                reason: format!("invalid address {host}:{port}: {e}"),
            }
        })?;

        let open_err = |e: std::io::Error| StreamError::TransportOpen {
            kind: "tcp",
            reason: e.to_string(),
        };

        let socket = if addr.is_ipv4() {
            TcpSocket::new_v4().map_err(open_err)?
        } else {
            TcpSocket::new_v6().map_err(open_err)?
        };
        socket.set_reuseaddr(true).map_err(open_err)?;
        socket
            .set_recv_buffer_size(RECV_BUFFER_BYTES)
            .map_err(open_err)?;
        socket.bind(addr).map_err(open_err)?;

        let listener = socket.listen(1).map_err(open_err)?;
        info!("listening on {addr}");

        Ok(Self {
            listener,
            read_timeout,
        })
    }

    /// The locally bound address (useful with port 0 in tests).
    pub fn local_addr(&self) -> Result<SocketAddr, StreamError> {
        self.listener.local_addr().map_err(StreamError::Io)
    }

    /// Wait up to `timeout` for one inbound connection.
    ///
    /// Returns `Ok(None)` when the timeout elapses with no connection,
    /// so hybrid mode can go back to probing USB instead of blocking
    /// here indefinitely.
    pub async fn accept(&self, timeout: Duration) -> Result<Option<TcpTransport>, StreamError> {
        let accepted = tokio::time::timeout(timeout, self.listener.accept()).await;
        let (stream, peer) = match accepted {
            Err(_) => return Ok(None),
            Ok(result) => result.map_err(StreamError::Io)?,
        };

        stream.set_nodelay(true).map_err(StreamError::Io)?;
        info!("connection from {peer}");

        Ok(Some(TcpTransport {
            stream,
            peer,
            read_timeout: self.read_timeout,
        }))
    }
}

// ── TcpTransport ─────────────────────────────────────────────────

/// One accepted TCP connection.
pub struct TcpTransport {
    stream: TcpStream,
    peer: SocketAddr,
    read_timeout: Duration,
}

impl TcpTransport {
    /// Wrap an already-connected stream (tests and loopback tooling).
    pub fn from_stream(stream: TcpStream, read_timeout: Duration) -> Result<Self, StreamError> {
        let peer = stream.peer_addr().map_err(StreamError::Io)?;
        stream.set_nodelay(true).map_err(StreamError::Io)?;
        Ok(Self {
            stream,
            peer,
            read_timeout,
        })
    }
}

#[async_trait]
impl Transport for TcpTransport {
    async fn read(&mut self) -> Result<ReadEvent, StreamError> {
        let mut buf = BytesMut::with_capacity(READ_CHUNK_BYTES);

        match tokio::time::timeout(self.read_timeout, self.stream.read_buf(&mut buf)).await {
            Err(_) => Ok(ReadEvent::Idle),
            Ok(Ok(0)) => {
                debug!("peer {} closed the stream", self.peer);
                Ok(ReadEvent::Closed)
            }
            Ok(Ok(_)) => Ok(ReadEvent::Data(buf.freeze())),
            Ok(Err(e)) => Err(StreamError::Io(e)),
        }
    }

    async fn write(&mut self, data: &[u8]) -> Result<(), StreamError> {
        self.stream.write_all(data).await.map_err(StreamError::Io)
    }

    fn kind(&self) -> TransportKind {
        TransportKind::Tcp
    }

    fn describe(&self) -> String {
        format!("tcp:{}", self.peer)
    }
}

// ── Tests ────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn accept_times_out_without_connection() {
        let acceptor =
            TcpAcceptor::bind("127.0.0.1", 0, Duration::from_millis(100)).unwrap();
        let got = acceptor.accept(Duration::from_millis(50)).await.unwrap();
        assert!(got.is_none());
    }

    #[tokio::test]
    async fn read_data_then_closed() {
        let acceptor =
            TcpAcceptor::bind("127.0.0.1", 0, Duration::from_secs(1)).unwrap();
        let addr = acceptor.local_addr().unwrap();

        let client = tokio::spawn(async move {
            let mut stream = TcpStream::connect(addr).await.unwrap();
            stream.write_all(b"hello").await.unwrap();
            // Drop closes the connection.
        });

        let mut transport = acceptor
            .accept(Duration::from_secs(1))
            .await
            .unwrap()
            .expect("no connection accepted");

        let mut received = Vec::new();
        loop {
            match transport.read().await.unwrap() {
                ReadEvent::Data(chunk) => received.extend_from_slice(&chunk),
                ReadEvent::Idle => continue,
                ReadEvent::Closed => break,
            }
        }
        assert_eq!(received, b"hello");
        client.await.unwrap();
    }

    #[tokio::test]
    async fn idle_when_no_data() {
        let acceptor =
            TcpAcceptor::bind("127.0.0.1", 0, Duration::from_millis(50)).unwrap();
        let addr = acceptor.local_addr().unwrap();

        let _client = TcpStream::connect(addr).await.unwrap();
        let mut transport = acceptor
            .accept(Duration::from_secs(1))
            .await
            .unwrap()
            .unwrap();

        assert_eq!(transport.read().await.unwrap(), ReadEvent::Idle);
    }

    #[test]
    fn bind_error_is_transport_open() {
        let result = TcpAcceptor::bind("256.0.0.1", 0, Duration::from_secs(1));
        assert!(matches!(
            result,
            Err(StreamError::TransportOpen { kind: "tcp", .. })
        ));
    }
}
