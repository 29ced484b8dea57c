//! Accepted client connections.
//!
//! # Responsibilities
//! - Generate unique connection IDs for tracing
//! - Finish the TLS handshake off the accept loop
//! - Buffer one request (framing-aware, idle-window fallback)
//! - Write one response and close
//!
//! # Design Decisions
//! - A frame is complete at the end of the head plus `Content-Length` bytes
//! - Without a length, the read ends when the idle window elapses or the
//!   peer half-closes; the buffered bytes are returned as-is
//! - The whole read is bounded by a request deadline, so a client trickling
//!   bytes cannot hold its admission permit indefinitely
//! - A declared length beyond the size cap is refused before reading the body
//! - `close` consumes the connection, so it cannot be used afterwards

use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use bytes::{Bytes, BytesMut};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio_rustls::TlsAcceptor;

use crate::http::request::{find_head_end, frame_length};
use crate::net::listener::ListenerId;

/// Global atomic counter for connection IDs.
/// Using relaxed ordering is sufficient since we only need uniqueness, not synchronization.
static CONNECTION_ID_COUNTER: AtomicU64 = AtomicU64::new(1);

/// Unique identifier for a connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ConnectionId(u64);

impl ConnectionId {
    /// Generate a new unique connection ID.
    pub fn new() -> Self {
        Self(CONNECTION_ID_COUNTER.fetch_add(1, Ordering::Relaxed))
    }

    /// Get the raw ID value.
    pub fn as_u64(&self) -> u64 {
        self.0
    }
}

impl Default for ConnectionId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "conn-{}", self.0)
    }
}

/// Where a connection is in its single exchange.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Accepted,
    Read,
    Written,
}

/// Errors on an accepted connection.
#[derive(Debug, thiserror::Error)]
pub enum ConnectionError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("TLS handshake did not finish within {0:?}")]
    HandshakeTimeout(Duration),
    #[error("request exceeds {limit} bytes")]
    TooLarge { limit: usize },
    #[error("request not received within {0:?}")]
    RequestTimeout(Duration),
    #[error("connection already used for {0:?}")]
    InvalidState(ConnectionState),
}

/// Per-read limits applied by [`Connection::receive`].
#[derive(Debug, Clone, Copy)]
pub struct ReadLimits {
    /// Idle window for a single read.
    pub idle_timeout: Duration,
    /// Deadline for the whole request, however the bytes trickle in.
    pub request_timeout: Duration,
    /// Upper bound on buffered bytes.
    pub max_bytes: usize,
}

impl Default for ReadLimits {
    fn default() -> Self {
        Self {
            idle_timeout: Duration::from_millis(200),
            request_timeout: Duration::from_secs(10),
            max_bytes: 1024 * 1024,
        }
    }
}

trait Io: AsyncRead + AsyncWrite + Unpin + Send {}

impl<T: AsyncRead + AsyncWrite + Unpin + Send> Io for T {}

/// A socket fresh out of `accept`, handshake not yet done.
pub struct Incoming {
    pub(crate) stream: TcpStream,
    pub(crate) peer: SocketAddr,
    pub(crate) listener: ListenerId,
    pub(crate) buffer_size: usize,
    pub(crate) tls: Option<TlsAcceptor>,
}

impl Incoming {
    pub fn peer(&self) -> SocketAddr {
        self.peer
    }

    pub fn listener(&self) -> ListenerId {
        self.listener
    }

    pub fn is_tls(&self) -> bool {
        self.tls.is_some()
    }

    /// Complete the TLS handshake when the listener has one.
    pub async fn establish(self, handshake_timeout: Duration) -> Result<Connection, ConnectionError> {
        let id = ConnectionId::new();
        let stream: Box<dyn Io> = match self.tls {
            Some(acceptor) => {
                let accepted = tokio::time::timeout(handshake_timeout, acceptor.accept(self.stream))
                    .await
                    .map_err(|_| ConnectionError::HandshakeTimeout(handshake_timeout))??;
                tracing::trace!(connection_id = %id, "TLS handshake complete");
                Box::new(accepted)
            }
            None => Box::new(self.stream),
        };
        Ok(Connection {
            id,
            peer: Some(self.peer),
            stream,
            buffer_size: self.buffer_size.max(1),
            state: ConnectionState::Accepted,
        })
    }
}

impl std::fmt::Debug for Incoming {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Incoming")
            .field("peer", &self.peer)
            .field("listener", &self.listener)
            .field("tls", &self.is_tls())
            .finish()
    }
}

/// One accepted client socket, owned by exactly one worker.
pub struct Connection {
    id: ConnectionId,
    peer: Option<SocketAddr>,
    stream: Box<dyn Io>,
    buffer_size: usize,
    state: ConnectionState,
}

impl Connection {
    #[cfg(test)]
    pub(crate) fn from_stream<S>(stream: S, buffer_size: usize) -> Self
    where
        S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
    {
        Self {
            id: ConnectionId::new(),
            peer: None,
            stream: Box::new(stream),
            buffer_size,
            state: ConnectionState::Accepted,
        }
    }

    pub fn id(&self) -> ConnectionId {
        self.id
    }

    pub fn peer(&self) -> Option<SocketAddr> {
        self.peer
    }

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    /// Buffer one request. An empty result means the peer sent nothing.
    pub async fn receive(&mut self, limits: ReadLimits) -> Result<Bytes, ConnectionError> {
        if self.state != ConnectionState::Accepted {
            return Err(ConnectionError::InvalidState(self.state));
        }
        self.state = ConnectionState::Read;

        match tokio::time::timeout(limits.request_timeout, self.read_frame(limits)).await {
            Ok(frame) => frame,
            Err(_) => Err(ConnectionError::RequestTimeout(limits.request_timeout)),
        }
    }

    async fn read_frame(&mut self, limits: ReadLimits) -> Result<Bytes, ConnectionError> {
        let mut buffer = BytesMut::with_capacity(self.buffer_size);
        let mut chunk = vec![0u8; self.buffer_size];
        let mut frame_end: Option<usize> = None;
        let mut scanned = 0;
        loop {
            let read = match tokio::time::timeout(limits.idle_timeout, self.stream.read(&mut chunk)).await {
                Ok(read) => read?,
                Err(_) => {
                    tracing::trace!(connection_id = %self.id, buffered = buffer.len(), "Read idle window elapsed");
                    break;
                }
            };
            if read == 0 {
                break;
            }
            buffer.extend_from_slice(&chunk[..read]);
            if buffer.len() > limits.max_bytes {
                return Err(ConnectionError::TooLarge { limit: limits.max_bytes });
            }

            if frame_end.is_none() {
                match find_head_end(&buffer, scanned) {
                    Some((head_len, body_start)) => {
                        let end = frame_length(&buffer[..head_len], body_start)
                            .filter(|end| *end <= limits.max_bytes)
                            .ok_or(ConnectionError::TooLarge { limit: limits.max_bytes })?;
                        frame_end = Some(end);
                    }
                    // The terminator is at most three bytes; rescan only the tail.
                    None => scanned = buffer.len().saturating_sub(2),
                }
            }
            if frame_end.is_some_and(|end| buffer.len() >= end) {
                break;
            }
        }
        Ok(buffer.freeze())
    }

    /// Write one response.
    pub async fn send(&mut self, bytes: &[u8]) -> Result<(), ConnectionError> {
        if self.state != ConnectionState::Read {
            return Err(ConnectionError::InvalidState(self.state));
        }
        self.state = ConnectionState::Written;
        self.stream.write_all(bytes).await?;
        self.stream.flush().await?;
        Ok(())
    }

    /// Shut the socket down.
    pub async fn close(mut self) {
        if let Err(e) = self.stream.shutdown().await {
            tracing::trace!(connection_id = %self.id, error = %e, "Shutdown after close failed");
        }
    }
}

impl std::fmt::Debug for Connection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Connection")
            .field("id", &self.id)
            .field("peer", &self.peer)
            .field("state", &self.state)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::duplex;

    fn limits(max_bytes: usize) -> ReadLimits {
        ReadLimits {
            idle_timeout: Duration::from_millis(50),
            max_bytes,
            ..ReadLimits::default()
        }
    }

    #[test]
    fn connection_id_unique() {
        let id1 = ConnectionId::new();
        let id2 = ConnectionId::new();
        assert_ne!(id1, id2);
        assert!(id1.to_string().starts_with("conn-"));
    }

    #[tokio::test]
    async fn complete_head_ends_the_read() {
        let (mut client, server) = duplex(1024);
        let mut conn = Connection::from_stream(server, 8);
        client.write_all(b"GET / HTTP/1.1\r\nHost: a\r\n\r\n").await.unwrap();

        let started = std::time::Instant::now();
        let bytes = conn.receive(ReadLimits::default()).await.unwrap();
        assert_eq!(bytes.as_ref(), b"GET / HTTP/1.1\r\nHost: a\r\n\r\n");
        assert!(started.elapsed() < Duration::from_millis(200));
    }

    #[tokio::test]
    async fn waits_for_declared_body() {
        let (mut client, server) = duplex(1024);
        let mut conn = Connection::from_stream(server, 1024);
        let writer = tokio::spawn(async move {
            client.write_all(b"POST / HTTP/1.1\r\nContent-Length: 4\r\n\r\nab").await.unwrap();
            tokio::time::sleep(Duration::from_millis(20)).await;
            client.write_all(b"cd").await.unwrap();
            client
        });

        let bytes = conn.receive(limits(1024)).await.unwrap();
        assert!(bytes.ends_with(b"\r\n\r\nabcd"));
        drop(writer.await.unwrap());
    }

    #[tokio::test]
    async fn idle_window_returns_partial_data() {
        let (mut client, server) = duplex(1024);
        let mut conn = Connection::from_stream(server, 1024);
        client.write_all(b"GET / HTTP/1.1\r\nHost").await.unwrap();

        let bytes = conn.receive(limits(1024)).await.unwrap();
        assert_eq!(bytes.as_ref(), b"GET / HTTP/1.1\r\nHost");
    }

    #[tokio::test]
    async fn silent_peer_yields_empty_read() {
        let (client, server) = duplex(64);
        let mut conn = Connection::from_stream(server, 64);
        drop(client);
        assert!(conn.receive(limits(64)).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn oversized_requests_are_rejected() {
        let (mut client, server) = duplex(4096);
        let mut conn = Connection::from_stream(server, 16);
        client.write_all(&[b'a'; 100]).await.unwrap();

        let err = conn.receive(limits(32)).await.unwrap_err();
        assert!(matches!(err, ConnectionError::TooLarge { limit: 32 }));
    }

    #[tokio::test]
    async fn declared_length_beyond_the_cap_is_refused_early() {
        let (mut client, server) = duplex(1024);
        let mut conn = Connection::from_stream(server, 1024);
        client
            .write_all(b"POST / HTTP/1.1\r\nContent-Length: 18446744073709551615\r\n\r\nab")
            .await
            .unwrap();

        let err = conn.receive(limits(4096)).await.unwrap_err();
        assert!(matches!(err, ConnectionError::TooLarge { limit: 4096 }));

        let (mut client, server) = duplex(1024);
        let mut conn = Connection::from_stream(server, 1024);
        client
            .write_all(b"POST / HTTP/1.1\r\nContent-Length: 5000\r\n\r\nab")
            .await
            .unwrap();
        assert!(matches!(
            conn.receive(limits(4096)).await,
            Err(ConnectionError::TooLarge { limit: 4096 })
        ));
    }

    #[tokio::test]
    async fn head_split_across_reads_is_found() {
        let (mut client, server) = duplex(1024);
        let mut conn = Connection::from_stream(server, 3);
        client.write_all(b"GET / HTTP/1.1\r\nHost: a\r\n\r\n").await.unwrap();

        let started = std::time::Instant::now();
        let bytes = conn.receive(ReadLimits::default()).await.unwrap();
        assert!(bytes.ends_with(b"Host: a\r\n\r\n"));
        assert!(started.elapsed() < Duration::from_millis(200));
    }

    #[tokio::test]
    async fn trickling_clients_hit_the_request_deadline() {
        let (mut client, server) = duplex(1024);
        let mut conn = Connection::from_stream(server, 64);
        let writer = tokio::spawn(async move {
            for byte in b"GET / HTTP/1.1\r\nX-Slow: aaaaaaaaaaaaaaaaaaaa" {
                if client.write_all(&[*byte]).await.is_err() {
                    break;
                }
                tokio::time::sleep(Duration::from_millis(20)).await;
            }
        });

        let limits = ReadLimits {
            idle_timeout: Duration::from_millis(100),
            request_timeout: Duration::from_millis(250),
            max_bytes: 4096,
        };
        let started = std::time::Instant::now();
        let err = conn.receive(limits).await.unwrap_err();
        assert!(matches!(err, ConnectionError::RequestTimeout(_)));
        assert!(started.elapsed() < Duration::from_millis(600));
        drop(conn);
        writer.await.unwrap();
    }

    #[tokio::test]
    async fn one_read_one_write() {
        let (mut client, server) = duplex(1024);
        let mut conn = Connection::from_stream(server, 1024);
        assert!(matches!(
            conn.send(b"early").await,
            Err(ConnectionError::InvalidState(ConnectionState::Accepted))
        ));

        client.write_all(b"GET / HTTP/1.1\r\n\r\n").await.unwrap();
        conn.receive(limits(1024)).await.unwrap();
        conn.send(b"reply").await.unwrap();
        assert_eq!(conn.state(), ConnectionState::Written);
        assert!(conn.receive(limits(1024)).await.is_err());
        conn.close().await;

        let mut received = Vec::new();
        client.read_to_end(&mut received).await.unwrap();
        assert_eq!(received, b"reply");
    }
}
