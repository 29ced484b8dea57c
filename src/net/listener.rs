//! TCP listener implementation with backpressure.
//!
//! # Responsibilities
//! - Resolve and bind the configured host and port
//! - Load the TLS acceptor when the listener is configured for TLS
//! - Accept incoming TCP connections
//! - Enforce the max_connections limit via a shared semaphore
//! - Report the URLs the listener is reachable at
//!
//! # Design Decisions
//! - `start` binds, `listen` starts queueing; both are explicit steps
//! - The TLS handshake is left to the worker, so a slow client never
//!   stalls the accept loop
//! - One admission gate is shared by every listener of a server

use std::fmt;
use std::net::{IpAddr, SocketAddr};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use tokio::net::{TcpListener, TcpSocket};
use tokio::sync::{AcquireError, OwnedSemaphorePermit, Semaphore};
use tokio_rustls::TlsAcceptor;

use crate::config::schema::ListenerConfig;
use crate::net::connection::Incoming;
use crate::net::tls::{load_acceptor, TlsError};

static LISTENER_ID_COUNTER: AtomicU64 = AtomicU64::new(1);

/// Identity assigned to a listener once it is bound.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerId(u64);

impl ListenerId {
    fn next() -> Self {
        Self(LISTENER_ID_COUNTER.fetch_add(1, Ordering::Relaxed))
    }

    pub fn as_u64(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for ListenerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "listener-{}", self.0)
    }
}

/// Error type for listener operations.
#[derive(Debug, thiserror::Error)]
pub enum ListenerError {
    #[error("failed to resolve {host}: {source}")]
    Resolve {
        host: String,
        #[source]
        source: std::io::Error,
    },
    #[error("{0} resolved to no addresses")]
    NoAddress(String),
    #[error("failed to bind {addr}: {source}")]
    Bind {
        addr: SocketAddr,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to listen on {addr}: {source}")]
    Listen {
        addr: SocketAddr,
        #[source]
        source: std::io::Error,
    },
    #[error("listener is not started")]
    NotStarted,
    #[error("listener is closed")]
    Closed,
    #[error("failed to accept: {0}")]
    Accept(#[source] std::io::Error),
    #[error("TLS setup failed: {0}")]
    Tls(#[from] TlsError),
}

enum State {
    Configured,
    Bound(TcpSocket),
    Listening(TcpListener),
    Closed,
}

impl State {
    fn name(&self) -> &'static str {
        match self {
            State::Configured => "configured",
            State::Bound(_) => "bound",
            State::Listening(_) => "listening",
            State::Closed => "closed",
        }
    }
}

/// A network endpoint, plain or TLS.
pub struct Listener {
    config: ListenerConfig,
    id: Option<ListenerId>,
    local_addr: Option<SocketAddr>,
    tls: Option<TlsAcceptor>,
    state: State,
}

impl Listener {
    pub fn new(config: ListenerConfig) -> Self {
        Self {
            config,
            id: None,
            local_addr: None,
            tls: None,
            state: State::Configured,
        }
    }

    /// Resolve, bind and load TLS material. Starting twice is a no-op.
    pub async fn start(&mut self) -> Result<(), ListenerError> {
        if !matches!(self.state, State::Configured) {
            tracing::warn!(listener = ?self.id, state = self.state.name(), "Listener already started");
            return Ok(());
        }

        let authority = self.config.authority();
        let addr = tokio::net::lookup_host(authority.as_str())
            .await
            .map_err(|source| ListenerError::Resolve {
                host: authority.clone(),
                source,
            })?
            .next()
            .ok_or_else(|| ListenerError::NoAddress(authority.clone()))?;

        let socket = match addr {
            SocketAddr::V4(_) => TcpSocket::new_v4(),
            SocketAddr::V6(_) => TcpSocket::new_v6(),
        }
        .map_err(|source| ListenerError::Bind { addr, source })?;
        socket
            .set_reuseaddr(true)
            .map_err(|source| ListenerError::Bind { addr, source })?;
        socket
            .bind(addr)
            .map_err(|source| ListenerError::Bind { addr, source })?;
        let local_addr = socket
            .local_addr()
            .map_err(|source| ListenerError::Bind { addr, source })?;

        self.tls = self.config.tls.as_ref().map(load_acceptor).transpose()?;
        let id = ListenerId::next();
        self.id = Some(id);
        self.local_addr = Some(local_addr);
        self.state = State::Bound(socket);

        tracing::info!(
            listener = %id,
            address = %local_addr,
            tls = self.tls.is_some(),
            "Listener bound"
        );
        Ok(())
    }

    /// Start queueing connections on the bound socket.
    pub fn listen(&mut self) -> Result<(), ListenerError> {
        match std::mem::replace(&mut self.state, State::Closed) {
            State::Bound(socket) => {
                let addr = self.local_addr.ok_or(ListenerError::NotStarted)?;
                let listener = socket
                    .listen(self.config.backlog)
                    .map_err(|source| ListenerError::Listen { addr, source })?;
                self.state = State::Listening(listener);
                tracing::debug!(listener = ?self.id, backlog = self.config.backlog, "Listening");
                Ok(())
            }
            State::Listening(listener) => {
                self.state = State::Listening(listener);
                Ok(())
            }
            State::Configured => {
                self.state = State::Configured;
                Err(ListenerError::NotStarted)
            }
            State::Closed => Err(ListenerError::Closed),
        }
    }

    /// Accept one connection. The TLS handshake is not performed here.
    pub async fn accept(&self) -> Result<Incoming, ListenerError> {
        let State::Listening(listener) = &self.state else {
            return Err(match self.state {
                State::Closed => ListenerError::Closed,
                _ => ListenerError::NotStarted,
            });
        };
        let (stream, peer) = listener.accept().await.map_err(ListenerError::Accept)?;
        let id = self.id.ok_or(ListenerError::NotStarted)?;
        tracing::debug!(listener = %id, peer_addr = %peer, "Connection accepted");
        Ok(Incoming {
            stream,
            peer,
            listener: id,
            buffer_size: self.config.buffer_size,
            tls: self.tls.clone(),
        })
    }

    /// Release the socket. Closing twice is harmless.
    pub fn close(&mut self) {
        if !matches!(self.state, State::Closed) {
            tracing::info!(listener = ?self.id, address = ?self.local_addr, "Listener closed");
        }
        self.state = State::Closed;
    }

    pub fn id(&self) -> Option<ListenerId> {
        self.id
    }

    pub fn config(&self) -> &ListenerConfig {
        &self.config
    }

    /// The bound address, once started.
    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.local_addr
    }

    pub fn is_tls(&self) -> bool {
        self.config.tls.is_some()
    }

    pub fn is_listening(&self) -> bool {
        matches!(self.state, State::Listening(_))
    }

    /// URLs this listener answers on. Wildcard hosts expand to every
    /// address the host name resolves to, the host name and `localhost`.
    pub async fn advertised_urls(&self) -> Vec<String> {
        let Some(addr) = self.local_addr else {
            return Vec::new();
        };
        let scheme = if self.is_tls() { "https" } else { "http" };
        let port = addr.port();

        let mut hosts = Vec::new();
        if addr.ip().is_unspecified() {
            if let Some(name) = machine_name() {
                match tokio::net::lookup_host((name.as_str(), port)).await {
                    Ok(resolved) => hosts.extend(resolved.map(|a| format_ip(a.ip()))),
                    Err(e) => tracing::debug!(host = %name, error = %e, "Could not resolve host name"),
                }
                hosts.push(name);
            }
            hosts.push("localhost".to_string());
        } else {
            hosts.push(self.config.host.clone());
        }

        let mut urls: Vec<String> = Vec::with_capacity(hosts.len());
        for host in hosts {
            let url = format!("{scheme}://{host}:{port}/");
            if !urls.contains(&url) {
                urls.push(url);
            }
        }
        urls
    }
}

impl fmt::Debug for Listener {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Listener")
            .field("id", &self.id)
            .field("config", &self.config)
            .field("local_addr", &self.local_addr)
            .field("state", &self.state.name())
            .finish()
    }
}

fn format_ip(ip: IpAddr) -> String {
    match ip {
        IpAddr::V4(v4) => v4.to_string(),
        IpAddr::V6(v6) => format!("[{v6}]"),
    }
}

/// The machine's host name, when the OS reports a usable one.
fn machine_name() -> Option<String> {
    match hostname::get() {
        Ok(name) => {
            let name = name.to_string_lossy().trim().to_string();
            (!name.is_empty()).then_some(name)
        }
        Err(e) => {
            tracing::debug!(error = %e, "Could not read host name");
            None
        }
    }
}

/// Bounds the number of connections being served at once.
///
/// Uses a semaphore to enforce `max_connections`. When the limit is reached,
/// the accept loop waits until a slot becomes available.
#[derive(Debug, Clone)]
pub struct AdmissionGate {
    /// Semaphore to limit concurrent connections.
    slots: Arc<Semaphore>,
    /// Configured maximum connections.
    max_connections: usize,
}

impl AdmissionGate {
    pub fn new(max_connections: usize) -> Self {
        Self {
            slots: Arc::new(Semaphore::new(max_connections)),
            max_connections,
        }
    }

    /// Wait for a free slot.
    pub async fn acquire(&self) -> Result<ConnectionPermit, AcquireError> {
        let permit = Arc::clone(&self.slots).acquire_owned().await?;
        Ok(ConnectionPermit { _permit: permit })
    }

    /// Get current available connection slots.
    pub fn available_permits(&self) -> usize {
        self.slots.available_permits()
    }

    /// Get configured maximum connections.
    pub fn max_connections(&self) -> usize {
        self.max_connections
    }
}

/// A permit representing a connection slot.
///
/// When dropped, the connection slot is released back to the pool.
/// This ensures backpressure is maintained even if the connection handler panics.
#[derive(Debug)]
pub struct ConnectionPermit {
    _permit: OwnedSemaphorePermit,
}
