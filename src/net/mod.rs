//! Network layer subsystem.
//!
//! # Data Flow
//! ```text
//! ListenerConfig
//!     → listener.rs (resolve, bind, listen, accept)
//!     → tls.rs (acceptor built from PEM files at start)
//!     → connection.rs (Incoming → handshake in worker → Connection)
//!     → Hand off to HTTP worker
//!
//! Connection States:
//!     Accepted → Read → Written → (closed, consumed)
//! ```
//!
//! # Design Decisions
//! - Admission gate (semaphore) bounds concurrently served connections
//! - Handshake and reads never run on the accept loop
//! - TLS is optional and handled transparently

pub mod connection;
pub mod listener;
pub mod tls;

pub use connection::{Connection, ConnectionError, ConnectionId, ConnectionState, Incoming, ReadLimits};
pub use listener::{AdmissionGate, ConnectionPermit, Listener, ListenerError, ListenerId};
pub use tls::{load_acceptor, TlsError};
