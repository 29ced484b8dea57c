//! Lifecycle management subsystem.
//!
//! # Data Flow
//! ```text
//! Signals (signals.rs):
//!     SIGINT → InterruptGate
//!         first  → warn, arm grace window
//!         second (inside window) → close listeners, return
//!
//! Shutdown (shutdown.rs):
//!     Shutdown::trigger → broadcast → server closes listeners, returns
//!
//! Reload (reload.rs):
//!     file change under watch dir → server → restart_process (exec)
//! ```
//!
//! # Design Decisions
//! - The accept loop multiplexes all lifecycle events; nothing blocks it
//! - Reload is a full process restart, never an in-process router mutation
//! - In-flight workers are not awaited on shutdown

pub mod reload;
pub mod shutdown;
pub mod signals;

pub use reload::{restart_process, SourceWatcher};
pub use shutdown::Shutdown;
pub use signals::{InterruptAction, InterruptGate, Interrupts};
