//! OS signal handling.
//!
//! # Responsibilities
//! - Listen for SIGINT (Ctrl-C) without blocking the accept loop
//! - Decide what an interrupt means: warn, or stop
//!
//! # Design Decisions
//! - Uses Tokio's signal handling (async-safe)
//! - Two-stage: the first interrupt only arms a grace window, a second one
//!   inside the window stops the server
//! - The gate is a plain state machine, driven with explicit instants

use std::time::Duration;

use tokio::time::Instant;

/// What the server should do about an interrupt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InterruptAction {
    /// First interrupt: keep serving, stop if another arrives before `deadline`.
    Warn { deadline: Instant },
    /// Second interrupt inside the grace window.
    Stop,
}

/// Two-stage interrupt state machine: Idle → Armed(deadline) → Stop.
#[derive(Debug, Clone)]
pub struct InterruptGate {
    grace: Duration,
    armed_until: Option<Instant>,
}

impl InterruptGate {
    pub fn new(grace: Duration) -> Self {
        Self {
            grace,
            armed_until: None,
        }
    }

    /// Register an interrupt received at `now`.
    pub fn on_interrupt(&mut self, now: Instant) -> InterruptAction {
        match self.armed_until {
            Some(deadline) if now < deadline => InterruptAction::Stop,
            _ => {
                let deadline = now + self.grace;
                self.armed_until = Some(deadline);
                InterruptAction::Warn { deadline }
            }
        }
    }

    /// Disarm once the window has passed. Returns true if it was disarmed.
    pub fn expire(&mut self, now: Instant) -> bool {
        match self.armed_until {
            Some(deadline) if now >= deadline => {
                self.armed_until = None;
                true
            }
            _ => false,
        }
    }

    /// End of the current grace window, if armed.
    pub fn deadline(&self) -> Option<Instant> {
        self.armed_until
    }

    pub fn is_armed(&self) -> bool {
        self.armed_until.is_some()
    }
}

/// Stream of interrupt signals.
pub struct Interrupts {
    #[cfg(unix)]
    inner: tokio::signal::unix::Signal,
}

impl Interrupts {
    /// Install the handler. Must be called inside a runtime.
    pub fn new() -> std::io::Result<Self> {
        #[cfg(unix)]
        {
            use tokio::signal::unix::{signal, SignalKind};
            Ok(Self {
                inner: signal(SignalKind::interrupt())?,
            })
        }
        #[cfg(not(unix))]
        {
            Ok(Self {})
        }
    }

    /// Wait for the next interrupt. `None` once signals can no longer arrive.
    pub async fn recv(&mut self) -> Option<()> {
        #[cfg(unix)]
        {
            self.inner.recv().await
        }
        #[cfg(not(unix))]
        {
            tokio::signal::ctrl_c().await.ok()
        }
    }
}

impl std::fmt::Debug for Interrupts {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Interrupts").finish_non_exhaustive()
    }
}
