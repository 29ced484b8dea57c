//! HTTP server: listeners, accept loop and lifecycle.
//!
//! # Responsibilities
//! - Start and listen on every configured listener
//! - Run the accept loop across all listeners
//! - Spawn one worker per accepted connection, bounded by max_connections
//! - Two-stage interrupt, programmatic shutdown, restart on source changes
//! - Publish router replacements to new workers
//!
//! # Design Decisions
//! - A single control task multiplexes every event with `select!`
//! - A permit is taken before accepting; when the pool is exhausted the
//!   kernel backlog absorbs the burst while signals are still handled
//! - Workers are not awaited on shutdown

use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::SystemTime;

use futures_util::future::select_all;
use tokio::sync::{broadcast, mpsc};
use tokio::time::Instant;
use tracing::Instrument;

use crate::config::schema::ServerConfig;
use crate::http::worker::{Worker, WorkerSettings};
use crate::lifecycle::reload::{restart_process, SourceWatcher};
use crate::lifecycle::signals::{InterruptAction, InterruptGate, Interrupts};
use crate::net::connection::Incoming;
use crate::net::listener::{AdmissionGate, ConnectionPermit, Listener, ListenerError};
use crate::routing::handle::RouterHandle;
use crate::routing::router::Router;

/// Error type for server startup.
#[derive(Debug, thiserror::Error)]
pub enum ServerError {
    #[error("no listeners configured")]
    NoListeners,
    #[error(transparent)]
    Listener(#[from] ListenerError),
    #[error("failed to watch sources: {0}")]
    Watcher(#[from] notify::Error),
    #[error("failed to install signal handler: {0}")]
    Signals(#[source] std::io::Error),
}

/// Server lifecycle state, logged on every transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServerState {
    Starting,
    Listening,
    Accepting,
    Reloading,
    Stopped,
}

impl fmt::Display for ServerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ServerState::Starting => "starting",
            ServerState::Listening => "listening",
            ServerState::Accepting => "accepting",
            ServerState::Reloading => "reloading",
            ServerState::Stopped => "stopped",
        };
        f.write_str(name)
    }
}

/// Serves one shared router on any number of listeners.
pub struct HttpServer {
    router: RouterHandle,
    config: ServerConfig,
    workers: Arc<WorkerSettings>,
    admission: AdmissionGate,
}

impl HttpServer {
    pub fn new(router: Router, config: ServerConfig) -> Self {
        Self {
            router: RouterHandle::new(router),
            workers: Arc::new(WorkerSettings::from(&config)),
            admission: AdmissionGate::new(config.max_connections),
            config,
        }
    }

    /// Handle for installing a replacement router while running.
    pub fn router_handle(&self) -> RouterHandle {
        self.router.clone()
    }

    /// Get a reference to the config.
    pub fn config(&self) -> &ServerConfig {
        &self.config
    }

    /// Run until a confirmed interrupt or a programmatic shutdown.
    ///
    /// Listeners that were already started are reused as they are.
    pub async fn run(
        self,
        mut listeners: Vec<Listener>,
        mut shutdown: broadcast::Receiver<()>,
    ) -> Result<(), ServerError> {
        let mut state = transition(None, ServerState::Starting);
        if listeners.is_empty() {
            return Err(ServerError::NoListeners);
        }
        for listener in &mut listeners {
            if listener.local_addr().is_none() {
                listener.start().await?;
            }
            listener.listen()?;
        }
        state = transition(Some(state), ServerState::Listening);
        for listener in &listeners {
            for url in listener.advertised_urls().await {
                tracing::info!(url = %url, "Serving");
            }
        }

        let started = SystemTime::now();
        let (_watcher, mut changes) = if self.config.auto_reload.enabled {
            let reload = &self.config.auto_reload;
            let (watcher, rx) =
                SourceWatcher::new(&reload.watch_dir, reload.extensions.clone(), started).run()?;
            (Some(watcher), Some(rx))
        } else {
            (None, None)
        };

        let mut interrupts = Interrupts::new().map_err(ServerError::Signals)?;
        let mut gate = InterruptGate::new(self.config.shutdown_grace());
        let mut shutdown_open = true;
        state = transition(Some(state), ServerState::Accepting);

        loop {
            let grace_deadline = gate.deadline();
            tokio::select! {
                admitted = self.admit(&listeners) => {
                    match admitted {
                        Ok((permit, incoming)) => self.spawn_worker(permit, incoming),
                        Err(e) => tracing::warn!(error = %e, "Accept failed"),
                    }
                    tokio::time::sleep(self.config.accept_pause()).await;
                }
                Some(()) = interrupts.recv() => match gate.on_interrupt(Instant::now()) {
                    InterruptAction::Warn { .. } => tracing::warn!(
                        grace_secs = self.config.shutdown_grace_secs,
                        "Interrupt received, interrupt again to stop"
                    ),
                    InterruptAction::Stop => {
                        tracing::info!("Second interrupt received, stopping");
                        break;
                    }
                },
                _ = sleep_until(grace_deadline), if grace_deadline.is_some() => {
                    if gate.expire(Instant::now()) {
                        tracing::info!("No second interrupt, continuing");
                    }
                }
                result = shutdown.recv(), if shutdown_open => match result {
                    Ok(()) | Err(broadcast::error::RecvError::Lagged(_)) => {
                        tracing::info!("Shutdown requested");
                        break;
                    }
                    Err(broadcast::error::RecvError::Closed) => shutdown_open = false,
                },
                Some(path) = next_change(&mut changes) => {
                    state = transition(Some(state), ServerState::Reloading);
                    tracing::warn!(path = %path.display(), "Source changed");
                    let err = restart_process();
                    tracing::error!(error = %err, "Restart failed, still serving");
                    state = transition(Some(state), ServerState::Accepting);
                }
            }
        }

        for listener in &mut listeners {
            listener.close();
        }
        transition(Some(state), ServerState::Stopped);
        Ok(())
    }

    async fn admit(&self, listeners: &[Listener]) -> Result<(ConnectionPermit, Incoming), ListenerError> {
        let permit = self
            .admission
            .acquire()
            .await
            .map_err(|_| ListenerError::Closed)?;
        let accepts = listeners.iter().map(|listener| Box::pin(listener.accept()));
        let (incoming, _, _) = select_all(accepts).await;
        Ok((permit, incoming?))
    }

    fn spawn_worker(&self, permit: ConnectionPermit, incoming: Incoming) {
        let span = tracing::info_span!(
            "worker",
            peer_addr = %incoming.peer(),
            listener = %incoming.listener()
        );
        let worker = Worker::new(self.router.snapshot(), Arc::clone(&self.workers));
        tokio::spawn(
            async move {
                worker.run(incoming).await;
                drop(permit);
            }
            .instrument(span),
        );
    }
}

fn transition(from: Option<ServerState>, to: ServerState) -> ServerState {
    match from {
        Some(from) => tracing::info!(from = %from, to = %to, "Server state changed"),
        None => tracing::info!(to = %to, "Server state changed"),
    }
    to
}

async fn sleep_until(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}

async fn next_change(changes: &mut Option<mpsc::UnboundedReceiver<PathBuf>>) -> Option<PathBuf> {
    match changes {
        Some(rx) => rx.recv().await,
        None => std::future::pending().await,
    }
}
