//! Per-connection worker.
//!
//! # Responsibilities
//! - Finish the handshake and read one request
//! - Route it, run middleware and handler, write one response
//! - Contain every failure: parse errors drop the connection, handler
//!   errors and panics become a 500
//! - Always close the connection
//!
//! # Design Decisions
//! - One spawned task per connection, holding an admission permit
//! - The router snapshot is taken at spawn time and kept for the exchange
//! - Error details reach the client only in debug mode

use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;

use futures_util::FutureExt;

use crate::config::schema::ServerConfig;
use crate::http::handler::HandlerResult;
use crate::http::request::Request;
use crate::http::response::Response;
use crate::net::connection::{Connection, Incoming, ReadLimits};
use crate::routing::router::{RouteMatch, Router};

/// Settings shared by every worker of a server.
#[derive(Debug, Clone)]
pub struct WorkerSettings {
    /// Include error details in 500 bodies.
    pub debug: bool,
    pub limits: ReadLimits,
    pub handshake_timeout: Duration,
}

impl From<&ServerConfig> for WorkerSettings {
    fn from(config: &ServerConfig) -> Self {
        Self {
            debug: config.debug,
            limits: ReadLimits {
                idle_timeout: config.read_timeout(),
                request_timeout: config.request_timeout(),
                max_bytes: config.max_request_bytes,
            },
            handshake_timeout: config.handshake_timeout(),
        }
    }
}

impl Default for WorkerSettings {
    fn default() -> Self {
        Self::from(&ServerConfig::default())
    }
}

/// Serves exactly one connection.
pub struct Worker {
    router: Arc<Router>,
    settings: Arc<WorkerSettings>,
}

impl Worker {
    pub fn new(router: Arc<Router>, settings: Arc<WorkerSettings>) -> Self {
        Self { router, settings }
    }

    /// Handshake, then serve. Handshake failures close the socket silently.
    pub async fn run(self, incoming: Incoming) {
        let peer = incoming.peer();
        match incoming.establish(self.settings.handshake_timeout).await {
            Ok(connection) => self.serve(connection).await,
            Err(e) => tracing::warn!(peer_addr = %peer, error = %e, "Connection setup failed"),
        }
    }

    /// Read → route → handle → respond → close.
    pub async fn serve(&self, mut connection: Connection) {
        let raw = match connection.receive(self.settings.limits).await {
            Ok(raw) if raw.is_empty() => {
                tracing::debug!(connection_id = %connection.id(), "No data received");
                connection.close().await;
                return;
            }
            Ok(raw) => raw,
            Err(e) => {
                tracing::warn!(connection_id = %connection.id(), error = %e, "Failed to read request");
                connection.close().await;
                return;
            }
        };

        let request = match Request::parse(&raw) {
            Ok(request) => request,
            Err(e) => {
                tracing::warn!(connection_id = %connection.id(), error = %e, "Malformed request");
                connection.close().await;
                return;
            }
        };
        let request = match connection.peer() {
            Some(peer) => request.with_peer(peer),
            None => request,
        };

        let method = request.method().to_string();
        let path = request.path().to_string();
        let response = self.respond(request).await;
        tracing::info!(
            connection_id = %connection.id(),
            method = %method,
            path = %path,
            status = response.status().as_u16(),
            "Request served"
        );

        if let Err(e) = connection.send(&response.build()).await {
            tracing::debug!(connection_id = %connection.id(), error = %e, "Failed to write response");
        }
        connection.close().await;
    }

    /// Produce the response for a parsed request.
    pub async fn respond(&self, request: Request) -> Response {
        let Some(found) = self.router.route(&request) else {
            tracing::debug!(method = %request.method(), path = %request.path(), "No route matched");
            return Response::not_found();
        };

        match AssertUnwindSafe(dispatch(found, request)).catch_unwind().await {
            Ok(Ok(reply)) => reply.into_response(),
            Ok(Err(err)) => {
                tracing::error!(error = ?err, "Handler failed");
                let detail = self.settings.debug.then(|| format!("{err:?}"));
                Response::internal_error(detail.as_deref())
            }
            Err(panic) => {
                let message = panic_message(panic.as_ref());
                tracing::error!(panic = %message, "Handler panicked");
                let detail = self.settings.debug.then(|| format!("panic: {message}"));
                Response::internal_error(detail.as_deref())
            }
        }
    }
}

async fn dispatch(found: RouteMatch, request: Request) -> HandlerResult {
    let mut request = request;
    for middleware in &found.request_middleware {
        request = middleware(request)?;
    }
    let mut reply = found.handler.call(request.clone(), found.params).await?;
    for middleware in &found.response_middleware {
        reply = middleware(&request, reply)?;
    }
    Ok(reply)
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        message.to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic payload".to_string()
    }
}
