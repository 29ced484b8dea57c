//! HTTP protocol handling subsystem.
//!
//! # Data Flow
//! ```text
//! Listener.accept (server.rs accept loop, admission permit)
//!     → worker.rs (one task per connection)
//!     → request.rs (parse head, normalize path, cookies)
//!     → [routing layer resolves handler + middleware]
//!     → handler.rs (request middleware → handler → response middleware)
//!     → response.rs (recompute Content-Length / Set-Cookie, serialize)
//!     → Send to client, close
//! ```

pub mod handler;
pub mod headers;
pub mod request;
pub mod response;
pub mod server;
pub mod worker;

pub use handler::{async_handler, Handler, HandlerResult, IntoReply, Reply};
pub use headers::Headers;
pub use request::{ParseError, Request};
pub use response::Response;
pub use server::{HttpServer, ServerError, ServerState};
pub use worker::{Worker, WorkerSettings};
