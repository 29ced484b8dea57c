//! routekit: a small HTTP/1.1 server with its own routing engine.
//!
//! Raw sockets in, one request per connection, routed through a tree of
//! routers, subrouters and reverse proxies, one response out.

pub mod config;
pub mod http;
pub mod lifecycle;
pub mod net;
pub mod observability;
pub mod routing;

pub use config::schema::ServeConfig;
pub use http::{async_handler, HttpServer, IntoReply, Reply, Request, Response};
pub use lifecycle::Shutdown;
pub use net::Listener;
pub use routing::{Params, ProxyRouter, Router, RouterHandle};
