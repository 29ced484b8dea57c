//! Application handlers, middleware and reply normalization.
//!
//! # Responsibilities
//! - Define the [`Handler`] seam between the router and application code
//! - Normalize whatever a handler returns into a [`Reply`]
//! - Turn a [`Reply`] into the [`Response`] that goes on the wire
//!
//! # Design Decisions
//! - Handlers are async at the seam so forwarding handlers can await I/O
//! - Plain synchronous closures are handlers through a blanket impl
//! - Handler failures are `anyhow::Error`; the worker maps them to 500

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use bytes::Bytes;
use http::StatusCode;
use serde_json::Value;

use crate::http::request::Request;
use crate::http::response::Response;
use crate::routing::types::Params;

/// Boxed future returned by handlers.
pub type BoxFuture<T> = Pin<Box<dyn Future<Output = T> + Send + 'static>>;

/// Outcome of a handler or middleware.
pub type HandlerResult = anyhow::Result<Reply>;

/// Transforms a request before the handler sees it.
pub type RequestMiddleware = Arc<dyn Fn(Request) -> anyhow::Result<Request> + Send + Sync>;

/// Transforms a handler's reply before it is sent.
pub type ResponseMiddleware =
    Arc<dyn Fn(&Request, Reply) -> anyhow::Result<Reply> + Send + Sync>;

/// Application code invoked for a matched route.
pub trait Handler: Send + Sync + 'static {
    fn call(&self, request: Request, params: Params) -> BoxFuture<HandlerResult>;
}

impl<F, R> Handler for F
where
    F: Fn(&Request, &Params) -> R + Send + Sync + 'static,
    R: IntoReply,
{
    fn call(&self, request: Request, params: Params) -> BoxFuture<HandlerResult> {
        let reply = self(&request, &params).into_reply();
        Box::pin(std::future::ready(reply))
    }
}

/// Adapter that makes an async function usable as a [`Handler`].
pub struct AsyncHandler<F>(F);

/// Wrap an `async` handler function.
pub fn async_handler<F, Fut, R>(f: F) -> AsyncHandler<F>
where
    F: Fn(Request, Params) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = R> + Send + 'static,
    R: IntoReply,
{
    AsyncHandler(f)
}

impl<F, Fut, R> Handler for AsyncHandler<F>
where
    F: Fn(Request, Params) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = R> + Send + 'static,
    R: IntoReply,
{
    fn call(&self, request: Request, params: Params) -> BoxFuture<HandlerResult> {
        let fut = (self.0)(request, params);
        Box::pin(async move { fut.await.into_reply() })
    }
}

/// Normalized handler return value.
#[derive(Debug, Clone)]
pub enum Reply {
    /// A fully built response, sent as-is.
    Response(Response),
    /// Structured data serialized as JSON with the given status.
    Json(Value, StatusCode),
    /// A plain body sent as `200 OK`.
    Body(Bytes),
}

impl Reply {
    /// Convert into the response that will be written to the client.
    pub fn into_response(self) -> Response {
        match self {
            Reply::Response(response) => response,
            Reply::Json(value, status) => Response::new(value.to_string())
                .with_status(status)
                .with_content_type("application/json"),
            Reply::Body(body) => Response::new(body),
        }
    }
}

/// Conversion of handler return types into a [`HandlerResult`].
pub trait IntoReply {
    fn into_reply(self) -> HandlerResult;
}

impl IntoReply for Reply {
    fn into_reply(self) -> HandlerResult {
        Ok(self)
    }
}

impl IntoReply for Response {
    fn into_reply(self) -> HandlerResult {
        Ok(Reply::Response(self))
    }
}

impl IntoReply for String {
    fn into_reply(self) -> HandlerResult {
        Ok(Reply::Body(self.into()))
    }
}

impl IntoReply for &'static str {
    fn into_reply(self) -> HandlerResult {
        Ok(Reply::Body(Bytes::from_static(self.as_bytes())))
    }
}

impl IntoReply for Vec<u8> {
    fn into_reply(self) -> HandlerResult {
        Ok(Reply::Body(self.into()))
    }
}

impl IntoReply for Bytes {
    fn into_reply(self) -> HandlerResult {
        Ok(Reply::Body(self))
    }
}

impl IntoReply for (Value, StatusCode) {
    fn into_reply(self) -> HandlerResult {
        Ok(Reply::Json(self.0, self.1))
    }
}

impl IntoReply for (Value, u16) {
    fn into_reply(self) -> HandlerResult {
        let status = StatusCode::from_u16(self.1)?;
        Ok(Reply::Json(self.0, status))
    }
}

impl<T, E> IntoReply for Result<T, E>
where
    T: IntoReply,
    E: Into<anyhow::Error>,
{
    fn into_reply(self) -> HandlerResult {
        self.map_err(Into::<anyhow::Error>::into)?.into_reply()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn request() -> Request {
        Request::parse(b"GET / HTTP/1.1\r\n\r\n").unwrap()
    }

    #[test]
    fn json_tuple_becomes_json_response() {
        let response = (json!({"id": 7}), 201u16).into_reply().unwrap().into_response();
        assert_eq!(response.status(), StatusCode::CREATED);
        assert_eq!(response.headers().get("Content-Type"), Some("application/json"));
        assert_eq!(response.body().as_ref(), br#"{"id":7}"#);
    }

    #[test]
    fn plain_values_become_ok_bodies() {
        let response = "Hello".into_reply().unwrap().into_response();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(response.body().as_ref(), b"Hello");
    }

    #[test]
    fn invalid_status_is_an_error() {
        assert!((json!([]), 42u16).into_reply().is_err());
    }

    #[test]
    fn errors_propagate_through_results() {
        let failed: Result<String, std::io::Error> =
            Err(std::io::Error::new(std::io::ErrorKind::Other, "disk"));
        assert_eq!(failed.into_reply().unwrap_err().to_string(), "disk");
    }

    #[tokio::test]
    async fn closures_and_async_functions_are_handlers() {
        let sync = |_: &Request, _: &Params| "sync";
        let reply = sync.call(request(), Params::default()).await.unwrap();
        assert_eq!(reply.into_response().body().as_ref(), b"sync");

        let asynchronous = async_handler(|request: Request, _| async move {
            format!("async {}", request.method())
        });
        let reply = asynchronous.call(request(), Params::default()).await.unwrap();
        assert_eq!(reply.into_response().body().as_ref(), b"async GET");
    }
}
