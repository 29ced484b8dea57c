//! Response building and serialization.
//!
//! # Responsibilities
//! - Hold status, body, content type, cookies and headers until sent
//! - Seed default headers (Content-Type, Connection, Set-Cookie)
//! - Recompute framing headers right before producing wire bytes
//!
//! # Design Decisions
//! - Caller-supplied headers override the seeded defaults
//! - Content-Length and Set-Cookie are never trusted from callers; they are
//!   derived from the body and cookie map in `build`
//! - One `Set-Cookie` line per cookie
//! - Every line ends with CRLF on the wire

use std::collections::BTreeMap;

use bytes::{BufMut, Bytes, BytesMut};
use http::StatusCode;

use crate::http::headers::Headers;

const CRLF: &[u8] = b"\r\n";
const VERSION: &str = "HTTP/1.1";

/// An HTTP response, mutable until [`Response::build`] turns it into bytes.
#[derive(Debug, Clone)]
pub struct Response {
    status: StatusCode,
    body: Bytes,
    cookies: BTreeMap<String, String>,
    headers: Headers,
}

impl Response {
    /// A `200 OK` `text/html` response with the given body.
    pub fn new(body: impl Into<Bytes>) -> Self {
        let mut headers = Headers::new();
        headers.insert("Content-Type", "text/html");
        headers.insert("Connection", "close");
        Self {
            status: StatusCode::OK,
            body: body.into(),
            cookies: BTreeMap::new(),
            headers,
        }
    }

    /// `404 Not Found` with the canonical body.
    pub fn not_found() -> Self {
        Self::new("404 Not Found").with_status(StatusCode::NOT_FOUND)
    }

    /// `500 Internal Server Error`, optionally followed by diagnostic detail.
    pub fn internal_error(detail: Option<&str>) -> Self {
        let body = match detail {
            Some(detail) => format!("500 Internal Server Error:\n\n{detail}"),
            None => "500 Internal Server Error".to_string(),
        };
        Self::new(body).with_status(StatusCode::INTERNAL_SERVER_ERROR)
    }

    pub fn with_status(mut self, status: StatusCode) -> Self {
        self.status = status;
        self
    }

    pub fn with_content_type(mut self, content_type: impl Into<String>) -> Self {
        self.headers.insert("Content-Type", content_type);
        self
    }

    pub fn with_cookie(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.cookies.insert(name.into(), value.into());
        self
    }

    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(name, value);
        self
    }

    /// Overlay caller-supplied headers on top of the current ones.
    pub fn with_headers(mut self, headers: &Headers) -> Self {
        self.headers.extend(headers);
        self
    }

    pub fn status(&self) -> StatusCode {
        self.status
    }

    pub fn body(&self) -> &Bytes {
        &self.body
    }

    pub fn headers(&self) -> &Headers {
        &self.headers
    }

    pub fn cookies(&self) -> &BTreeMap<String, String> {
        &self.cookies
    }

    pub fn set_body(&mut self, body: impl Into<Bytes>) {
        self.body = body.into();
    }

    pub fn set_cookie(&mut self, name: impl Into<String>, value: impl Into<String>) {
        self.cookies.insert(name.into(), value.into());
    }

    pub fn headers_mut(&mut self) -> &mut Headers {
        &mut self.headers
    }

    /// The status line without the protocol version, e.g. `200 OK`.
    pub fn status_line(&self) -> String {
        match self.status.canonical_reason() {
            Some(reason) => format!("{} {}", self.status.as_u16(), reason),
            None => self.status.as_u16().to_string(),
        }
    }

    /// Recompute framing headers and serialize to wire bytes.
    pub fn build(mut self) -> Bytes {
        self.headers.remove("Set-Cookie");
        self.headers
            .insert("Content-Length", self.body.len().to_string());

        let mut out = BytesMut::with_capacity(128 + self.body.len());
        out.put_slice(VERSION.as_bytes());
        out.put_u8(b' ');
        out.put_slice(self.status_line().as_bytes());
        out.put_slice(CRLF);
        for (name, value) in self.headers.iter() {
            put_header(&mut out, name, value);
        }
        for (name, value) in &self.cookies {
            put_header(&mut out, "Set-Cookie", &format!("{name}={value}"));
        }
        out.put_slice(CRLF);
        out.put_slice(&self.body);
        out.freeze()
    }
}

fn put_header(out: &mut BytesMut, name: &str, value: &str) {
    out.put_slice(name.as_bytes());
    out.put_slice(b": ");
    out.put_slice(value.as_bytes());
    out.put_slice(CRLF);
}
