//! Request parsing.
//!
//! # Responsibilities
//! - Turn the raw bytes of one request into a structured [`Request`]
//! - Normalize the routing path (absolute, trailing slash)
//! - Expose the derived view: query string, cookies, raw body
//! - Tell the connection layer when a buffered request is complete
//!
//! # Design Decisions
//! - The head must be UTF-8; the body stays raw bytes
//! - Both CRLF and bare LF terminate lines
//! - A request is immutable once parsed; middleware produces new values

use std::collections::BTreeMap;
use std::net::SocketAddr;
use std::num::IntErrorKind;

use bytes::Bytes;
use serde_json::Value;

use crate::http::headers::Headers;

/// Errors raised while parsing a request head.
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum ParseError {
    #[error("request is empty")]
    Empty,
    #[error("request head is not valid UTF-8")]
    Encoding,
    #[error("malformed request line: {0:?}")]
    RequestLine(String),
    #[error("malformed header line: {0:?}")]
    Header(String),
}

/// A parsed HTTP request.
#[derive(Debug, Clone)]
pub struct Request {
    method: String,
    path: String,
    query: String,
    version: String,
    headers: Headers,
    cookies: BTreeMap<String, String>,
    body: Bytes,
    locals: BTreeMap<String, Value>,
    peer: Option<SocketAddr>,
}

impl Request {
    /// Parse a complete request from raw bytes.
    pub fn parse(raw: &[u8]) -> Result<Self, ParseError> {
        if raw.is_empty() {
            return Err(ParseError::Empty);
        }

        let (head, body) = match find_head_end(raw, 0) {
            Some((head_len, body_start)) => (&raw[..head_len], &raw[body_start..]),
            None => (raw, &raw[raw.len()..]),
        };
        let head = std::str::from_utf8(head).map_err(|_| ParseError::Encoding)?;

        let mut lines = head.split('\n').map(|line| line.trim_end_matches('\r'));
        let request_line = lines.next().unwrap_or_default();
        let (method, target, version) = parse_request_line(request_line)?;

        let mut headers = Headers::new();
        for line in lines {
            if line.is_empty() {
                break;
            }
            let (name, value) = line
                .split_once(':')
                .ok_or_else(|| ParseError::Header(line.to_string()))?;
            if name.is_empty() {
                return Err(ParseError::Header(line.to_string()));
            }
            headers.insert(name, value.trim_start());
        }

        let (path, query) = match target.split_once('?') {
            Some((path, query)) => (path, query),
            None => (target, ""),
        };

        let cookies = headers.get("Cookie").map(parse_cookies).unwrap_or_default();

        Ok(Self {
            method: method.to_string(),
            path: normalize_path(path),
            query: query.to_string(),
            version: version.to_string(),
            headers,
            cookies,
            body: Bytes::copy_from_slice(body),
            locals: BTreeMap::new(),
            peer: None,
        })
    }

    pub fn method(&self) -> &str {
        &self.method
    }

    /// The routing path: absolute and always ending with `/`.
    pub fn path(&self) -> &str {
        &self.path
    }

    /// The raw query string, without the leading `?`.
    pub fn query(&self) -> &str {
        &self.query
    }

    pub fn version(&self) -> &str {
        &self.version
    }

    pub fn headers(&self) -> &Headers {
        &self.headers
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name)
    }

    pub fn cookies(&self) -> &BTreeMap<String, String> {
        &self.cookies
    }

    pub fn cookie(&self, name: &str) -> Option<&str> {
        self.cookies.get(name).map(String::as_str)
    }

    /// The raw request body.
    pub fn body(&self) -> &Bytes {
        &self.body
    }

    /// Address of the client that sent this request, when known.
    pub fn peer(&self) -> Option<SocketAddr> {
        self.peer
    }

    /// A value attached by request middleware.
    pub fn local(&self, key: &str) -> Option<&Value> {
        self.locals.get(key)
    }

    /// Return a copy of this request carrying an extra middleware value.
    pub fn with_local(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.locals.insert(key.into(), value.into());
        self
    }

    pub(crate) fn with_peer(mut self, peer: SocketAddr) -> Self {
        self.peer = Some(peer);
        self
    }
}

/// Total byte length of a request whose head is `head` and whose body
/// starts at `body_start`. Without a `Content-Length` the body is empty.
///
/// `None` when the declared length does not fit in memory at all.
pub(crate) fn frame_length(head: &[u8], body_start: usize) -> Option<usize> {
    let head = String::from_utf8_lossy(head);
    let content_length = head
        .split('\n')
        .skip(1)
        .filter_map(|line| line.trim_end_matches('\r').split_once(':'))
        .filter(|(name, _)| name.trim().eq_ignore_ascii_case("content-length"))
        .filter_map(|(_, value)| parse_length(value.trim()))
        .last()
        .unwrap_or(0);
    body_start.checked_add(content_length)
}

/// Digits too large for `usize` saturate so the caller rejects them.
fn parse_length(value: &str) -> Option<usize> {
    match value.parse::<usize>() {
        Ok(length) => Some(length),
        Err(e) if *e.kind() == IntErrorKind::PosOverflow => Some(usize::MAX),
        Err(_) => None,
    }
}

/// Locate the blank line ending the head, scanning from `from`.
/// Returns `(head length, body start)`.
pub(crate) fn find_head_end(buffer: &[u8], from: usize) -> Option<(usize, usize)> {
    let mut index = from;
    while index < buffer.len() {
        if buffer[index] == b'\n' {
            let rest = &buffer[index + 1..];
            if rest.starts_with(b"\r\n") {
                return Some((index, index + 3));
            }
            if rest.starts_with(b"\n") {
                return Some((index, index + 2));
            }
        }
        index += 1;
    }
    None
}

fn parse_request_line(line: &str) -> Result<(&str, &str, &str), ParseError> {
    let mut parts = line.split(' ').filter(|part| !part.is_empty());
    match (parts.next(), parts.next(), parts.next()) {
        (Some(method), Some(target), Some(version)) => Ok((method, target, version)),
        _ => Err(ParseError::RequestLine(line.to_string())),
    }
}

/// Make a path absolute and trailing-slash terminated.
pub(crate) fn normalize_path(path: &str) -> String {
    let mut normalized = String::with_capacity(path.len() + 2);
    if !path.starts_with('/') {
        normalized.push('/');
    }
    normalized.push_str(path);
    if !normalized.ends_with('/') {
        normalized.push('/');
    }
    normalized
}

fn parse_cookies(header: &str) -> BTreeMap<String, String> {
    header
        .split("; ")
        .filter_map(|pair| pair.split_once('='))
        .map(|(name, value)| (name.trim().to_string(), value.to_string()))
        .collect()
}
