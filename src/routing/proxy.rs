//! Reverse-proxy routing leaf.
//!
//! # Responsibilities
//! - Forward matched traffic to an external origin
//! - Rewrite the path suffix through a caller-supplied function
//! - Apply per-path (or wildcard `*`) header overrides in both directions
//! - Relay upstream status and body unchanged
//!
//! # Design Decisions
//! - A proxy never returns a local handler; it builds a forwarding handler
//!   bound to the mount point it was reached through
//! - Encoding and hop-by-hop headers are stripped from the upstream response;
//!   framing is recomputed by the response builder
//! - `Accept-Encoding` is not forwarded so relayed bodies are never encoded
//! - Upstream connection failures map to 502 Bad Gateway
//! - Upstream `Set-Cookie` lines become response cookies (attributes kept),
//!   since the builder owns that header

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use bytes::Bytes;
use http::StatusCode;
use url::Url;

use crate::http::handler::{BoxFuture, Handler, HandlerResult, Reply};
use crate::http::headers::Headers;
use crate::http::request::Request;
use crate::http::response::Response;
use crate::routing::types::Params;

/// Request headers never copied to the upstream request.
const SKIPPED_REQUEST_HEADERS: &[&str] = &["host", "content-length", "connection", "accept-encoding"];

/// Upstream response headers never relayed to the client.
const SKIPPED_RESPONSE_HEADERS: &[&str] = &[
    "content-encoding",
    "transfer-encoding",
    "connection",
    "content-length",
    "set-cookie",
];

/// Wildcard key for header overrides.
pub const ANY_PATH: &str = "*";

/// Errors constructing a proxy.
#[derive(Debug, thiserror::Error)]
pub enum ProxyError {
    #[error("invalid upstream url {url:?}: {source}")]
    InvalidUpstream {
        url: String,
        #[source]
        source: url::ParseError,
    },
    #[error("mount path {0:?} must start with '/'")]
    InvalidMount(String),
}

/// Rewrites the forwarded path suffix.
pub type UrlRewrite = Arc<dyn Fn(&str) -> String + Send + Sync>;

/// Rewrites the relayed response body.
pub type BodyRewrite = Arc<dyn Fn(Bytes, &Url) -> Bytes + Send + Sync>;

/// Header overrides keyed by exact (rewritten) path or [`ANY_PATH`].
#[derive(Debug, Clone, Default)]
pub struct HeaderOverrides(HashMap<String, Headers>);

impl HeaderOverrides {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, path: impl Into<String>, headers: Headers) -> &mut Self {
        self.0.insert(path.into(), headers);
        self
    }

    /// Overrides for `path`, falling back to the wildcard entry.
    pub fn for_path(&self, path: &str) -> Option<&Headers> {
        self.0.get(path).or_else(|| self.0.get(ANY_PATH))
    }
}

impl FromIterator<(String, Headers)> for HeaderOverrides {
    fn from_iter<I: IntoIterator<Item = (String, Headers)>>(iter: I) -> Self {
        Self(iter.into_iter().collect())
    }
}

struct ProxyInner {
    name: String,
    internal_path: String,
    external_url: Url,
    request_headers: HeaderOverrides,
    response_headers: HeaderOverrides,
    url_rewrite: UrlRewrite,
    body_rewrite: BodyRewrite,
    client: reqwest::Client,
}

/// Forwards everything under its mount path to an external origin.
#[derive(Clone)]
pub struct ProxyRouter {
    inner: Arc<ProxyInner>,
}

impl ProxyRouter {
    pub fn new(
        name: impl Into<String>,
        internal_path: impl Into<String>,
        external_url: &str,
    ) -> Result<Self, ProxyError> {
        let internal_path = internal_path.into();
        if !internal_path.starts_with('/') {
            return Err(ProxyError::InvalidMount(internal_path));
        }
        let external_url = Url::parse(external_url).map_err(|source| ProxyError::InvalidUpstream {
            url: external_url.to_string(),
            source,
        })?;

        Ok(Self {
            inner: Arc::new(ProxyInner {
                name: name.into(),
                internal_path: internal_path.trim_end_matches('/').to_string(),
                external_url,
                request_headers: HeaderOverrides::default(),
                response_headers: HeaderOverrides::default(),
                url_rewrite: Arc::new(|path: &str| path.to_string()),
                body_rewrite: Arc::new(|body: Bytes, _: &Url| body),
                client: reqwest::Client::new(),
            }),
        })
    }

    pub fn with_request_headers(self, overrides: HeaderOverrides) -> Self {
        self.update(|inner| inner.request_headers = overrides)
    }

    pub fn with_response_headers(self, overrides: HeaderOverrides) -> Self {
        self.update(|inner| inner.response_headers = overrides)
    }

    pub fn with_url_rewrite<F>(self, rewrite: F) -> Self
    where
        F: Fn(&str) -> String + Send + Sync + 'static,
    {
        self.update(|inner| inner.url_rewrite = Arc::new(rewrite))
    }

    pub fn with_body_rewrite<F>(self, rewrite: F) -> Self
    where
        F: Fn(Bytes, &Url) -> Bytes + Send + Sync + 'static,
    {
        self.update(|inner| inner.body_rewrite = Arc::new(rewrite))
    }

    /// Use a preconfigured upstream client (timeouts, TLS roots, pooling).
    pub fn with_client(self, client: reqwest::Client) -> Self {
        self.update(|inner| inner.client = client)
    }

    pub fn name(&self) -> &str {
        &self.inner.name
    }

    pub fn internal_path(&self) -> &str {
        &self.inner.internal_path
    }

    pub fn external_url(&self) -> &Url {
        &self.inner.external_url
    }

    /// Full mount path below `parent_prefix`.
    pub(crate) fn mount_path(&self, parent_prefix: &str) -> String {
        format!("{}{}", parent_prefix.trim_end_matches('/'), self.inner.internal_path)
    }

    /// Build the forwarding handler for a request reached through `mount_path`.
    pub(crate) fn forwarder(&self, mount_path: String) -> ProxyForwarder {
        ProxyForwarder {
            inner: Arc::clone(&self.inner),
            mount_path,
        }
    }

    fn update(self, apply: impl FnOnce(&mut ProxyInner)) -> Self {
        let mut inner = match Arc::try_unwrap(self.inner) {
            Ok(inner) => inner,
            Err(shared) => ProxyInner {
                name: shared.name.clone(),
                internal_path: shared.internal_path.clone(),
                external_url: shared.external_url.clone(),
                request_headers: shared.request_headers.clone(),
                response_headers: shared.response_headers.clone(),
                url_rewrite: Arc::clone(&shared.url_rewrite),
                body_rewrite: Arc::clone(&shared.body_rewrite),
                client: shared.client.clone(),
            },
        };
        apply(&mut inner);
        Self {
            inner: Arc::new(inner),
        }
    }
}

impl fmt::Debug for ProxyRouter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProxyRouter")
            .field("name", &self.inner.name)
            .field("internal_path", &self.inner.internal_path)
            .field("external_url", &self.inner.external_url.as_str())
            .finish()
    }
}

/// Handler that performs one forwarded exchange.
pub struct ProxyForwarder {
    inner: Arc<ProxyInner>,
    mount_path: String,
}

impl ProxyForwarder {
    /// The rewritten suffix and full upstream URL for `request`.
    fn target(&self, request: &Request) -> (String, String) {
        let suffix = request
            .path()
            .strip_prefix(self.mount_path.as_str())
            .unwrap_or(request.path());
        let mut rewritten = (self.inner.url_rewrite)(suffix);
        if !rewritten.starts_with('/') {
            rewritten.insert(0, '/');
        }

        let base = self.inner.external_url.as_str().trim_end_matches('/');
        let mut target = format!("{base}{rewritten}");
        if !request.query().is_empty() {
            target.push('?');
            target.push_str(request.query());
        }
        (rewritten, target)
    }
}

impl Handler for ProxyForwarder {
    fn call(&self, request: Request, _params: Params) -> BoxFuture<HandlerResult> {
        let inner = Arc::clone(&self.inner);
        let (rewritten, target) = self.target(&request);

        Box::pin(async move {
            let method = reqwest::Method::from_bytes(request.method().as_bytes())?;

            let mut forwarded = Headers::new();
            for (name, value) in request.headers().iter() {
                if !SKIPPED_REQUEST_HEADERS.contains(&name.to_ascii_lowercase().as_str()) {
                    forwarded.insert(name, value);
                }
            }
            if let Some(overrides) = inner.request_headers.for_path(&rewritten) {
                forwarded.extend(overrides);
            }

            let mut upstream = inner
                .client
                .request(method, &target)
                .body(request.body().clone());
            for (name, value) in forwarded.iter() {
                upstream = upstream.header(name, value);
            }

            tracing::debug!(proxy = %inner.name, method = %request.method(), target = %target, "Forwarding request");

            let response = match upstream.send().await {
                Ok(response) => response,
                Err(err) => {
                    tracing::warn!(proxy = %inner.name, target = %target, error = %err, "Upstream request failed");
                    return Ok(Reply::Response(
                        Response::new("502 Bad Gateway").with_status(StatusCode::BAD_GATEWAY),
                    ));
                }
            };

            let status = response.status();
            let mut relayed = Headers::new();
            for (name, value) in response.headers() {
                if SKIPPED_RESPONSE_HEADERS.contains(&name.as_str()) {
                    continue;
                }
                if let Ok(value) = value.to_str() {
                    relayed.insert(name.as_str(), value);
                }
            }
            if let Some(overrides) = inner.response_headers.for_path(&rewritten) {
                relayed.extend(overrides);
            }
            let cookies: Vec<(String, String)> = response
                .headers()
                .get_all(http::header::SET_COOKIE)
                .iter()
                .filter_map(|value| value.to_str().ok())
                .filter_map(split_set_cookie)
                .collect();

            let body = response.bytes().await?;
            let target_url = Url::parse(&target)?;
            let body = (inner.body_rewrite)(body, &target_url);

            tracing::debug!(proxy = %inner.name, status = %status, bytes = body.len(), "Upstream responded");

            let mut relayed_response = Response::new(body)
                .with_status(StatusCode::from_u16(status.as_u16())?)
                .with_headers(&relayed);
            for (name, value) in cookies {
                relayed_response.set_cookie(name, value);
            }
            Ok(Reply::Response(relayed_response))
        })
    }
}

/// Split an upstream `Set-Cookie` value into its name and everything after
/// the first `=`, attributes included.
fn split_set_cookie(value: &str) -> Option<(String, String)> {
    let (name, rest) = value.split_once('=')?;
    let name = name.trim();
    (!name.is_empty()).then(|| (name.to_string(), rest.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request(raw: &str) -> Request {
        Request::parse(raw.as_bytes()).unwrap()
    }

    #[test]
    fn rejects_bad_configuration() {
        assert!(matches!(
            ProxyRouter::new("p", "/proxy", "not a url"),
            Err(ProxyError::InvalidUpstream { .. })
        ));
        assert!(matches!(
            ProxyRouter::new("p", "proxy", "http://localhost/"),
            Err(ProxyError::InvalidMount(_))
        ));
    }

    #[test]
    fn target_joins_base_suffix_and_query() {
        let proxy = ProxyRouter::new("p", "/proxy", "https://api.example.com/todos/").unwrap();
        let forwarder = proxy.forwarder(proxy.mount_path(""));

        let (suffix, target) = forwarder.target(&request("GET /proxy/1 HTTP/1.1\r\n\r\n"));
        assert_eq!(suffix, "/1/");
        assert_eq!(target, "https://api.example.com/todos/1/");

        let (_, target) = forwarder.target(&request("GET /proxy/?page=2 HTTP/1.1\r\n\r\n"));
        assert_eq!(target, "https://api.example.com/todos/?page=2");
    }

    #[test]
    fn rewrite_applies_to_suffix_under_nested_mount() {
        let proxy = ProxyRouter::new("p", "/proxy", "http://upstream:9000")
            .unwrap()
            .with_url_rewrite(|path| path.trim_end_matches('/').to_string());
        let forwarder = proxy.forwarder(proxy.mount_path("/v1"));

        let (suffix, target) = forwarder.target(&request("GET /v1/proxy/users/7 HTTP/1.1\r\n\r\n"));
        assert_eq!(suffix, "/users/7");
        assert_eq!(target, "http://upstream:9000/users/7");
    }

    #[test]
    fn overrides_prefer_exact_paths() {
        let mut overrides = HeaderOverrides::new();
        overrides
            .insert(ANY_PATH, [("X-Any", "1")].into_iter().collect())
            .insert("/special/", [("X-Special", "1")].into_iter().collect());

        assert!(overrides.for_path("/special/").unwrap().contains("X-Special"));
        assert!(overrides.for_path("/other/").unwrap().contains("X-Any"));
        assert!(HeaderOverrides::new().for_path("/").is_none());
    }

    #[test]
    fn set_cookie_values_keep_their_attributes() {
        assert_eq!(
            split_set_cookie("sid=abc; Path=/; HttpOnly"),
            Some(("sid".to_string(), "abc; Path=/; HttpOnly".to_string()))
        );
        assert_eq!(split_set_cookie(" =x"), None);
        assert_eq!(split_set_cookie("flag"), None);

        let mut response = Response::new("x");
        for (name, value) in ["sid=abc; Path=/", "theme=dark"].into_iter().filter_map(split_set_cookie) {
            response.set_cookie(name, value);
        }
        let wire = String::from_utf8(response.build().to_vec()).unwrap();
        assert!(wire.contains("Set-Cookie: sid=abc; Path=/\r\n"));
        assert!(wire.contains("Set-Cookie: theme=dark\r\n"));
    }

    #[test]
    fn builders_keep_identity() {
        let proxy = ProxyRouter::new("api", "/api/", "http://localhost:1")
            .unwrap()
            .with_body_rewrite(|body, _| body);
        assert_eq!(proxy.name(), "api");
        assert_eq!(proxy.internal_path(), "/api");
        assert_eq!(proxy.external_url().as_str(), "http://localhost:1/");
    }
}
