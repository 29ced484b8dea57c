//! Mount guards.
//!
//! A mount is only consulted when its guard accepts the request. Guards
//! can compare the `Host` header (ignoring case) or a path prefix (exact
//! case), can be stacked with [`AndMatcher`], and any
//! `Fn(&Request) -> bool` closure works as one.

use std::sync::Arc;

use crate::http::request::Request;

/// Predicate evaluated before delegating to a mount.
pub trait Matcher: Send + Sync {
    /// Returns true if the request matches this condition.
    fn matches(&self, req: &Request) -> bool;
}

impl<F> Matcher for F
where
    F: Fn(&Request) -> bool + Send + Sync,
{
    fn matches(&self, req: &Request) -> bool {
        self(req)
    }
}

/// Shared guard handle stored next to a mount.
pub type Guard = Arc<dyn Matcher>;

/// Accepts requests whose `Host` header equals the configured host.
#[derive(Debug, Clone)]
pub struct HostMatcher {
    host: String,
}

impl HostMatcher {
    pub fn new(host: impl Into<String>) -> Self {
        Self {
            host: host.into().to_ascii_lowercase(),
        }
    }
}

impl Matcher for HostMatcher {
    fn matches(&self, req: &Request) -> bool {
        req.header("host")
            .is_some_and(|host| host.eq_ignore_ascii_case(&self.host))
    }
}

/// Accepts requests whose path starts with `prefix`.
#[derive(Debug, Clone)]
pub struct PathPrefixMatcher {
    prefix: String,
}

impl PathPrefixMatcher {
    pub fn new(prefix: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
        }
    }
}

impl Matcher for PathPrefixMatcher {
    fn matches(&self, req: &Request) -> bool {
        req.path().starts_with(&self.prefix)
    }
}

/// Accepts a request only when every inner guard does.
pub struct AndMatcher {
    matchers: Vec<Guard>,
}

impl AndMatcher {
    pub fn new(matchers: Vec<Guard>) -> Self {
        Self { matchers }
    }
}

impl Matcher for AndMatcher {
    fn matches(&self, req: &Request) -> bool {
        self.matchers.iter().all(|guard| guard.matches(req))
    }
}
