//! Static file fallback.
//!
//! A router maps a local directory under a URL prefix. Requests below the
//! prefix that no route claimed are answered from disk, with the content
//! type guessed from the file extension. Missing files are a 404.

use std::path::{Component, Path, PathBuf};

use crate::http::handler::{BoxFuture, Handler, HandlerResult, Reply};
use crate::http::request::Request;
use crate::http::response::Response;
use crate::routing::types::Params;

/// Directory served under a URL prefix.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StaticFiles {
    dir: PathBuf,
    prefix: String,
}

impl StaticFiles {
    pub fn new(dir: impl Into<PathBuf>, prefix: impl Into<String>) -> Self {
        Self {
            dir: dir.into(),
            prefix: prefix.into().trim_end_matches('/').to_string(),
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    /// Resolve the file path below the prefix for `path`, if it falls under
    /// `mount_prefix + prefix`.
    pub(crate) fn relative_path<'p>(&self, mount_prefix: &str, path: &'p str) -> Option<&'p str> {
        let full_prefix = format!("{}{}", mount_prefix.trim_end_matches('/'), self.prefix);
        let rest = path.strip_prefix(full_prefix.as_str())?;
        Some(rest.trim_start_matches('/').trim_end_matches('/'))
    }

    pub(crate) fn handler(&self, relative: &str) -> StaticFile {
        StaticFile {
            dir: self.dir.clone(),
            relative: relative.to_string(),
        }
    }
}

impl Default for StaticFiles {
    fn default() -> Self {
        Self::new("static", "/static")
    }
}

/// Handler answering one static file request.
#[derive(Debug, Clone)]
pub struct StaticFile {
    dir: PathBuf,
    relative: String,
}

impl StaticFile {
    fn local_path(&self) -> Option<PathBuf> {
        let relative = Path::new(&self.relative);
        let escapes = relative
            .components()
            .any(|c| !matches!(c, Component::Normal(_)));
        if self.relative.is_empty() || escapes {
            return None;
        }
        Some(self.dir.join(relative))
    }
}

impl Handler for StaticFile {
    fn call(&self, _request: Request, _params: Params) -> BoxFuture<HandlerResult> {
        let local_path = self.local_path();
        Box::pin(async move {
            let Some(local_path) = local_path else {
                return Ok(Reply::Response(Response::not_found()));
            };
            match tokio::fs::read(&local_path).await {
                Ok(contents) => {
                    let mut response = Response::new(contents);
                    if let Some(mime) = mime_guess::from_path(&local_path).first_raw() {
                        response = response.with_content_type(mime);
                    }
                    tracing::debug!(path = %local_path.display(), "Serving static file");
                    Ok(Reply::Response(response))
                }
                Err(err) => {
                    tracing::debug!(path = %local_path.display(), error = %err, "Static file unavailable");
                    Ok(Reply::Response(Response::not_found()))
                }
            }
        })
    }
}
