//! Configuration validation.
//!
//! # Responsibilities
//! - Semantic validation (serde handles syntactic)
//! - Validate value ranges (connection limit, buffer sizes)
//! - Detect conflicting listeners
//! - Check that referenced TLS files exist
//! - Check proxy upstreams and mount paths
//!
//! # Design Decisions
//! - Returns all validation errors, not just first
//! - Validation is pure function: ServeConfig → Result<(), Vec<ValidationError>>
//! - Runs before config is accepted into the system

use std::collections::HashSet;
use std::path::Path;

use url::Url;

use crate::config::schema::{ClientAuth, ServeConfig};

/// A single semantic problem, tagged with the offending field.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{field}: {message}")]
pub struct ValidationError {
    pub field: String,
    pub message: String,
}

impl ValidationError {
    fn new(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            message: message.into(),
        }
    }
}

/// Check a parsed configuration, collecting every problem.
pub fn validate_config(config: &ServeConfig) -> Result<(), Vec<ValidationError>> {
    let mut errors = Vec::new();

    if config.server.max_connections == 0 {
        errors.push(ValidationError::new("server.max_connections", "must be greater than zero"));
    }
    if config.server.max_request_bytes == 0 {
        errors.push(ValidationError::new("server.max_request_bytes", "must be greater than zero"));
    }
    if config.server.read_timeout_ms == 0 {
        errors.push(ValidationError::new("server.read_timeout_ms", "must be greater than zero"));
    }
    if config.server.request_timeout_ms < config.server.read_timeout_ms {
        errors.push(ValidationError::new(
            "server.request_timeout_ms",
            "must be at least server.read_timeout_ms",
        ));
    }

    let mut seen = HashSet::new();
    for (index, listener) in config.listeners.iter().enumerate() {
        let field = format!("listeners[{index}]");
        if listener.buffer_size == 0 {
            errors.push(ValidationError::new(format!("{field}.buffer_size"), "must be greater than zero"));
        }
        if listener.port != 0 && !seen.insert(listener.authority()) {
            errors.push(ValidationError::new(
                field.clone(),
                format!("duplicate listener {}", listener.authority()),
            ));
        }
        if let Some(tls) = &listener.tls {
            check_file(&mut errors, &format!("{field}.tls.cert_path"), &tls.cert_path);
            check_file(&mut errors, &format!("{field}.tls.key_path"), &tls.key_path);
            match (&tls.ca_path, tls.client_auth) {
                (Some(ca_path), _) => check_file(&mut errors, &format!("{field}.tls.ca_path"), ca_path),
                (None, ClientAuth::None) => {}
                (None, _) => errors.push(ValidationError::new(
                    format!("{field}.tls.ca_path"),
                    "required when client_auth is optional or required",
                )),
            }
        }
    }

    if !config.static_files.prefix.starts_with('/') {
        errors.push(ValidationError::new("static_files.prefix", "must start with '/'"));
    }

    for (index, proxy) in config.proxies.iter().enumerate() {
        let field = format!("proxies[{index}]");
        if !proxy.mount.starts_with('/') {
            errors.push(ValidationError::new(format!("{field}.mount"), "must start with '/'"));
        }
        if let Err(e) = Url::parse(&proxy.upstream) {
            errors.push(ValidationError::new(
                format!("{field}.upstream"),
                format!("invalid URL {:?}: {e}", proxy.upstream),
            ));
        }
    }

    if !matches!(config.logging.format.to_ascii_lowercase().as_str(), "pretty" | "json") {
        errors.push(ValidationError::new(
            "logging.format",
            format!("unknown format {:?} (expected pretty or json)", config.logging.format),
        ));
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}

fn check_file(errors: &mut Vec<ValidationError>, field: &str, path: &Path) {
    if !path.is_file() {
        errors.push(ValidationError::new(field, format!("file not found: {}", path.display())));
    }
}
