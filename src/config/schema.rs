//! Configuration schema definitions.
//!
//! This module defines the complete configuration structure for the server.
//! All types derive Serde traits for deserialization from config files.

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Root configuration.
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
#[serde(default)]
pub struct ServeConfig {
    /// Accept loop, worker and lifecycle settings.
    pub server: ServerConfig,

    /// Endpoints to bind. Empty means one plain listener on `0.0.0.0:8080`.
    pub listeners: Vec<ListenerConfig>,

    /// Static file fallback of the root router.
    pub static_files: StaticFilesConfig,

    /// Reverse proxies mounted on the root router, in order.
    pub proxies: Vec<ProxyConfig>,

    /// Logging settings.
    pub logging: LoggingConfig,
}

impl ServeConfig {
    /// Configured listeners, or the single default one.
    pub fn effective_listeners(&self) -> Vec<ListenerConfig> {
        if self.listeners.is_empty() {
            vec![ListenerConfig::default()]
        } else {
            self.listeners.clone()
        }
    }
}

/// Server-wide settings.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Maximum concurrent connections (admission control).
    pub max_connections: usize,

    /// Include error details in 500 bodies.
    pub debug: bool,

    /// Idle window for one socket read.
    pub read_timeout_ms: u64,

    /// Deadline for receiving a whole request.
    pub request_timeout_ms: u64,

    /// Upper bound for a TLS handshake.
    pub handshake_timeout_ms: u64,

    /// Largest request accepted, head and body together.
    pub max_request_bytes: usize,

    /// Pause after every accepted connection.
    pub accept_pause_ms: u64,

    /// Window in which a second interrupt stops the server.
    pub shutdown_grace_secs: u64,

    /// Restart on source changes.
    pub auto_reload: AutoReloadConfig,
}

impl ServerConfig {
    pub fn read_timeout(&self) -> Duration {
        Duration::from_millis(self.read_timeout_ms)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }

    pub fn handshake_timeout(&self) -> Duration {
        Duration::from_millis(self.handshake_timeout_ms)
    }

    pub fn accept_pause(&self) -> Duration {
        Duration::from_millis(self.accept_pause_ms)
    }

    pub fn shutdown_grace(&self) -> Duration {
        Duration::from_secs(self.shutdown_grace_secs)
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            max_connections: 1024,
            debug: false,
            read_timeout_ms: 200,
            request_timeout_ms: 10_000,
            handshake_timeout_ms: 10_000,
            max_request_bytes: 1024 * 1024, // 1MB
            accept_pause_ms: 1,
            shutdown_grace_secs: 5,
            auto_reload: AutoReloadConfig::default(),
        }
    }
}

/// Process restart on file changes.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct AutoReloadConfig {
    pub enabled: bool,

    /// Directory watched recursively.
    pub watch_dir: PathBuf,

    /// File extensions that trigger a restart.
    pub extensions: Vec<String>,
}

impl Default for AutoReloadConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            watch_dir: PathBuf::from("src"),
            extensions: vec!["rs".to_string(), "toml".to_string()],
        }
    }
}

/// One listening endpoint.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
#[serde(default)]
pub struct ListenerConfig {
    /// Host name or address; `0.0.0.0` and `::` bind every interface.
    pub host: String,

    pub port: u16,

    /// Size of a single socket read.
    pub buffer_size: usize,

    /// Pending connection queue handed to `listen(2)`.
    pub backlog: u32,

    /// Optional TLS configuration.
    pub tls: Option<TlsConfig>,
}

impl ListenerConfig {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
            ..Self::default()
        }
    }

    pub fn with_tls(mut self, tls: TlsConfig) -> Self {
        self.tls = Some(tls);
        self
    }

    /// `host:port`, bracketing IPv6 literals.
    pub fn authority(&self) -> String {
        if self.host.contains(':') {
            format!("[{}]:{}", self.host, self.port)
        } else {
            format!("{}:{}", self.host, self.port)
        }
    }
}

impl Default for ListenerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8080,
            buffer_size: 1024,
            backlog: 1024,
            tls: None,
        }
    }
}

/// TLS configuration for a listener.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
pub struct TlsConfig {
    /// Path to certificate chain (PEM).
    pub cert_path: PathBuf,

    /// Path to private key file (PEM).
    pub key_path: PathBuf,

    #[serde(default)]
    pub client_auth: ClientAuth,

    /// CA bundle used to verify client certificates (PEM).
    #[serde(default)]
    pub ca_path: Option<PathBuf>,

    /// Allowed cipher suites by rustls name. Empty keeps the defaults.
    #[serde(default)]
    pub ciphers: Vec<String>,
}

impl TlsConfig {
    pub fn new(cert_path: impl Into<PathBuf>, key_path: impl Into<PathBuf>) -> Self {
        Self {
            cert_path: cert_path.into(),
            key_path: key_path.into(),
            client_auth: ClientAuth::None,
            ca_path: None,
            ciphers: Vec::new(),
        }
    }
}

/// Client certificate requirement.
#[derive(Debug, Clone, Copy, Default, Deserialize, Serialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ClientAuth {
    #[default]
    None,
    Optional,
    Required,
}

/// Static files served by the root router.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct StaticFilesConfig {
    pub dir: PathBuf,
    pub prefix: String,
}

impl Default for StaticFilesConfig {
    fn default() -> Self {
        Self {
            dir: PathBuf::from("static"),
            prefix: "/static".to_string(),
        }
    }
}

/// A reverse proxy mount.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ProxyConfig {
    /// Identifier used in logs.
    pub name: String,

    /// Internal mount path (e.g., "/api").
    pub mount: String,

    /// External base URL.
    pub upstream: String,

    /// Request header overrides keyed by path, `*` for every path.
    #[serde(default)]
    pub request_headers: BTreeMap<String, BTreeMap<String, String>>,

    /// Response header overrides keyed by path, `*` for every path.
    #[serde(default)]
    pub response_headers: BTreeMap<String, BTreeMap<String, String>>,
}

/// Logging settings.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Default filter directive; `RUST_LOG` takes precedence.
    pub level: String,

    /// `pretty` or `json`.
    pub format: String,
}

impl LoggingConfig {
    pub fn is_json(&self) -> bool {
        self.format.eq_ignore_ascii_case("json")
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: "pretty".to_string(),
        }
    }
}
