//! Configuration management subsystem.
//!
//! # Data Flow
//! ```text
//! config file (TOML)
//!     → loader.rs (read & deserialize)
//!     → validation.rs (semantic checks)
//!     → ServeConfig (validated, immutable)
//!     → binary builds listeners, router and server settings from it
//! ```
//!
//! # Design Decisions
//! - Config is immutable once loaded; source changes restart the process
//! - All fields have defaults to allow minimal configs
//! - Validation separates syntactic (serde) from semantic checks

pub mod loader;
pub mod schema;
pub mod validation;

pub use loader::{load_config, parse_config, ConfigError};
pub use schema::{
    AutoReloadConfig, ClientAuth, ListenerConfig, LoggingConfig, ProxyConfig, ServeConfig,
    ServerConfig, StaticFilesConfig, TlsConfig,
};
pub use validation::{validate_config, ValidationError};
