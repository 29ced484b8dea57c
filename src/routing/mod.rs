//! Routing subsystem.
//!
//! # Data Flow
//! ```text
//! Parsed Request (method, path, headers)
//!     → router.rs (own routes, in registration order)
//!         → pattern.rs (literal / typed segment match under accumulated prefix)
//!         → types.rs (coerce parameters via the root TypeRegistry)
//!     → router.rs (mounts, in insertion order)
//!         → matcher.rs (guard: default prefix check or custom predicate)
//!         → subrouter (recursive) | proxy.rs (forward to upstream)
//!     → static_files.rs (fallback under the static prefix)
//!     → Return: RouteMatch or None (404)
//!
//! Publication:
//!     Router built at startup
//!     → handle.rs (ArcSwap, snapshot per accepted connection)
//! ```
//!
//! # Design Decisions
//! - Router is immutable while serving; replacement is an atomic swap
//! - No regex; segment-by-segment comparison only
//! - First match wins, routes before mounts before static files

pub mod handle;
pub mod matcher;
pub mod pattern;
pub mod proxy;
pub mod router;
pub mod static_files;
pub mod types;

pub use handle::RouterHandle;
pub use matcher::{AndMatcher, Guard, HostMatcher, Matcher, PathPrefixMatcher};
pub use pattern::Pattern;
pub use proxy::{HeaderOverrides, ProxyError, ProxyRouter};
pub use router::{MountTarget, Route, RouteMatch, Router};
pub use static_files::StaticFiles;
pub use types::{ParamError, ParamParser, ParamValue, Params, TypeRegistry};
