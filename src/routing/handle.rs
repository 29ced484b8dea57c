//! Atomic router publication.
//!
//! The server reads the current router once per accepted connection; a new
//! router may be installed at any time. Workers keep the snapshot they were
//! spawned with, so a swap never changes the routing of a request already in
//! flight.

use std::sync::Arc;

use arc_swap::ArcSwap;

use crate::routing::router::Router;

/// Shared, swappable reference to the active [`Router`].
#[derive(Clone)]
pub struct RouterHandle {
    current: Arc<ArcSwap<Router>>,
}

impl RouterHandle {
    pub fn new(router: Router) -> Self {
        Self {
            current: Arc::new(ArcSwap::from_pointee(router)),
        }
    }

    /// Replace the active router. Connections accepted afterwards use it.
    pub fn install(&self, router: Router) {
        tracing::info!(router = %router.name(), routes = router.routes().len(), "Installing new router");
        self.current.store(Arc::new(router));
    }

    /// The router currently in effect.
    pub fn snapshot(&self) -> Arc<Router> {
        self.current.load_full()
    }
}

impl std::fmt::Debug for RouterHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RouterHandle")
            .field("router", &self.current.load().name())
            .finish()
    }
}
