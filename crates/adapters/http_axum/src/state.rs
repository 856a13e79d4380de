//! Shared application state for axum handlers.

use std::sync::Arc;

use autoedge_app::agent::Agent;

/// Application state shared across all axum handlers.
///
/// Generic over the storage, remote platform and clock so handlers stay
/// statically dispatched. `Clone` is implemented manually: only the `Arc` is
/// cloned, the agent itself does not need to be `Clone`.
pub struct AppState<S, R, C> {
    pub agent: Arc<Agent<S, R, C>>,
}

impl<S, R, C> Clone for AppState<S, R, C> {
    fn clone(&self) -> Self {
        Self {
            agent: Arc::clone(&self.agent),
        }
    }
}

impl<S, R, C> AppState<S, R, C> {
    /// Wrap an agent already shared with background tasks.
    pub fn new(agent: Arc<Agent<S, R, C>>) -> Self {
        Self { agent }
    }
}
