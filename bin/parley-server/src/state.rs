//! Shared application state injected into every Axum handler.

use std::sync::Arc;

use crate::completion::CompletionClient;
use crate::config::Config;
use crate::entities::SqliteStore;

/// State shared across all HTTP handlers.
///
/// Built once in `main` and handed to the router; nothing here is global.
#[derive(Clone)]
pub struct AppState {
    /// Server configuration (env-derived).
    pub config: Arc<Config>,
    /// Append-only conversation-turn store.
    pub store: Arc<SqliteStore>,
    /// Chat-completion provider.
    pub completion: Arc<dyn CompletionClient>,
}

impl std::fmt::Debug for AppState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AppState")
            .field("config", &self.config)
            .field("store", &self.store)
            .finish_non_exhaustive()
    }
}
