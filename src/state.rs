//! Application state management

use std::sync::Arc;

use crate::config::Config;
use crate::upload::SessionManager;

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    inner: Arc<AppStateInner>,
}

struct AppStateInner {
    config: Config,
    sessions: SessionManager,
}

impl AppState {
    pub fn new(config: Config, sessions: SessionManager) -> Self {
        Self {
            inner: Arc::new(AppStateInner { config, sessions }),
        }
    }

    /// Get the configuration
    pub fn config(&self) -> &Config {
        &self.inner.config
    }

    /// Get the upload session manager
    pub fn sessions(&self) -> &SessionManager {
        &self.inner.sessions
    }
}
