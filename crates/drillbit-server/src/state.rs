use std::sync::Arc;

use drillbit_core::{config::Config, ReportEngine};

/// Shared application state injected into every Axum handler via
/// [`axum::extract::State`].
///
/// The engine owns both store handles; requests share it read-only.
pub struct AppState {
    pub engine: Arc<ReportEngine>,

    /// Parsed configuration, loaded once at startup from environment variables.
    pub config: Arc<Config>,
}

impl AppState {
    pub fn new(engine: ReportEngine, config: Config) -> Self {
        Self {
            engine: Arc::new(engine),
            config: Arc::new(config),
        }
    }
}
