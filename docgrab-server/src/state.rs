//! Shared application state injected into every Axum handler.

use std::sync::Arc;

use docgrab_core::{CommandExtractor, Coordinator, Extractor};

use crate::config::Config;
use crate::templates::Pages;

/// State shared across all HTTP handlers.
#[derive(Clone, Debug)]
pub struct AppState {
    /// Server configuration (env-derived).
    pub config: Arc<Config>,
    /// Owns every task record and its background worker.
    pub coordinator: Coordinator,
    /// Compiled HTML templates.
    pub pages: Arc<Pages>,
}

impl AppState {
    /// Wire the coordinator to the configured extractor command.
    pub fn new(config: Config) -> Result<Self, minijinja::Error> {
        let extractor = CommandExtractor::new(config.command.clone(), config.work_dir.clone())
            .args(config.command_args.clone());
        Self::with_extractor(config, Arc::new(extractor))
    }

    pub fn with_extractor(
        config: Config,
        extractor: Arc<dyn Extractor>,
    ) -> Result<Self, minijinja::Error> {
        let coordinator = Coordinator::new(config.coordinator(), extractor);
        Ok(Self {
            pages: Arc::new(Pages::new(&config.title)?),
            config: Arc::new(config),
            coordinator,
        })
    }
}
