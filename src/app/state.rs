//! Application state shared across routes

use std::sync::Arc;

use crate::config::Config;
use crate::game::GameRegistry;

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub registry: Arc<GameRegistry>,
}

impl AppState {
    pub fn new(config: Config) -> Self {
        let registry = Arc::new(GameRegistry::new(config.game.clone()));

        Self {
            config: Arc::new(config),
            registry,
        }
    }
}
