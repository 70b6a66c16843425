use cartrunner_core::{Config, SanitizedConfig, TaskManager};

/// Shared application state
pub struct AppState {
    config: Config,
    manager: TaskManager,
}

impl AppState {
    pub fn new(config: Config, manager: TaskManager) -> Self {
        Self { config, manager }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn sanitized_config(&self) -> SanitizedConfig {
        SanitizedConfig::from(&self.config)
    }

    pub fn manager(&self) -> &TaskManager {
        &self.manager
    }
}
