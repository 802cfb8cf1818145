use crate::config::Config;
use crate::tasks::TaskRegistry;
use std::sync::Arc;

/// Shared state handed to every request handler.
pub struct AppState {
    pub config: Arc<Config>,
    pub registry: Arc<TaskRegistry>,
}

impl AppState {
    pub fn new(config: Config) -> Self {
        Self {
            config: Arc::new(config),
            registry: Arc::new(TaskRegistry::new()),
        }
    }
}
