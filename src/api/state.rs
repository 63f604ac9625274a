use std::sync::Arc;

use crate::config::Config;
use crate::orchestrator::Orchestrator;

#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub orchestrator: Arc<Orchestrator>,
}

impl AppState {
    pub fn new(config: Config) -> Self {
        let orchestrator = Orchestrator::new(&config);
        Self::with_orchestrator(config, orchestrator)
    }

    /// State around a pre-built orchestrator (custom metadata source, tests).
    pub fn with_orchestrator(config: Config, orchestrator: Orchestrator) -> Self {
        Self {
            config: Arc::new(config),
            orchestrator: Arc::new(orchestrator),
        }
    }
}
