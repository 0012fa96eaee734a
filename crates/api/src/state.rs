use std::sync::Arc;

use sdapi_core::generation::GenerationEnvironment;
use sdapi_worker::JobScheduler;

use crate::config::ServerConfig;

/// Shared application state available to all Axum handlers via `State<AppState>`.
///
/// Cheaply cloneable; everything is behind an `Arc` or already `Clone`.
#[derive(Clone)]
pub struct AppState {
    pub pool: sdapi_db::DbPool,
    pub config: Arc<ServerConfig>,
    /// Paths and interpreter used to build each job's command.
    pub environment: Arc<GenerationEnvironment>,
    pub scheduler: Arc<JobScheduler>,
}

impl AppState {
    pub fn new(pool: sdapi_db::DbPool, config: ServerConfig, scheduler: Arc<JobScheduler>) -> Self {
        let environment = Arc::new(config.generation_environment());
        Self {
            pool,
            config: Arc::new(config),
            environment,
            scheduler,
        }
    }
}
