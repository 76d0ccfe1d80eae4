//! Shared application state for the Axum server.

use std::sync::Arc;

use trainboard_core::{DashboardConfig, EventBus, JobStore, JsonlMetricsSource};

#[derive(Clone)]
pub struct AppState {
    pub config: Arc<DashboardConfig>,
    pub jobs: JobStore,
    pub metrics: Arc<JsonlMetricsSource>,
    pub bus: EventBus,
}

impl AppState {
    pub fn new(config: DashboardConfig) -> Self {
        Self::with_bus(config, EventBus::default())
    }

    /// Build state around an event bus owned by the caller.
    pub fn with_bus(config: DashboardConfig, bus: EventBus) -> Self {
        Self {
            jobs: JobStore::new(&config.data_dir),
            metrics: Arc::new(JsonlMetricsSource::new(&config.data_dir)),
            config: Arc::new(config),
            bus,
        }
    }
}
