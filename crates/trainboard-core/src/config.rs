//! Dashboard configuration, loadable from YAML.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::storage;

/// Configuration shared by the server and the CLI.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DashboardConfig {
    /// Root directory holding `jobs/` and `emetrics/`.
    pub data_dir: PathBuf,
    pub host: String,
    pub port: u16,
    /// Metrics polling interval while following a training (default: 4000)
    pub metrics_poll_interval_ms: u64,
    /// Analytics refresh interval (default: 20000)
    pub jobs_poll_interval_ms: u64,
    /// Records fetched by the first metrics request (default: 10)
    pub page_size: usize,
    /// Records fetched per poll in follow mode (default: 100)
    pub follow_page_size: usize,
    /// Job sources used when a request names none. Empty means all.
    pub sources: Vec<String>,
}

impl Default for DashboardConfig {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("data"),
            host: "127.0.0.1".to_string(),
            port: 8000,
            metrics_poll_interval_ms: 4000,
            jobs_poll_interval_ms: 20_000,
            page_size: 10,
            follow_page_size: 100,
            sources: Vec::new(),
        }
    }
}

impl DashboardConfig {
    /// Load from a YAML file; a missing file yields the defaults.
    pub fn load(path: &Path) -> Result<Self> {
        storage::load_yaml(path)
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        storage::save_yaml(path, self)
    }

    pub fn with_data_dir(mut self, data_dir: impl Into<PathBuf>) -> Self {
        self.data_dir = data_dir.into();
        self
    }

    pub fn metrics_poll_interval(&self) -> Duration {
        Duration::from_millis(self.metrics_poll_interval_ms.max(1))
    }

    pub fn jobs_poll_interval(&self) -> Duration {
        Duration::from_millis(self.jobs_poll_interval_ms.max(1))
    }
}
