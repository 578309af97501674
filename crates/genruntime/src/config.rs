use crate::scheduler::clamp_concurrency;
use serde::Deserialize;
use std::path::Path;

/// Configuration for the engine
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RuntimeConfig {
    /// Used by `run_dag` callers that do not pick a bound; clamped to 1..=8
    pub default_concurrency: usize,
    pub event_buffer_size: usize,
}

impl RuntimeConfig {
    /// Load from a JSON file; missing fields keep their defaults.
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let raw = std::fs::read_to_string(path)?;
        let mut config: RuntimeConfig = serde_json::from_str(&raw)?;
        config.default_concurrency = clamp_concurrency(config.default_concurrency);
        Ok(config)
    }
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            default_concurrency: 2,
            event_buffer_size: 1000,
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid config: {0}")]
    Parse(#[from] serde_json::Error),
}
