use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::Path;

#[derive(Debug, Deserialize, Default)]
#[serde(default)]
pub struct FileConfig {
    // Core settings (can override CLI)
    pub db_dir: Option<String>,
    pub landmarks_dir: Option<String>,
    pub metrics_port: Option<u16>,

    // Feature configs
    pub analysis: Option<AnalysisConfig>,
    pub workers: Option<WorkersConfig>,
    pub retry: Option<RetryConfig>,
}

#[derive(Debug, Deserialize, Default, Clone)]
#[serde(default)]
pub struct AnalysisConfig {
    /// Factor applied for a rule that cannot be measured on a frame.
    pub fallback_rule_score: Option<f64>,
    pub min_visibility: Option<f64>,
}

#[derive(Debug, Deserialize, Default, Clone)]
#[serde(default)]
pub struct WorkersConfig {
    pub count: Option<usize>,
    pub poll_interval_ms: Option<u64>,
    pub shutdown_timeout_secs: Option<u64>,
}

#[derive(Debug, Deserialize, Default, Clone)]
#[serde(default)]
pub struct RetryConfig {
    pub max_retries: Option<u32>,
    pub initial_backoff_ms: Option<u64>,
    pub max_backoff_ms: Option<u64>,
    pub backoff_multiplier: Option<f64>,
}

impl FileConfig {
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {:?}", path))?;
        toml::from_str(&content).with_context(|| format!("Failed to parse config file: {:?}", path))
    }
}
