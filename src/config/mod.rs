mod file_config;

pub use file_config::{AnalysisConfig, FileConfig, RetryConfig, WorkersConfig};

use crate::analysis::DEFAULT_FALLBACK_SCORE;
use anyhow::{bail, Result};
use std::path::PathBuf;
use std::time::Duration;

/// CLI arguments that can be used for config resolution.
/// This struct mirrors the CLI arguments that can be overridden by TOML config.
#[derive(Debug, Clone, Default)]
pub struct CliConfig {
    pub db_dir: Option<PathBuf>,
    pub landmarks_dir: Option<PathBuf>,
    pub metrics_port: u16,
    pub workers: Option<usize>,
}

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub db_dir: PathBuf,
    pub landmarks_dir: PathBuf,
    pub metrics_port: u16,

    pub analysis: AnalysisSettings,
    pub workers: WorkerSettings,
    pub retry: RetrySettings,
}

impl AppConfig {
    /// Resolve configuration from CLI arguments and optional TOML file config.
    /// TOML values override CLI values where present.
    pub fn resolve(cli: &CliConfig, file_config: Option<FileConfig>) -> Result<Self> {
        let file = file_config.unwrap_or_default();

        let db_dir = file
            .db_dir
            .map(PathBuf::from)
            .or_else(|| cli.db_dir.clone())
            .ok_or_else(|| {
                anyhow::anyhow!("db_dir must be specified via --db-dir or in config file")
            })?;

        if !db_dir.exists() {
            bail!("Database directory does not exist: {:?}", db_dir);
        }
        if !db_dir.is_dir() {
            bail!("db_dir is not a directory: {:?}", db_dir);
        }

        let landmarks_dir = file
            .landmarks_dir
            .map(PathBuf::from)
            .or_else(|| cli.landmarks_dir.clone())
            .unwrap_or_else(|| db_dir.join("landmarks"));

        let metrics_port = file.metrics_port.unwrap_or(cli.metrics_port);

        let defaults = AnalysisSettings::default();
        let analysis_file = file.analysis.unwrap_or_default();
        let analysis = AnalysisSettings {
            fallback_rule_score: analysis_file
                .fallback_rule_score
                .unwrap_or(defaults.fallback_rule_score),
            min_visibility: analysis_file
                .min_visibility
                .unwrap_or(defaults.min_visibility),
        };
        if !(0.0..=1.0).contains(&analysis.fallback_rule_score) {
            bail!(
                "analysis.fallback_rule_score must be within [0, 1], got {}",
                analysis.fallback_rule_score
            );
        }
        if !(0.0..=1.0).contains(&analysis.min_visibility) {
            bail!(
                "analysis.min_visibility must be within [0, 1], got {}",
                analysis.min_visibility
            );
        }

        let defaults = WorkerSettings::default();
        let workers_file = file.workers.unwrap_or_default();
        let workers = WorkerSettings {
            count: workers_file
                .count
                .or(cli.workers)
                .unwrap_or(defaults.count),
            poll_interval_ms: workers_file
                .poll_interval_ms
                .unwrap_or(defaults.poll_interval_ms),
            shutdown_timeout_secs: workers_file
                .shutdown_timeout_secs
                .unwrap_or(defaults.shutdown_timeout_secs),
        };
        if workers.count == 0 {
            bail!("At least one analysis worker is required");
        }

        let defaults = RetrySettings::default();
        let retry_file = file.retry.unwrap_or_default();
        let retry = RetrySettings {
            max_retries: retry_file.max_retries.unwrap_or(defaults.max_retries),
            initial_backoff_ms: retry_file
                .initial_backoff_ms
                .unwrap_or(defaults.initial_backoff_ms),
            max_backoff_ms: retry_file.max_backoff_ms.unwrap_or(defaults.max_backoff_ms),
            backoff_multiplier: retry_file
                .backoff_multiplier
                .unwrap_or(defaults.backoff_multiplier),
        };
        if retry.backoff_multiplier < 1.0 {
            bail!(
                "retry.backoff_multiplier must be at least 1.0, got {}",
                retry.backoff_multiplier
            );
        }

        Ok(Self {
            db_dir,
            landmarks_dir,
            metrics_port,
            analysis,
            workers,
            retry,
        })
    }

    pub fn analysis_db_path(&self) -> PathBuf {
        self.db_dir.join("analysis_jobs.db")
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct AnalysisSettings {
    pub fallback_rule_score: f64,
    /// Landmarks below this visibility are treated as missing. 0 disables the floor.
    pub min_visibility: f64,
}

impl Default for AnalysisSettings {
    fn default() -> Self {
        Self {
            fallback_rule_score: DEFAULT_FALLBACK_SCORE,
            min_visibility: 0.0,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct WorkerSettings {
    pub count: usize,
    pub poll_interval_ms: u64,
    pub shutdown_timeout_secs: u64,
}

impl WorkerSettings {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn shutdown_timeout(&self) -> Duration {
        Duration::from_secs(self.shutdown_timeout_secs)
    }
}

impl Default for WorkerSettings {
    fn default() -> Self {
        Self {
            count: 2,
            poll_interval_ms: 500,
            shutdown_timeout_secs: 30,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct RetrySettings {
    pub max_retries: u32,
    pub initial_backoff_ms: u64,
    pub max_backoff_ms: u64,
    pub backoff_multiplier: f64,
}

impl Default for RetrySettings {
    fn default() -> Self {
        Self {
            max_retries: 3,
            initial_backoff_ms: 500,
            max_backoff_ms: 10_000,
            backoff_multiplier: 2.0,
        }
    }
}
