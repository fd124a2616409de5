use anyhow::{Context, Result};
use directories::ProjectDirs;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::stability::DEFAULT_ROUNDS;
use crate::trace::BASELINE_RUN_ID;

/// Application configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// General settings
    #[serde(default)]
    pub general: GeneralConfig,

    /// Where traces are read from
    #[serde(default)]
    pub traces: TracesConfig,

    /// Stability analysis settings
    #[serde(default)]
    pub stability: StabilityConfig,

    /// Where classification artifacts are written
    #[serde(default)]
    pub reports: ReportsConfig,

    /// Data directory (default home of traces and reports)
    #[serde(default)]
    pub data_dir: Option<PathBuf>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GeneralConfig {
    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TracesConfig {
    /// Trace store root; defaults to `<data_dir>/traces`
    #[serde(default)]
    pub dir: Option<PathBuf>,

    /// Run id of the unmutated baseline run (the only one that is cached)
    #[serde(default = "default_baseline_run_id")]
    pub baseline_run_id: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StabilityConfig {
    /// Number of randomized rounds; 0 runs nothing
    #[serde(default = "default_rounds")]
    pub rounds: usize,

    /// Seed for reproducible test orderings
    #[serde(default)]
    pub seed: Option<u64>,

    /// Per-test timeout in seconds
    #[serde(default = "default_test_timeout")]
    pub test_timeout_seconds: u64,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ReportsConfig {
    /// Output directory; defaults to `<data_dir>/reports`
    #[serde(default)]
    pub output_dir: Option<PathBuf>,
}

// Default value functions
fn default_log_level() -> String {
    "info".to_string()
}

fn default_baseline_run_id() -> String {
    BASELINE_RUN_ID.to_string()
}

fn default_rounds() -> usize {
    DEFAULT_ROUNDS
}

fn default_test_timeout() -> u64 {
    300 // 5 minutes
}

impl Default for GeneralConfig {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
        }
    }
}

impl Default for TracesConfig {
    fn default() -> Self {
        Self {
            dir: None,
            baseline_run_id: default_baseline_run_id(),
        }
    }
}

impl Default for StabilityConfig {
    fn default() -> Self {
        Self {
            rounds: default_rounds(),
            seed: None,
            test_timeout_seconds: default_test_timeout(),
        }
    }
}

impl Config {
    /// Load configuration from file, or use defaults if not found
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let config_path = path.map(PathBuf::from).or_else(Self::default_config_path);

        let config = if let Some(ref path) = config_path {
            if path.exists() {
                let contents = std::fs::read_to_string(path)
                    .with_context(|| format!("Failed to read config from {:?}", path))?;
                toml::from_str(&contents)
                    .with_context(|| format!("Failed to parse config from {:?}", path))?
            } else {
                Config::default()
            }
        } else {
            Config::default()
        };

        Ok(config)
    }

    /// Save configuration to file
    pub fn save(&self, path: Option<&Path>) -> Result<PathBuf> {
        let config_path = path
            .map(PathBuf::from)
            .or_else(Self::default_config_path)
            .context("No config path available")?;

        // Ensure parent directory exists
        if let Some(parent) = config_path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create config directory: {:?}", parent))?;
        }

        let contents = toml::to_string_pretty(self).context("Failed to serialize config")?;
        std::fs::write(&config_path, contents)
            .with_context(|| format!("Failed to write config to {:?}", config_path))?;

        Ok(config_path)
    }

    /// Get the default configuration file path
    pub fn default_config_path() -> Option<PathBuf> {
        ProjectDirs::from("com", "mutrace", "mutrace")
            .map(|dirs| dirs.config_dir().join("config.toml"))
    }

    /// Get the data directory path
    pub fn data_dir(&self) -> PathBuf {
        self.data_dir.clone().unwrap_or_else(|| {
            ProjectDirs::from("com", "mutrace", "mutrace")
                .map(|dirs| dirs.data_dir().to_path_buf())
                .unwrap_or_else(|| PathBuf::from(".mutrace"))
        })
    }

    /// Get the trace store root
    pub fn traces_dir(&self) -> PathBuf {
        self.traces
            .dir
            .clone()
            .unwrap_or_else(|| self.data_dir().join("traces"))
    }

    /// Get the report output directory
    pub fn reports_dir(&self) -> PathBuf {
        self.reports
            .output_dir
            .clone()
            .unwrap_or_else(|| self.data_dir().join("reports"))
    }
}
