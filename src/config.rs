use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use tracing::debug;

use crate::{Error, Result};

pub const DEFAULT_TIMEOUT_MS: u64 = 30_000;
pub const DEFAULT_RETRIES: u32 = 2;
pub const DEFAULT_MAX_MEMORY_USAGE: u64 = 1024 * 1024 * 1024;
pub const DEFAULT_SAMPLE_INTERVAL_MS: u64 = 5_000;

/// User configuration, read from `~/.wavegen/wavegen.toml`.
///
/// Every field has a default so a partial file (or no file) is valid.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Per-attempt timeout for a single task.
    pub timeout_ms: u64,
    /// Retries after the first failed attempt.
    pub retries: u32,
    /// Ceiling in bytes checked by the orchestrator health check.
    pub max_memory_usage: u64,
    /// Force a collection between waves when memory is under pressure.
    pub gc_hints: bool,
    /// Log every recorded operation timing.
    pub profile_mode: bool,
    /// Override for the worker pool size.
    pub max_workers: Option<usize>,
    /// Threshold overrides as fractions of total system memory.
    pub warning_pct: Option<f64>,
    pub critical_pct: Option<f64>,
    pub cleanup_pct: Option<f64>,
    /// Interval of the background memory sampler.
    pub sample_interval_ms: u64,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            timeout_ms: DEFAULT_TIMEOUT_MS,
            retries: DEFAULT_RETRIES,
            max_memory_usage: DEFAULT_MAX_MEMORY_USAGE,
            gc_hints: true,
            profile_mode: false,
            max_workers: None,
            warning_pct: None,
            critical_pct: None,
            cleanup_pct: None,
            sample_interval_ms: DEFAULT_SAMPLE_INTERVAL_MS,
        }
    }
}

impl Config {
    pub fn home_dir() -> Result<PathBuf> {
        Ok(dirs::home_dir().ok_or(Error::NoHomeDir)?.join(".wavegen"))
    }

    pub fn config_path() -> Result<PathBuf> {
        Ok(Self::home_dir()?.join("wavegen.toml"))
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    pub fn sample_interval(&self) -> Duration {
        Duration::from_millis(self.sample_interval_ms)
    }

    pub fn load() -> Result<Self> {
        Self::load_from(&Self::config_path()?)
    }

    pub fn load_from(path: &Path) -> Result<Self> {
        debug!(path = %path.display(), "Config::load");
        if !path.exists() {
            debug!("Config file not found, using defaults");
            return Ok(Self::default());
        }
        let config: Self = toml::from_str(&fs::read_to_string(path)?)?;
        debug!(
            timeout_ms = config.timeout_ms,
            retries = config.retries,
            max_workers = ?config.max_workers,
            "Config loaded"
        );
        Ok(config)
    }

    pub fn save(&self) -> Result<()> {
        let home = Self::home_dir()?;
        if !home.exists() {
            debug!(dir = %home.display(), "Creating wavegen directory");
            fs::create_dir_all(&home)?;
        }
        self.save_to(&Self::config_path()?)
    }

    pub fn save_to(&self, path: &Path) -> Result<()> {
        fs::write(path, toml::to_string_pretty(self)?)?;
        debug!(path = %path.display(), "Config saved");
        Ok(())
    }
}
