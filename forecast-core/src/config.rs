use anyhow::{Context, Result, anyhow};
use directories::ProjectDirs;
use serde::{Deserialize, Serialize};
use std::{fs, path::PathBuf, time::Duration};

pub const DEFAULT_API_BASE_URL: &str = "https://api.open-meteo.com/v1/forecast";

/// Upstream API settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ApiConfig {
    pub base_url: String,
    /// Upper bound for a single upstream request.
    pub timeout_secs: u64,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_API_BASE_URL.to_string(),
            timeout_secs: 30,
        }
    }
}

/// Lookback / lookahead windows, in days.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct WindowConfig {
    pub past_days: u32,
    pub forecast_days: u32,
    pub covariate_past_days: u32,
    pub covariate_forecast_days: u32,
}

impl Default for WindowConfig {
    fn default() -> Self {
        Self {
            past_days: 3,
            forecast_days: 3,
            covariate_past_days: 7,
            covariate_forecast_days: 3,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RefreshConfig {
    pub interval_secs: u64,
}

impl Default for RefreshConfig {
    fn default() -> Self {
        Self { interval_secs: 300 }
    }
}

/// Where snapshots and charts live. Unset paths fall back to the platform data dir.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    pub database: Option<PathBuf>,
    pub chart_dir: Option<PathBuf>,
}

/// Top-level configuration stored on disk.
///
/// Example TOML:
/// ```toml
/// strict_lengths = false
///
/// [api]
/// base_url = "https://api.open-meteo.com/v1/forecast"
/// timeout_secs = 30
///
/// [refresh]
/// interval_secs = 300
/// ```
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Fail a fetch on a post-normalization length mismatch instead of truncating.
    pub strict_lengths: bool,
    pub api: ApiConfig,
    pub window: WindowConfig,
    pub refresh: RefreshConfig,
    pub storage: StorageConfig,
}

impl Config {
    /// Load config from disk, or return defaults if it doesn't exist yet.
    pub fn load() -> Result<Self> {
        let path = Self::config_file_path()?;
        Self::load_from(&path)
    }

    pub fn load_from(path: &std::path::Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }

        let contents = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        let cfg: Config = toml::from_str(&contents)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))?;

        cfg.validate()?;
        Ok(cfg)
    }

    /// Save config to disk, creating parent directories as needed.
    pub fn save(&self) -> Result<()> {
        let path = Self::config_file_path()?;
        self.save_to(&path)
    }

    pub fn save_to(&self, path: &std::path::Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).with_context(|| {
                format!("Failed to create config directory: {}", parent.display())
            })?;
        }

        let toml =
            toml::to_string_pretty(self).context("Failed to serialize configuration to TOML")?;

        fs::write(path, toml)
            .with_context(|| format!("Failed to write config file: {}", path.display()))?;

        Ok(())
    }

    pub fn validate(&self) -> Result<()> {
        if self.api.timeout_secs == 0 {
            return Err(anyhow!("api.timeout_secs must be greater than zero"));
        }
        if self.refresh.interval_secs == 0 {
            return Err(anyhow!("refresh.interval_secs must be greater than zero"));
        }
        if self.window.past_days == 0 || self.window.covariate_past_days == 0 {
            return Err(anyhow!(
                "past days must be at least 1, otherwise there is nothing to train on"
            ));
        }
        Ok(())
    }

    pub fn refresh_interval(&self) -> Duration {
        Duration::from_secs(self.refresh.interval_secs)
    }

    /// Path to the config file.
    pub fn config_file_path() -> Result<PathBuf> {
        Ok(project_dirs()?.config_dir().join("config.toml"))
    }

    /// SQLite database holding every snapshot.
    pub fn database_path(&self) -> Result<PathBuf> {
        match &self.storage.database {
            Some(path) => Ok(path.clone()),
            None => Ok(project_dirs()?.data_dir().join("forecasts.sqlite")),
        }
    }

    /// Directory charts are written to.
    pub fn chart_dir(&self) -> Result<PathBuf> {
        match &self.storage.chart_dir {
            Some(path) => Ok(path.clone()),
            None => Ok(project_dirs()?.data_dir().join("charts")),
        }
    }
}

fn project_dirs() -> Result<ProjectDirs> {
    ProjectDirs::from("dev", "city-forecast", "forecast-cli")
        .ok_or_else(|| anyhow!("Could not determine platform config directory"))
}
