use serde::{Deserialize, Serialize};
use std::fs;
use std::path::PathBuf;
use std::time::Duration;

use crate::governance::GovernanceConfig;
use crate::{hlog_debug, Error, Result};

pub const DEFAULT_THRESHOLD_MS: f64 = 5000.0;
pub const DEFAULT_WINDOW_CAPACITY: usize = 100;
pub const DEFAULT_HEALTH_WINDOW_MS: u64 = 60_000;
pub const DEFAULT_CONTENT_CAP: usize = 50_000;
pub const DEFAULT_PENDING_WARNING: usize = 50;
pub const DEFAULT_STORE_TIMEOUT_MS: u64 = 2000;
pub const DEFAULT_RECOVERY_INTERVAL_MS: u64 = 5000;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub threshold_ms: f64,
    pub window_capacity: usize,
    pub health_window_ms: u64,
    pub content_cap: usize,
    pub pending_warning: usize,
    pub store_timeout_ms: u64,
    pub recovery_interval_ms: u64,
    pub data_dir: Option<String>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            threshold_ms: DEFAULT_THRESHOLD_MS,
            window_capacity: DEFAULT_WINDOW_CAPACITY,
            health_window_ms: DEFAULT_HEALTH_WINDOW_MS,
            content_cap: DEFAULT_CONTENT_CAP,
            pending_warning: DEFAULT_PENDING_WARNING,
            store_timeout_ms: DEFAULT_STORE_TIMEOUT_MS,
            recovery_interval_ms: DEFAULT_RECOVERY_INTERVAL_MS,
            data_dir: None,
        }
    }
}

impl Config {
    pub fn hush_dir() -> Result<PathBuf> {
        Ok(dirs::home_dir().ok_or(Error::NoHomeDir)?.join(".hush"))
    }

    pub fn config_path() -> Result<PathBuf> {
        Ok(Self::hush_dir()?.join("hush.toml"))
    }

    pub fn data_dir(&self) -> Result<PathBuf> {
        match &self.data_dir {
            Some(dir) => Ok(expand_tilde(dir)),
            None => Self::hush_dir(),
        }
    }

    pub fn store_path(&self) -> Result<PathBuf> {
        Ok(self.data_dir()?.join("thoughts.json"))
    }

    pub fn store_timeout(&self) -> Duration {
        Duration::from_millis(self.store_timeout_ms)
    }

    pub fn recovery_interval(&self) -> Duration {
        Duration::from_millis(self.recovery_interval_ms.max(1))
    }

    /// Engine tunables, with nonsensical values pulled back to defaults.
    pub fn governance(&self) -> GovernanceConfig {
        let threshold_ms = if self.threshold_ms.is_finite() && self.threshold_ms >= 0.0 {
            self.threshold_ms
        } else {
            DEFAULT_THRESHOLD_MS
        };
        GovernanceConfig {
            threshold_ms,
            window_capacity: self.window_capacity.max(1),
            health_window: Duration::from_millis(self.health_window_ms.max(1)),
            content_cap: self.content_cap.max(1),
            pending_warning: self.pending_warning,
        }
    }

    pub fn load() -> Result<Self> {
        let path = Self::config_path()?;
        hlog_debug!("Config::load path={}", path.display());
        if !path.exists() {
            hlog_debug!("Config file not found, using defaults");
            return Ok(Self::default());
        }
        let config: Self = toml::from_str(&fs::read_to_string(&path)?)?;
        hlog_debug!(
            "Config loaded: threshold_ms={}, window_capacity={}, data_dir={:?}",
            config.threshold_ms,
            config.window_capacity,
            config.data_dir
        );
        Ok(config)
    }

    pub fn save(&self) -> Result<()> {
        let hush_dir = Self::hush_dir()?;
        if !hush_dir.exists() {
            hlog_debug!("Creating hush directory");
            fs::create_dir_all(&hush_dir)?;
        }
        let path = Self::config_path()?;
        fs::write(&path, toml::to_string_pretty(self)?)?;
        hlog_debug!("Config saved to {}", path.display());
        Ok(())
    }
}

fn expand_tilde(path: &str) -> PathBuf {
    if let Some(rest) = path.strip_prefix("~/") {
        if let Some(home) = dirs::home_dir() {
            return home.join(rest);
        }
    }
    PathBuf::from(path)
}
