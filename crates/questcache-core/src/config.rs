//! Application configuration management.
//!
//! Configuration is stored at `~/.config/questcache/config.json` and covers
//! where the offline store lives, which API queued updates go to, and the
//! sync policy. Environment variables override the file; the API token is
//! only ever read from the environment.

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::api::client::REQUEST_TIMEOUT_SECS;
use crate::store::DB_NAME;
use crate::sync::ReplayPolicy;

/// Application name used for config/data directory paths
const APP_NAME: &str = "questcache";

/// Config file name
const CONFIG_FILE: &str = "config.json";

pub const ENV_DATA_DIR: &str = "QUESTCACHE_DATA_DIR";
pub const ENV_API_URL: &str = "QUESTCACHE_API_URL";
pub const ENV_API_TOKEN: &str = "QUESTCACHE_API_TOKEN";
pub const ENV_OFFLINE: &str = "QUESTCACHE_OFFLINE";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct Config {
    #[serde(default)]
    pub data_dir: Option<PathBuf>,
    #[serde(default)]
    pub api_base_url: Option<String>,
    #[serde(default)]
    pub request_timeout_secs: Option<u64>,
    #[serde(default)]
    pub replay_policy: ReplayPolicy,
    /// Background retry cadence; `None` syncs only on reconnect or enqueue.
    #[serde(default)]
    pub retry_interval_secs: Option<u64>,
    #[serde(default)]
    pub start_offline: bool,
}

impl Config {
    pub fn load() -> Result<Self> {
        Self::load_from(&Self::config_path()?)
    }

    pub fn load_from(path: &Path) -> Result<Self> {
        if path.exists() {
            let contents = std::fs::read_to_string(path)
                .with_context(|| format!("Failed to read config file: {}", path.display()))?;
            serde_json::from_str(&contents)
                .with_context(|| format!("Failed to parse config file: {}", path.display()))
        } else {
            Ok(Self::default())
        }
    }

    pub fn save(&self) -> Result<()> {
        self.save_to(&Self::config_path()?)
    }

    pub fn save_to(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let contents = serde_json::to_string_pretty(self)?;
        std::fs::write(path, contents)?;
        Ok(())
    }

    pub fn config_path() -> Result<PathBuf> {
        let config_dir = dirs::config_dir()
            .ok_or_else(|| anyhow::anyhow!("Could not find config directory"))?;
        Ok(config_dir.join(APP_NAME).join(CONFIG_FILE))
    }

    /// Apply overrides from the process environment.
    pub fn apply_env(&mut self) {
        self.apply_overrides(|name| std::env::var(name).ok());
    }

    fn apply_overrides(&mut self, var: impl Fn(&str) -> Option<String>) {
        if let Some(dir) = var(ENV_DATA_DIR).filter(|v| !v.is_empty()) {
            self.data_dir = Some(PathBuf::from(dir));
        }
        if let Some(url) = var(ENV_API_URL).filter(|v| !v.is_empty()) {
            self.api_base_url = Some(url);
        }
        if let Some(flag) = var(ENV_OFFLINE) {
            self.start_offline = matches!(flag.to_ascii_lowercase().as_str(), "1" | "true" | "yes");
        }
    }

    /// Directory holding the offline store files.
    pub fn store_dir(&self) -> Result<PathBuf> {
        if let Some(ref dir) = self.data_dir {
            return Ok(dir.clone());
        }
        let data_dir = dirs::data_dir()
            .ok_or_else(|| anyhow::anyhow!("Could not find data directory"))?;
        Ok(data_dir.join(APP_NAME).join(DB_NAME))
    }

    pub fn log_dir(&self) -> Result<PathBuf> {
        Ok(self.store_dir()?.join("logs"))
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs.unwrap_or(REQUEST_TIMEOUT_SECS))
    }

    pub fn retry_interval(&self) -> Option<Duration> {
        self.retry_interval_secs
            .filter(|secs| *secs > 0)
            .map(Duration::from_secs)
    }
}
