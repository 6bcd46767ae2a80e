//! Application configuration management.
//!
//! Configuration is stored at `~/.config/vaultlink/config.json`. A missing
//! file means defaults; `VAULTLINK_BASE_URL` and `VAULTLINK_TIMEOUT_SECS`
//! override the file.

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::api::executor::{
    DEFAULT_BASE_DELAY_MS, DEFAULT_BASE_URL, DEFAULT_MAX_RETRIES, DEFAULT_TIMEOUT_SECS,
};
use crate::api::ExecutorConfig;
use crate::auth::session::DEFAULT_TOKEN_TTL_SECS;
use crate::auth::{CipherSuite, SessionConfig};
use crate::unlock::DEFAULT_MAX_UNLOCK_ATTEMPTS;
use crate::vault::coordinator::DEFAULT_DEBOUNCE_MS;

/// Application name used for config/cache directory paths
pub const APP_NAME: &str = "vaultlink";

/// Config file name
const CONFIG_FILE: &str = "config.json";

pub const ENV_BASE_URL: &str = "VAULTLINK_BASE_URL";
pub const ENV_TIMEOUT_SECS: &str = "VAULTLINK_TIMEOUT_SECS";

const DEFAULT_STATUS_POLL_SECS: u64 = 30;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub base_url: String,
    pub request_timeout_secs: u64,
    pub max_retries: u32,
    pub retry_base_delay_ms: u64,
    pub token_ttl_secs: i64,
    pub max_unlock_attempts: u32,
    pub status_debounce_ms: u64,
    /// 0 disables background polling.
    pub status_poll_secs: u64,
    pub secure_unlock: bool,
    pub cipher: CipherSuite,
    pub purge_legacy_keychain: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_BASE_URL.to_string(),
            request_timeout_secs: DEFAULT_TIMEOUT_SECS,
            max_retries: DEFAULT_MAX_RETRIES,
            retry_base_delay_ms: DEFAULT_BASE_DELAY_MS,
            token_ttl_secs: DEFAULT_TOKEN_TTL_SECS,
            max_unlock_attempts: DEFAULT_MAX_UNLOCK_ATTEMPTS,
            status_debounce_ms: DEFAULT_DEBOUNCE_MS,
            status_poll_secs: DEFAULT_STATUS_POLL_SECS,
            secure_unlock: true,
            cipher: CipherSuite::default(),
            purge_legacy_keychain: true,
        }
    }
}

impl Config {
    /// Load from the default location, then apply environment overrides.
    pub fn load() -> Result<Self> {
        let mut config = Self::load_from(&Self::config_path()?)?;
        config.apply_env(|key| std::env::var(key).ok());
        Ok(config)
    }

    pub fn load_from(path: &Path) -> Result<Self> {
        if !path.exists() {
            debug!(path = %path.display(), "No config file, using defaults");
            return Ok(Self::default());
        }
        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file {}", path.display()))?;
        serde_json::from_str(&contents)
            .with_context(|| format!("Failed to parse config file {}", path.display()))
    }

    pub fn save(&self) -> Result<()> {
        self.save_to(&Self::config_path()?)
    }

    pub fn save_to(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).context("Failed to create config directory")?;
        }
        let contents = serde_json::to_string_pretty(self)?;
        std::fs::write(path, contents).context("Failed to write config file")?;
        Ok(())
    }

    /// Overrides come from `lookup` so tests need not touch the process environment.
    pub fn apply_env<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(url) = lookup(ENV_BASE_URL).filter(|v| !v.trim().is_empty()) {
            self.base_url = url.trim().to_string();
        }
        if let Some(raw) = lookup(ENV_TIMEOUT_SECS) {
            match raw.trim().parse::<u64>() {
                Ok(secs) if secs > 0 => self.request_timeout_secs = secs,
                _ => warn!(value = %raw, "Ignoring invalid {}", ENV_TIMEOUT_SECS),
            }
        }
    }

    pub fn config_path() -> Result<PathBuf> {
        let config_dir = dirs::config_dir()
            .ok_or_else(|| anyhow::anyhow!("Could not find config directory"))?;
        Ok(config_dir.join(APP_NAME).join(CONFIG_FILE))
    }

    /// Where the session file lives.
    pub fn cache_dir(&self) -> Result<PathBuf> {
        let cache_dir = dirs::cache_dir()
            .ok_or_else(|| anyhow::anyhow!("Could not find cache directory"))?;
        Ok(cache_dir.join(APP_NAME))
    }

    pub fn executor_config(&self) -> ExecutorConfig {
        ExecutorConfig {
            base_url: self.base_url.trim_end_matches('/').to_string(),
            timeout: Duration::from_secs(self.request_timeout_secs.max(1)),
            max_retries: self.max_retries.max(1),
            base_delay: Duration::from_millis(self.retry_base_delay_ms),
        }
    }

    pub fn session_config(&self) -> SessionConfig {
        SessionConfig {
            token_ttl_secs: if self.token_ttl_secs > 0 {
                self.token_ttl_secs
            } else {
                DEFAULT_TOKEN_TTL_SECS
            },
            secure_unlock: self.secure_unlock,
        }
    }

    pub fn status_debounce(&self) -> Duration {
        Duration::from_millis(self.status_debounce_ms)
    }

    pub fn status_poll_interval(&self) -> Option<Duration> {
        (self.status_poll_secs > 0).then(|| Duration::from_secs(self.status_poll_secs))
    }
}
