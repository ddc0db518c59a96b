//! Application configuration.
//!
//! Stored as JSON under the platform config directory
//! (`~/.config/poolwatch/config.json` on Linux). The API base URL can be
//! overridden per-invocation with the `POOLWATCH_BASE_URL` environment
//! variable.

use std::path::PathBuf;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::auth::InitMode;

const APP_NAME: &str = "poolwatch";
const CONFIG_FILE: &str = "config.json";

/// Default management API root when nothing is configured
pub const DEFAULT_BASE_URL: &str = "http://127.0.0.1:8000/api";

/// Environment variable overriding the configured base URL
pub const ENV_BASE_URL: &str = "POOLWATCH_BASE_URL";

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// Management API root, e.g. `https://scaler.example.com/api`
    #[serde(default)]
    pub api_base_url: Option<String>,

    /// Username pre-filled at the login prompt
    #[serde(default)]
    pub last_username: Option<String>,

    /// When true, startup probes the whoami endpoint instead of trusting
    /// the persisted token until first use
    #[serde(default)]
    pub validate_on_load: bool,
}

impl Config {
    pub fn load() -> Result<Self> {
        let path = Self::config_path()?;
        if !path.exists() {
            return Ok(Self::default());
        }
        let contents = std::fs::read_to_string(&path)
            .with_context(|| format!("Failed to read config from {}", path.display()))?;
        serde_json::from_str(&contents)
            .with_context(|| format!("Failed to parse config at {}", path.display()))
    }

    pub fn save(&self) -> Result<()> {
        let path = Self::config_path()?;
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create {}", parent.display()))?;
        }
        let contents = serde_json::to_string_pretty(self).context("Failed to serialize config")?;
        std::fs::write(&path, contents)
            .with_context(|| format!("Failed to write config to {}", path.display()))
    }

    /// Effective API root: env override, then config, then the default
    pub fn base_url(&self) -> String {
        std::env::var(ENV_BASE_URL)
            .ok()
            .filter(|v| !v.is_empty())
            .or_else(|| self.api_base_url.clone())
            .unwrap_or_else(|| DEFAULT_BASE_URL.to_string())
    }

    pub fn init_mode(&self) -> InitMode {
        if self.validate_on_load {
            InitMode::ValidateOnLoad
        } else {
            InitMode::TrustLocalToken
        }
    }

    fn config_path() -> Result<PathBuf> {
        let dir = dirs::config_dir().context("Could not determine config directory")?;
        Ok(dir.join(APP_NAME).join(CONFIG_FILE))
    }

    /// Directory holding mutable state (the persisted session)
    pub fn state_dir() -> Result<PathBuf> {
        let dir = dirs::cache_dir().context("Could not determine cache directory")?;
        Ok(dir.join(APP_NAME))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_uses_default_url() {
        let config = Config::default();
        // Only meaningful when the override env var is unset
        if std::env::var(ENV_BASE_URL).is_err() {
            assert_eq!(config.base_url(), DEFAULT_BASE_URL);
        }
    }

    #[test]
    fn test_configured_url_wins_over_default() {
        let config = Config {
            api_base_url: Some("https://scaler.example.com/api".to_string()),
            ..Default::default()
        };
        if std::env::var(ENV_BASE_URL).is_err() {
            assert_eq!(config.base_url(), "https://scaler.example.com/api");
        }
    }

    #[test]
    fn test_init_mode_follows_flag() {
        assert_eq!(Config::default().init_mode(), InitMode::TrustLocalToken);
        let validating = Config {
            validate_on_load: true,
            ..Default::default()
        };
        assert_eq!(validating.init_mode(), InitMode::ValidateOnLoad);
    }

    #[test]
    fn test_config_round_trips_through_json() {
        let config = Config {
            api_base_url: Some("http://10.0.0.5:8000/api".to_string()),
            last_username: Some("admin".to_string()),
            validate_on_load: true,
        };
        let json = serde_json::to_string(&config).unwrap();
        let parsed: Config = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed.api_base_url, config.api_base_url);
        assert_eq!(parsed.last_username, config.last_username);
        assert!(parsed.validate_on_load);
    }
}
