//! Application configuration management.
//!
//! Configuration is stored at `~/.config/authkeeper/config.json`. Every field
//! has a default, so a missing file is not an error. Environment variables
//! are applied on top of the file:
//!
//! - `PUBLIC_API_URL`: authority base address
//! - `AUTHKEEPER_CREDENTIAL_MODE`: `token` or `cookie`
//! - `AUTHKEEPER_STORAGE`: `memory`, `file` or `keyring`
//! - `AUTHKEEPER_HOST_CONTEXT`: `interactive` or `headless`

use std::path::PathBuf;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};
use url::Url;

use crate::auth::CredentialMode;

/// Application name used for config/cache directory paths
pub const APP_NAME: &str = "authkeeper";

/// Config file name
const CONFIG_FILE: &str = "config.json";

/// Authority address used when nothing else is configured
pub const DEFAULT_API_URL: &str = "http://localhost:8000";

/// HTTP request timeout in seconds.
const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 30;

pub const ENV_API_URL: &str = "PUBLIC_API_URL";
pub const ENV_CREDENTIAL_MODE: &str = "AUTHKEEPER_CREDENTIAL_MODE";
pub const ENV_STORAGE: &str = "AUTHKEEPER_STORAGE";
pub const ENV_HOST_CONTEXT: &str = "AUTHKEEPER_HOST_CONTEXT";

/// Where persisted credential fields live.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StorageBackend {
    /// Volatile, gone when the process exits
    #[default]
    Memory,
    /// JSON file in the cache directory, optionally sealed
    File,
    /// OS keyring
    Keyring,
}

impl std::str::FromStr for StorageBackend {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "memory" => Ok(StorageBackend::Memory),
            "file" => Ok(StorageBackend::File),
            "keyring" => Ok(StorageBackend::Keyring),
            other => Err(format!("unknown storage backend: {}", other)),
        }
    }
}

/// Whether the store runs somewhere sessions can be loaded and persisted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HostContext {
    #[default]
    Interactive,
    /// Loading and persistence are disabled (e.g. pre-rendering on a server)
    Headless,
}

impl HostContext {
    pub fn is_interactive(self) -> bool {
        self == HostContext::Interactive
    }
}

impl std::str::FromStr for HostContext {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "interactive" => Ok(HostContext::Interactive),
            "headless" => Ok(HostContext::Headless),
            other => Err(format!("unknown host context: {}", other)),
        }
    }
}

fn default_api_url() -> String {
    DEFAULT_API_URL.to_string()
}

fn default_request_timeout_secs() -> u64 {
    DEFAULT_REQUEST_TIMEOUT_SECS
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    #[serde(default = "default_api_url")]
    pub api_base_url: String,
    #[serde(default)]
    pub credential_mode: CredentialMode,
    #[serde(default)]
    pub storage: StorageBackend,
    #[serde(default)]
    pub host_context: HostContext,
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            api_base_url: default_api_url(),
            credential_mode: CredentialMode::default(),
            storage: StorageBackend::default(),
            host_context: HostContext::default(),
            request_timeout_secs: DEFAULT_REQUEST_TIMEOUT_SECS,
        }
    }
}

impl Config {
    /// Load the config file (if any), then apply environment overrides
    pub fn load() -> Result<Self> {
        let path = Self::config_path()?;
        let mut config = if path.exists() {
            let contents = std::fs::read_to_string(&path)
                .with_context(|| format!("Failed to read config file {}", path.display()))?;
            serde_json::from_str(&contents).context("Failed to parse config file")?
        } else {
            Self::default()
        };
        config.apply_overrides(|key| std::env::var(key).ok())?;
        config.validate()?;
        Ok(config)
    }

    /// Apply overrides from a key lookup (the process environment in `load`)
    pub fn apply_overrides<F>(&mut self, lookup: F) -> Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        let value = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        if let Some(url) = value(ENV_API_URL) {
            self.api_base_url = url.trim().to_string();
        }
        if let Some(mode) = value(ENV_CREDENTIAL_MODE) {
            self.credential_mode = mode.parse().map_err(anyhow::Error::msg)?;
        }
        if let Some(storage) = value(ENV_STORAGE) {
            self.storage = storage.parse().map_err(anyhow::Error::msg)?;
        }
        if let Some(context) = value(ENV_HOST_CONTEXT) {
            self.host_context = context.parse().map_err(anyhow::Error::msg)?;
        }
        Ok(())
    }

    /// Reject base addresses that are not absolute http(s) URLs
    pub fn validate(&self) -> Result<()> {
        let url = Url::parse(&self.api_base_url)
            .with_context(|| format!("Invalid API base URL: {}", self.api_base_url))?;
        if !matches!(url.scheme(), "http" | "https") {
            bail!("Unsupported API base URL scheme: {}", url.scheme());
        }
        if url.host().is_none() {
            bail!("API base URL has no host: {}", self.api_base_url);
        }
        Ok(())
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    fn config_path() -> Result<PathBuf> {
        let config_dir = dirs::config_dir()
            .ok_or_else(|| anyhow::anyhow!("Could not find config directory"))?;
        Ok(config_dir.join(APP_NAME).join(CONFIG_FILE))
    }

    pub fn cache_dir(&self) -> Result<PathBuf> {
        let cache_dir = dirs::cache_dir()
            .ok_or_else(|| anyhow::anyhow!("Could not find cache directory"))?;
        Ok(cache_dir.join(APP_NAME))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn test_defaults() {
        let config = Config::default();
        assert_eq!(config.api_base_url, "http://localhost:8000");
        assert_eq!(config.credential_mode, CredentialMode::Token);
        assert_eq!(config.storage, StorageBackend::Memory);
        assert_eq!(config.host_context, HostContext::Interactive);
        assert_eq!(config.request_timeout(), Duration::from_secs(30));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_partial_file_fills_defaults() {
        let config: Config = serde_json::from_str(r#"{"credential_mode": "cookie"}"#).unwrap();
        assert_eq!(config.credential_mode, CredentialMode::Cookie);
        assert_eq!(config.api_base_url, DEFAULT_API_URL);
        assert_eq!(config.request_timeout_secs, 30);
    }

    #[test]
    fn test_env_overrides() {
        let mut config = Config::default();
        config
            .apply_overrides(lookup(&[
                (ENV_API_URL, "https://api.example.com"),
                (ENV_CREDENTIAL_MODE, "cookie"),
                (ENV_STORAGE, "file"),
                (ENV_HOST_CONTEXT, "headless"),
            ]))
            .unwrap();

        assert_eq!(config.api_base_url, "https://api.example.com");
        assert_eq!(config.credential_mode, CredentialMode::Cookie);
        assert_eq!(config.storage, StorageBackend::File);
        assert_eq!(config.host_context, HostContext::Headless);
    }

    #[test]
    fn test_empty_override_is_ignored() {
        let mut config = Config::default();
        config.apply_overrides(lookup(&[(ENV_API_URL, "  ")])).unwrap();
        assert_eq!(config.api_base_url, DEFAULT_API_URL);
    }

    #[test]
    fn test_bad_override_is_an_error() {
        let mut config = Config::default();
        let result = config.apply_overrides(lookup(&[(ENV_STORAGE, "floppy")]));
        assert!(result.is_err());
    }

    #[test]
    fn test_validate_rejects_bad_urls() {
        let mut config = Config::default();
        config.api_base_url = "not a url".to_string();
        assert!(config.validate().is_err());

        config.api_base_url = "ftp://files.example.com".to_string();
        assert!(config.validate().is_err());

        config.api_base_url = "https://auth.example.com/base/".to_string();
        assert!(config.validate().is_ok());
    }
}
