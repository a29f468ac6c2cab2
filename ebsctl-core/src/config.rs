//! Configuration management for ebsctl
//!
//! Settings are loaded from, in increasing priority:
//! 1. Default values
//! 2. Configuration file (TOML format)
//! 3. Environment variables
//!
//! Command-line flags are applied on top by the binary.

use crate::logging::LoggingConfig;
use ebsctl_common::{MonthlyRetention, RetentionPolicy};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use url::Url;

/// Main configuration struct for ebsctl
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct EbsctlConfig {
    /// Provider gateway connection
    pub provider: ProviderConfig,
    /// Poll intervals while waiting on the provider
    pub polling: PollingConfig,
    /// Default retention policy for `clean`
    pub retention: RetentionPolicy,
    /// Logging configuration
    pub logging: LoggingConfig,
}

/// Provider gateway connection
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ProviderConfig {
    /// Base URL of the block storage gateway
    pub endpoint: String,
    /// Region every request is scoped to
    pub region: String,
    /// Bearer token, if the gateway requires one
    #[serde(skip_serializing_if = "Option::is_none")]
    pub token: Option<String>,
    /// Per-request timeout in seconds
    pub request_timeout_secs: u64,
}

/// Poll intervals, in seconds
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PollingConfig {
    /// Instance start/stop
    pub instance_secs: u64,
    /// Volume creation
    pub volume_create_secs: u64,
    /// Snapshot completion
    pub snapshot_secs: u64,
    /// Attach, detach and delete settling
    pub settle_secs: u64,
    /// Give up after this many polls; unbounded when unset
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_attempts: Option<u32>,
}

impl Default for ProviderConfig {
    fn default() -> Self {
        Self {
            endpoint: "http://localhost:8080".to_string(),
            region: "us-east-1".to_string(),
            token: None,
            request_timeout_secs: 30,
        }
    }
}

impl Default for PollingConfig {
    fn default() -> Self {
        Self {
            instance_secs: 15,
            volume_create_secs: 15,
            snapshot_secs: 60,
            settle_secs: 10,
            max_attempts: None,
        }
    }
}

impl PollingConfig {
    /// Zero intervals, for tests and simulated runs
    pub fn immediate() -> Self {
        Self {
            instance_secs: 0,
            volume_create_secs: 0,
            snapshot_secs: 0,
            settle_secs: 0,
            max_attempts: None,
        }
    }

    pub fn instance(&self) -> Duration {
        Duration::from_secs(self.instance_secs)
    }

    pub fn volume_create(&self) -> Duration {
        Duration::from_secs(self.volume_create_secs)
    }

    pub fn snapshot(&self) -> Duration {
        Duration::from_secs(self.snapshot_secs)
    }

    pub fn settle(&self) -> Duration {
        Duration::from_secs(self.settle_secs)
    }
}

impl EbsctlConfig {
    /// Load configuration from the first config file found, then the environment
    pub fn load() -> Result<Self, ConfigError> {
        let mut config = match Self::find_config_file() {
            Some(path) => Self::load_from_file(&path)?,
            None => Self::default(),
        };

        config.apply_env_overrides();

        Ok(config)
    }

    /// Load configuration from a specific file path, then the environment
    pub fn load_with_file(path: &Path) -> Result<Self, ConfigError> {
        let mut config = Self::load_from_file(path)?;
        config.apply_env_overrides();
        Ok(config)
    }

    /// Load configuration from a specific file path
    pub fn load_from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| ConfigError::FileRead(path.to_path_buf(), e.to_string()))?;

        toml::from_str(&content).map_err(|e| ConfigError::Parse(e.to_string()))
    }

    /// Find configuration file in standard locations
    fn find_config_file() -> Option<PathBuf> {
        let paths = [
            std::env::var("EBSCTL_CONFIG").ok().map(PathBuf::from),
            Some(PathBuf::from("/etc/ebsctl/config.toml")),
            Some(PathBuf::from("./ebsctl.toml")),
        ];

        paths.into_iter().flatten().find(|p| p.exists())
    }

    /// Apply environment variable overrides
    fn apply_env_overrides(&mut self) {
        self.apply_overrides(|key| std::env::var(key).ok());
    }

    fn apply_overrides<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        // Provider
        if let Some(endpoint) = lookup("EBSCTL_ENDPOINT") {
            self.provider.endpoint = endpoint;
        }
        if let Some(region) = lookup("EBSCTL_REGION") {
            self.provider.region = region;
        }
        if let Some(token) = lookup("EBSCTL_TOKEN") {
            self.provider.token = Some(token);
        }
        if let Some(timeout) = lookup("EBSCTL_REQUEST_TIMEOUT").and_then(|v| v.parse().ok()) {
            self.provider.request_timeout_secs = timeout;
        }

        // Polling
        if let Some(attempts) = lookup("EBSCTL_POLL_MAX_ATTEMPTS").and_then(|v| v.parse().ok()) {
            self.polling.max_attempts = Some(attempts);
        }
        if let Some(secs) = lookup("EBSCTL_POLL_SNAPSHOT_SECS").and_then(|v| v.parse().ok()) {
            self.polling.snapshot_secs = secs;
        }

        // Retention
        if let Some(monthly) = lookup("EBSCTL_RETENTION_MONTHLY")
            .and_then(|v| v.parse::<MonthlyRetention>().ok())
        {
            self.retention.monthly = monthly;
        }

        // Logging
        if let Some(level) = lookup("EBSCTL_LOG_LEVEL") {
            self.logging.level = level;
        }
        if let Some(dir) = lookup("EBSCTL_LOG_DIR") {
            self.logging.log_dir = Some(PathBuf::from(dir));
            self.logging.file_logging_enabled = true;
        }
        if let Some(json) = lookup("EBSCTL_LOG_JSON") {
            self.logging.json = json.parse().unwrap_or(false);
        }
    }

    /// Generate a sample configuration file
    pub fn generate_sample() -> String {
        let config = Self::default();
        toml::to_string_pretty(&config).unwrap_or_default()
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.provider.region.trim().is_empty() {
            return Err(ConfigError::Validation("Region cannot be empty".to_string()));
        }

        if self.provider.request_timeout_secs == 0 {
            return Err(ConfigError::Validation(
                "Request timeout cannot be 0".to_string(),
            ));
        }

        let endpoint = Url::parse(&self.provider.endpoint).map_err(|e| {
            ConfigError::Validation(format!("Invalid endpoint '{}': {}", self.provider.endpoint, e))
        })?;
        if !matches!(endpoint.scheme(), "http" | "https") {
            return Err(ConfigError::Validation(format!(
                "Endpoint '{}' must use http or https",
                self.provider.endpoint
            )));
        }

        if self.polling.max_attempts == Some(0) {
            return Err(ConfigError::Validation(
                "polling.max_attempts must be at least 1".to_string(),
            ));
        }

        Ok(())
    }
}

/// Configuration errors
#[derive(Debug, Clone, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config file {0:?}: {1}")]
    FileRead(PathBuf, String),

    #[error("Failed to parse config: {0}")]
    Parse(String),

    #[error("Config validation failed: {0}")]
    Validation(String),
}
