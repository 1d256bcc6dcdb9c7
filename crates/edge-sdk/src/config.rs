//! Pipeline configuration.

use std::path::Path;

use anyhow::{Context, Result};
use edge_cache::CacheConfig;
use edge_data::FetchConfig;
use edge_executor::ComposeConfig;
use edge_observability::LoggingConfig;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Pipeline configuration file.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PipelineConfig {
    /// Cache store configuration.
    #[serde(default)]
    pub cache: CacheConfig,

    /// Fetch scheduler configuration.
    #[serde(default)]
    pub fetch: FetchConfig,

    /// Composition configuration.
    #[serde(default)]
    pub compose: ComposeConfig,

    /// Logging configuration.
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Invalid configuration values.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigError {
    #[error("cache.lock_stripes must be at least 1")]
    NoLockStripes,

    #[error("cache.tiers must name at least one tier")]
    NoTiers,

    #[error("fetch.default_timeout_ms must be greater than 0")]
    ZeroTimeout,

    #[error("compose.channel_capacity must be at least 1")]
    ZeroChannelCapacity,

    #[error("logging.filter is invalid: {0}")]
    InvalidFilter(String),
}

impl PipelineConfig {
    /// Load and validate config from a file.
    ///
    /// `.json` files are read as JSON, anything else as TOML.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        let config: Self = if is_json(path) {
            serde_json::from_str(&content)
                .with_context(|| format!("Failed to parse JSON config: {}", path.display()))?
        } else {
            toml::from_str(&content)
                .with_context(|| format!("Failed to parse TOML config: {}", path.display()))?
        };

        config
            .validate()
            .with_context(|| format!("Invalid config: {}", path.display()))?;
        Ok(config)
    }

    /// Save config to a file.
    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();
        let content = if is_json(path) {
            serde_json::to_string_pretty(self)?
        } else {
            toml::to_string_pretty(self)?
        };

        std::fs::write(path, content)
            .with_context(|| format!("Failed to write config file: {}", path.display()))
    }

    /// Check values that would make the pipeline unusable.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.cache.lock_stripes == 0 {
            return Err(ConfigError::NoLockStripes);
        }
        if self.cache.tiers.is_empty() {
            return Err(ConfigError::NoTiers);
        }
        if self.fetch.default_timeout_ms == 0 {
            return Err(ConfigError::ZeroTimeout);
        }
        if self.compose.channel_capacity == 0 {
            return Err(ConfigError::ZeroChannelCapacity);
        }
        // RUST_LOG wins at runtime, but the configured filter must still parse.
        if let Err(e) = self.logging.configured_filter() {
            return Err(ConfigError::InvalidFilter(format!("{:#}", e)));
        }
        Ok(())
    }
}

fn is_json(path: &Path) -> bool {
    path.extension().is_some_and(|ext| ext == "json")
}
