//! Store configuration via `haystack.toml`
//!
//! On first open of a data directory a default `haystack.toml` is created.
//! To change settings, edit the file and reopen the store.

use haystack_core::{DurabilityMode, HaystackError, Result};
use haystack_durability::PileConfig;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// Config file name placed in the data directory.
pub const CONFIG_FILE_NAME: &str = "haystack.toml";

/// Default rotation threshold: 256MB
pub const DEFAULT_MAX_PILE_SIZE: u64 = 256 * 1024 * 1024;

/// Default lifetime of cached pile bytes for cached stores
pub const DEFAULT_READ_CACHE_TTL_SECS: u64 = 60;

/// Store configuration loaded from `haystack.toml`.
///
/// # Example
///
/// ```toml
/// max_pile_size = 268435456
/// durability = "always"
/// read_cache_ttl_secs = 60
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HaystackConfig {
    /// Rotation threshold in bytes (minimum 1024).
    #[serde(default = "default_max_pile_size")]
    pub max_pile_size: u64,
    /// Durability mode: `"always"` or `"cache"`.
    #[serde(default = "default_durability_str")]
    pub durability: String,
    /// Seconds a pile copy stays valid in the read cache of a store opened
    /// with `open_dir_cached`.
    #[serde(default = "default_read_cache_ttl_secs")]
    pub read_cache_ttl_secs: u64,
}

fn default_max_pile_size() -> u64 {
    DEFAULT_MAX_PILE_SIZE
}

fn default_durability_str() -> String {
    "always".to_string()
}

fn default_read_cache_ttl_secs() -> u64 {
    DEFAULT_READ_CACHE_TTL_SECS
}

impl Default for HaystackConfig {
    fn default() -> Self {
        HaystackConfig {
            max_pile_size: default_max_pile_size(),
            durability: default_durability_str(),
            read_cache_ttl_secs: default_read_cache_ttl_secs(),
        }
    }
}

impl HaystackConfig {
    /// Create a configuration with default values.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the rotation threshold (builder pattern).
    pub fn with_max_pile_size(mut self, size: u64) -> Self {
        self.max_pile_size = size;
        self
    }

    /// Set the durability mode (builder pattern).
    pub fn with_durability(mut self, mode: DurabilityMode) -> Self {
        self.durability = match mode {
            DurabilityMode::Always => "always",
            DurabilityMode::Cache => "cache",
        }
        .to_string();
        self
    }

    /// Set how long cached pile bytes are served before a reload (builder pattern).
    pub fn with_read_cache_ttl(mut self, ttl: Duration) -> Self {
        self.read_cache_ttl_secs = ttl.as_secs();
        self
    }

    /// Create a configuration optimized for testing (small piles).
    pub fn for_testing() -> Self {
        HaystackConfig {
            max_pile_size: 64 * 1024,
            durability: default_durability_str(),
            read_cache_ttl_secs: default_read_cache_ttl_secs(),
        }
    }

    /// Lifetime of cached pile bytes
    pub fn read_cache_ttl(&self) -> Duration {
        Duration::from_secs(self.read_cache_ttl_secs)
    }

    /// Parse the durability string into a `DurabilityMode`.
    pub fn durability_mode(&self) -> std::result::Result<DurabilityMode, ConfigError> {
        match self.durability.as_str() {
            "always" => Ok(DurabilityMode::Always),
            "cache" => Ok(DurabilityMode::Cache),
            other => Err(ConfigError::InvalidDurability(other.to_string())),
        }
    }

    /// Validate configuration.
    pub fn validate(&self) -> std::result::Result<(), ConfigError> {
        if self.max_pile_size < PileConfig::MIN_PILE_SIZE {
            return Err(ConfigError::PileSizeTooSmall {
                actual: self.max_pile_size,
                min: PileConfig::MIN_PILE_SIZE,
            });
        }
        self.durability_mode()?;
        Ok(())
    }

    /// Pile settings derived from this configuration
    pub fn pile_config(&self) -> std::result::Result<PileConfig, ConfigError> {
        self.validate()?;
        Ok(PileConfig::new()
            .with_max_pile_size(self.max_pile_size)
            .with_durability(self.durability_mode()?))
    }

    /// Returns the default config file content with comments.
    pub fn default_toml() -> &'static str {
        r#"# Haystack store configuration
#
# Rotation threshold in bytes (minimum 1024, default 256 MiB).
# A put that would push a non-empty pile past this size starts a new pile.
max_pile_size = 268435456

# Durability mode: "always" (default) or "cache"
#   "always" = fsync the pile and the index on every put
#   "cache"  = leave flushing to the OS; a crash may lose recent puts
durability = "always"

# Seconds a pile copy is served from memory before it is reloaded from disk.
# Only used by stores opened with a read cache.
read_cache_ttl_secs = 60
"#
    }

    /// Read and parse config from a file path.
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            HaystackError::Config(format!(
                "failed to read config file '{}': {}",
                path.display(),
                e
            ))
        })?;
        let config: HaystackConfig = toml::from_str(&content).map_err(|e| {
            HaystackError::Config(format!(
                "failed to parse config file '{}': {}",
                path.display(),
                e
            ))
        })?;
        config.validate()?;
        Ok(config)
    }

    /// Write the default config file if it does not already exist.
    pub fn write_default_if_missing(path: &Path) -> Result<()> {
        if !path.exists() {
            std::fs::write(path, Self::default_toml()).map_err(|e| {
                HaystackError::Config(format!(
                    "failed to write default config file '{}': {}",
                    path.display(),
                    e
                ))
            })?;
        }
        Ok(())
    }

    /// Serialize this config to TOML and write it to the given path.
    pub fn write_to_file(&self, path: &Path) -> Result<()> {
        let content = toml::to_string_pretty(self)
            .map_err(|e| HaystackError::Config(format!("failed to serialize config: {}", e)))?;
        std::fs::write(path, content).map_err(|e| {
            HaystackError::Config(format!(
                "failed to write config file '{}': {}",
                path.display(),
                e
            ))
        })
    }
}

/// Configuration errors.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConfigError {
    /// Durability string is not a known mode
    #[error("invalid durability mode '{0}', expected \"always\" or \"cache\"")]
    InvalidDurability(String),

    /// Rotation threshold is below the minimum
    #[error("max_pile_size must be at least {min}, got {actual}")]
    PileSizeTooSmall {
        /// Configured value
        actual: u64,
        /// Smallest accepted value
        min: u64,
    },
}

impl From<ConfigError> for HaystackError {
    fn from(e: ConfigError) -> Self {
        HaystackError::Config(e.to_string())
    }
}
