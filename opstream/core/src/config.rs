//! Configuration
//!
//! The only tunable of the multiplexer is the per-subscriber queue capacity.
//! It can be set from a TOML file at `$XDG_CONFIG_HOME/opstream/opstream.toml`
//! and overridden from the environment.
//!
//! # Configuration Priority
//!
//! 1. Environment variables (`OPSTREAM_QUEUE_CAPACITY`)
//! 2. TOML configuration file
//! 3. Default values
//!
//! # Example Configuration
//!
//! ```toml
//! [streamer]
//! queue_capacity = 20
//! ```

use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Default capacity of each subscriber queue
pub const DEFAULT_QUEUE_CAPACITY: usize = 20;

/// Largest accepted capacity of a subscriber queue
pub const MAX_QUEUE_CAPACITY: usize = 65_536;

/// Environment variable overriding the queue capacity
pub const QUEUE_CAPACITY_ENV: &str = "OPSTREAM_QUEUE_CAPACITY";

// =============================================================================
// Error Types
// =============================================================================

/// Errors that can occur when loading configuration
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Failed to read config file
    #[error("Failed to read config file at {path}: {source}")]
    ReadError {
        /// The path that was attempted
        path: PathBuf,
        /// The underlying IO error
        source: std::io::Error,
    },

    /// Failed to parse TOML
    #[error("Failed to parse TOML config: {0}")]
    ParseError(#[from] toml::de::Error),

    /// Invalid configuration value
    #[error("Invalid configuration: {0}")]
    ValidationError(String),
}

/// Tracks where the configuration came from
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum ConfigSource {
    /// Value from environment variable
    Env,
    /// Value from TOML configuration file
    File,
    /// Default value
    Default,
}

impl std::fmt::Display for ConfigSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Env => write!(f, "environment"),
            Self::File => write!(f, "config file"),
            Self::Default => write!(f, "default"),
        }
    }
}

// =============================================================================
// Runtime Configuration
// =============================================================================

/// Settings for every [`Streamer`](crate::Streamer) built from this config
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct StreamerConfig {
    /// Capacity of each subscriber's queue
    ///
    /// When a queue is full, newly published messages are dropped for that
    /// subscriber only.
    pub queue_capacity: usize,
}

impl Default for StreamerConfig {
    fn default() -> Self {
        Self {
            queue_capacity: DEFAULT_QUEUE_CAPACITY,
        }
    }
}

impl StreamerConfig {
    /// Create a config with a specific queue capacity
    #[must_use]
    pub fn with_queue_capacity(queue_capacity: usize) -> Self {
        Self { queue_capacity }
    }

    /// Check that the values are usable
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::ValidationError` if the queue capacity is zero
    /// or above [`MAX_QUEUE_CAPACITY`].
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.queue_capacity == 0 {
            return Err(ConfigError::ValidationError(
                "streamer.queue_capacity must be greater than zero".to_string(),
            ));
        }
        if self.queue_capacity > MAX_QUEUE_CAPACITY {
            return Err(ConfigError::ValidationError(format!(
                "streamer.queue_capacity must be at most {MAX_QUEUE_CAPACITY}, got {}",
                self.queue_capacity
            )));
        }
        Ok(())
    }
}

/// Fully resolved configuration
#[derive(Clone, Debug)]
pub struct OpstreamConfig {
    /// Streamer settings
    pub streamer: StreamerConfig,
    /// Path to the config file that was loaded (if any)
    pub config_file_path: Option<PathBuf>,
    source: ConfigSource,
}

impl Default for OpstreamConfig {
    fn default() -> Self {
        Self {
            streamer: StreamerConfig::default(),
            config_file_path: None,
            source: ConfigSource::Default,
        }
    }
}

impl OpstreamConfig {
    /// Get the primary source of this configuration
    #[must_use]
    pub fn source(&self) -> ConfigSource {
        self.source
    }
}

// =============================================================================
// TOML Structures
// =============================================================================

/// Streamer section of the TOML configuration
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct StreamerToml {
    /// Per-subscriber queue capacity
    pub queue_capacity: Option<usize>,
}

/// Root of the TOML configuration file
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct OpstreamToml {
    /// `[streamer]` section
    pub streamer: StreamerToml,
}

// =============================================================================
// Loading
// =============================================================================

/// Get the default configuration file path
///
/// Returns `$XDG_CONFIG_HOME/opstream/opstream.toml`, or `None` when no
/// config directory can be determined.
#[must_use]
pub fn default_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|p| p.join("opstream").join("opstream.toml"))
}

/// Load configuration from the default path, defaults and environment
///
/// # Errors
///
/// Returns an error if the config file exists but cannot be parsed, or the
/// resulting values are invalid. A missing file is not an error.
pub fn load_config() -> Result<OpstreamConfig, ConfigError> {
    load_config_from_path(default_config_path())
}

/// Load configuration from a specific path
///
/// # Errors
///
/// Returns an error if the file cannot be read or parsed, or the resulting
/// values are invalid.
pub fn load_config_from_path(path: Option<PathBuf>) -> Result<OpstreamConfig, ConfigError> {
    let mut config = OpstreamConfig::default();

    if let Some(ref config_path) = path {
        if config_path.exists() {
            let toml_content =
                std::fs::read_to_string(config_path).map_err(|e| ConfigError::ReadError {
                    path: config_path.clone(),
                    source: e,
                })?;

            let toml_config: OpstreamToml = toml::from_str(&toml_content)?;
            apply_toml_config(&mut config, &toml_config);
            config.config_file_path = Some(config_path.clone());
            config.source = ConfigSource::File;

            tracing::info!(path = %config_path.display(), "Loaded configuration from file");
        } else {
            tracing::debug!(
                path = %config_path.display(),
                "Config file not found, using defaults"
            );
        }
    }

    apply_env_config(&mut config, std::env::var(QUEUE_CAPACITY_ENV).ok().as_deref())?;
    config.streamer.validate()?;

    Ok(config)
}

fn apply_toml_config(config: &mut OpstreamConfig, toml: &OpstreamToml) {
    if let Some(capacity) = toml.streamer.queue_capacity {
        config.streamer.queue_capacity = capacity;
    }
}

fn apply_env_config(config: &mut OpstreamConfig, capacity: Option<&str>) -> Result<(), ConfigError> {
    if let Some(raw) = capacity {
        let parsed = raw.trim().parse::<usize>().map_err(|e| {
            ConfigError::ValidationError(format!("{QUEUE_CAPACITY_ENV}={raw:?}: {e}"))
        })?;
        config.streamer.queue_capacity = parsed;
        config.source = ConfigSource::Env;
    }
    Ok(())
}
