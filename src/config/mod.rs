//! Application configuration.
//!
//! Aggregates the configuration of every stage into a single Config struct
//! loaded from a YAML file and environment variables.

mod stage;

pub use stage::{StageConfig, StageOptions};

use std::time::Duration;

use serde::de::Error as _;
use serde::{Deserialize, Deserializer};

#[cfg(feature = "sqlite")]
use crate::db::DbConfig;
use crate::reactor::ReactorConfig;
use crate::relay::CoreConfig;

/// Default configuration file path.
pub const DEFAULT_CONFIG_FILE: &str = "/etc/reactobus.yaml";
/// Environment variable for configuration file path.
pub const CONFIG_ENV_VAR: &str = "REACTOBUS_CONFIG";
/// Prefix for configuration environment variables.
pub const CONFIG_ENV_PREFIX: &str = "REACTOBUS";
/// Environment variable for logging configuration.
pub const LOG_ENV_VAR: &str = "REACTOBUS_LOG";

/// Errors raised while loading configuration.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Unable to load configuration: {0}")]
    Load(#[from] ::config::ConfigError),

    #[error("Invalid YAML configuration: {0}")]
    Yaml(#[from] serde_yaml::Error),
}

/// Main application configuration.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Core relay endpoints.
    pub core: CoreConfig,
    /// Stages feeding the core.
    pub inputs: Vec<StageConfig>,
    /// Stages republishing the core stream.
    pub outputs: Vec<StageConfig>,
    /// Command reactor (optional).
    pub reactor: Option<ReactorConfig>,
    /// Message archive (optional).
    #[cfg(feature = "sqlite")]
    pub db: Option<DbConfig>,
}

impl Config {
    /// Load configuration from file and environment.
    ///
    /// Configuration sources (later overrides earlier):
    /// 1. File given by `path`, else `CONFIG_ENV_VAR`, else `DEFAULT_CONFIG_FILE`
    /// 2. Environment variables with `CONFIG_ENV_PREFIX` prefix and `__` separator
    pub fn load(path: Option<&str>) -> Result<Self, ConfigError> {
        use ::config::{Config as ConfigLib, Environment, File, FileFormat};

        let path = path
            .map(str::to_owned)
            .or_else(|| std::env::var(CONFIG_ENV_VAR).ok())
            .unwrap_or_else(|| DEFAULT_CONFIG_FILE.to_string());

        let config = ConfigLib::builder()
            .add_source(File::new(&path, FileFormat::Yaml).required(true))
            .add_source(
                Environment::with_prefix(CONFIG_ENV_PREFIX)
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        Ok(config.try_deserialize()?)
    }

    /// Parse an inline YAML document.
    pub fn from_yaml(yaml: &str) -> Result<Self, ConfigError> {
        Ok(serde_yaml::from_str(yaml)?)
    }
}

/// Deserialize a duration given in (fractional) seconds.
pub fn deserialize_seconds<'de, D>(deserializer: D) -> Result<Duration, D::Error>
where
    D: Deserializer<'de>,
{
    let seconds = f64::deserialize(deserializer)?;
    Duration::try_from_secs_f64(seconds)
        .map_err(|_| D::Error::custom(format!("invalid duration: {} seconds", seconds)))
}
