//! Configuration Module
//!
//! Provides TOML-based configuration for mqti with support for:
//! - Broker connection settings (`[mqtt]`)
//! - Topic mappings and their filters (`[[mapping]]`)
//! - Dispatch limits (`[dispatch]`)
//! - Shutdown policy (`[shutdown]`)
//! - Environment variable overrides (MQTI__* prefix)

use std::path::Path;

use config::{Environment, File, FileFormat};
use regex::Regex;
use serde::Deserialize;

pub use broker::{BrokerConfig, Protocol};
pub use mapping::MappingConfig;

mod broker;
mod mapping;


/// Substitute environment variables in a string.
/// Supports `${VAR}` and `${VAR:-default}` syntax.
fn substitute_env_vars(content: &str) -> Result<String, ConfigError> {
    let re = Regex::new(r"\$\{([^}:]+)(?::-([^}]*))?\}")
        .map_err(|e| ConfigError::Validation(format!("env substitution pattern: {}", e)))?;
    Ok(re
        .replace_all(content, |caps: &regex::Captures| {
            let var_name = &caps[1];
            let default = caps.get(2).map(|m| m.as_str()).unwrap_or("");
            std::env::var(var_name).unwrap_or_else(|_| default.to_string())
        })
        .to_string())
}

/// Configuration error types
#[derive(Debug)]
pub enum ConfigError {
    /// IO error reading config file
    Io(std::io::Error),
    /// TOML parsing error
    Parse(toml::de::Error),
    /// Config crate error
    Config(config::ConfigError),
    /// Validation error
    Validation(String),
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigError::Io(e) => write!(f, "IO error: {}", e),
            ConfigError::Parse(e) => write!(f, "Parse error: {}", e),
            ConfigError::Config(e) => write!(f, "Config error: {}", e),
            ConfigError::Validation(msg) => write!(f, "Validation error: {}", msg),
        }
    }
}

impl std::error::Error for ConfigError {}

impl From<std::io::Error> for ConfigError {
    fn from(e: std::io::Error) -> Self {
        ConfigError::Io(e)
    }
}

impl From<toml::de::Error> for ConfigError {
    fn from(e: toml::de::Error) -> Self {
        ConfigError::Parse(e)
    }
}

impl From<config::ConfigError> for ConfigError {
    fn from(e: config::ConfigError) -> Self {
        ConfigError::Config(e)
    }
}

/// Root configuration structure
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct Config {
    /// Logging configuration
    pub log: LogConfig,
    /// Broker connection configuration
    pub mqtt: BrokerConfig,
    /// Dispatch limits
    pub dispatch: DispatchConfig,
    /// Shutdown behaviour
    pub shutdown: ShutdownConfig,
    /// Topic mappings, in declaration order
    pub mapping: Vec<MappingConfig>,
}

/// Logging configuration
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LogConfig {
    /// Log level: error, warn, info, debug, trace
    #[serde(default = "default_log_level")]
    pub level: String,
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

/// Dispatch limits
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct DispatchConfig {
    /// Capacity of the outbound channel between handlers and the consumer.
    /// Handlers wait for room when the consumer falls behind.
    #[serde(default = "default_outbound_channel_capacity")]
    pub outbound_channel_capacity: usize,
    /// Maximum number of message handlers running at once
    #[serde(default = "default_max_concurrent_handlers")]
    pub max_concurrent_handlers: usize,
}

fn default_outbound_channel_capacity() -> usize {
    1024
}

fn default_max_concurrent_handlers() -> usize {
    256
}

/// Upper bound for `dispatch.max_concurrent_handlers`
pub const MAX_CONCURRENT_HANDLERS_LIMIT: usize = 65_536;

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            outbound_channel_capacity: default_outbound_channel_capacity(),
            max_concurrent_handlers: default_max_concurrent_handlers(),
        }
    }
}

/// What to do when SIGINT/SIGTERM arrives
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ShutdownPolicy {
    /// Exit the process on the first signal without draining
    #[default]
    Immediate,
    /// Stop receiving, let in-flight handlers finish and close the outbound channel
    Drain,
}

/// Shutdown configuration
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct ShutdownConfig {
    pub policy: ShutdownPolicy,
}

/// Only the mapping list, read straight from the TOML document.
#[derive(Debug, Deserialize, Default)]
struct MappingFile {
    #[serde(default)]
    mapping: Vec<MappingConfig>,
}

impl Config {
    /// Load configuration from a TOML file with environment variable overrides.
    ///
    /// Supports two forms of environment variable usage:
    /// 1. In-file substitution: `${VAR}` or `${VAR:-default}` syntax in the TOML file
    /// 2. Override via env vars: `MQTI__` prefix with double underscores for nesting:
    ///    - `MQTI__MQTT__HOST=broker.local` overrides `mqtt.host`
    ///    - `MQTI__MQTT__CLIENT_ID=edge-01` overrides `mqtt.client_id`
    ///    - `MQTI__SHUTDOWN__POLICY=drain` overrides `shutdown.policy`
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let mut builder = config::Config::builder()
            .set_default("log.level", "info")?
            .set_default("mqtt.host", "localhost")?
            .set_default("mqtt.clean_session", false)?
            .set_default("mqtt.keep_alive", 60)?
            .set_default("mqtt.reconnect_interval", 1)?
            .set_default("mqtt.max_reconnect_interval", 60)?
            .set_default("mqtt.request_channel_capacity", 64)?
            .set_default("dispatch.outbound_channel_capacity", 1024)?
            .set_default("dispatch.max_concurrent_handlers", 256)?
            .set_default("shutdown.policy", "immediate")?;

        let path = path.as_ref();
        let mut mappings = Vec::new();
        match std::fs::read_to_string(path) {
            Ok(content) => {
                let substituted = substitute_env_vars(&content)?;
                // Filter keys are payload field names, so keep them exactly as written.
                mappings = toml::from_str::<MappingFile>(&substituted)?.mapping;
                builder = builder.add_source(File::from_str(&substituted, FileFormat::Toml));
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                // File doesn't exist, use defaults and environment
            }
            Err(e) => return Err(ConfigError::Io(e)),
        }

        let cfg = builder
            .add_source(
                Environment::with_prefix("MQTI")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        let mut config: Config = cfg.try_deserialize()?;
        config.mapping = mappings;
        config.validate()?;
        Ok(config)
    }

    /// Parse configuration from a string (for testing, no env var support)
    pub fn parse(content: &str) -> Result<Self, ConfigError> {
        let config: Config = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.mqtt.validate()?;

        if self.dispatch.outbound_channel_capacity == 0 {
            return Err(ConfigError::Validation(
                "dispatch.outbound_channel_capacity must be greater than 0".to_string(),
            ));
        }
        if self.dispatch.max_concurrent_handlers == 0 {
            return Err(ConfigError::Validation(
                "dispatch.max_concurrent_handlers must be greater than 0".to_string(),
            ));
        }
        if self.dispatch.max_concurrent_handlers > MAX_CONCURRENT_HANDLERS_LIMIT {
            return Err(ConfigError::Validation(format!(
                "dispatch.max_concurrent_handlers must be at most {}",
                MAX_CONCURRENT_HANDLERS_LIMIT
            )));
        }

        for (index, mapping) in self.mapping.iter().enumerate() {
            mapping.validate().map_err(|msg| {
                ConfigError::Validation(format!("mapping #{} ({}): {}", index, mapping.topic, msg))
            })?;
        }

        Ok(())
    }
}
