//! Configuration loading from disk and the environment.

use std::fs;
use std::path::Path;

use crate::config::schema::DispatcherConfig;
use crate::config::validation::{validate_config, ValidationError};

/// Environment variable overriding the listening port.
pub const PORT_ENV: &str = "PORT";
/// Environment variable overriding the worker count.
pub const CORES_ENV: &str = "CORES";

/// Error type for configuration loading.
#[derive(Debug)]
pub enum ConfigError {
    Io(std::io::Error),
    Parse(toml::de::Error),
    Env { name: &'static str, value: String },
    Validation(Vec<ValidationError>),
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigError::Io(e) => write!(f, "IO error: {}", e),
            ConfigError::Parse(e) => write!(f, "Parse error: {}", e),
            ConfigError::Env { name, value } => {
                write!(f, "Invalid value for {}: {:?}", name, value)
            }
            ConfigError::Validation(errors) => {
                write!(f, "Validation failed: ")?;
                for (i, err) in errors.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{}", err)?;
                }
                Ok(())
            }
        }
    }
}

impl std::error::Error for ConfigError {}

/// Parse a configuration from TOML text without validating it.
pub fn parse_config(content: &str) -> Result<DispatcherConfig, ConfigError> {
    toml::from_str(content).map_err(ConfigError::Parse)
}

/// Load a configuration from a TOML file without validating it.
pub fn read_config(path: &Path) -> Result<DispatcherConfig, ConfigError> {
    let content = fs::read_to_string(path).map_err(ConfigError::Io)?;
    parse_config(&content)
}

/// Load and validate configuration from a TOML file.
pub fn load_config(path: &Path) -> Result<DispatcherConfig, ConfigError> {
    let config = read_config(path)?;
    validate_config(&config).map_err(ConfigError::Validation)?;
    Ok(config)
}

/// Apply `PORT` / `CORES` overrides using the given variable lookup.
pub fn apply_env_overrides<F>(config: &mut DispatcherConfig, lookup: F) -> Result<(), ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    if let Some(value) = lookup(PORT_ENV) {
        config.listener.port = value.trim().parse().map_err(|_| ConfigError::Env {
            name: PORT_ENV,
            value: value.clone(),
        })?;
    }
    if let Some(value) = lookup(CORES_ENV) {
        config.cluster.workers = value.trim().parse().map_err(|_| ConfigError::Env {
            name: CORES_ENV,
            value: value.clone(),
        })?;
    }
    Ok(())
}
