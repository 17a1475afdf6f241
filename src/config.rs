//! Broker configuration file loading.

use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;

use gridbroker_daemon::DaemonConfig;

/// Configuration errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Configuration file could not be read.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Configuration file could not be parsed.
    #[error("TOML error: {0}")]
    Toml(#[from] toml::de::Error),

    /// A `${VAR}` reference points at an unset environment variable.
    #[error("Environment variable not set: {0}")]
    EnvVarNotSet(String),
}

/// Top-level broker configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BrokerConfig {
    /// Relational store settings.
    #[serde(default)]
    pub database: DatabaseConfig,

    /// Loop and worker pool settings.
    #[serde(default)]
    pub daemon: DaemonConfig,

    /// Logging settings.
    #[serde(default)]
    pub log: LogConfig,
}

/// Database settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    /// Path of the SQLite database file.
    #[serde(default = "default_db_path")]
    pub path: PathBuf,
}

/// Logging settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogConfig {
    /// Directory for rotated log files.
    #[serde(default = "default_log_dir")]
    pub dir: PathBuf,
}

fn gridbroker_dir() -> PathBuf {
    dirs::home_dir()
        .map(|h| h.join(".gridbroker"))
        .unwrap_or_else(|| PathBuf::from(".gridbroker"))
}

fn default_db_path() -> PathBuf {
    gridbroker_dir().join("broker.db")
}

fn default_log_dir() -> PathBuf {
    gridbroker_dir().join("log")
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: default_db_path(),
        }
    }
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            dir: default_log_dir(),
        }
    }
}

/// Configuration loader with environment variable substitution.
pub struct ConfigLoader;

impl ConfigLoader {
    /// Load configuration from a TOML file.
    pub fn load(path: &Path) -> Result<BrokerConfig, ConfigError> {
        let content = fs::read_to_string(path)?;
        Self::load_str(&content)
    }

    /// Load configuration from a string.
    pub fn load_str(content: &str) -> Result<BrokerConfig, ConfigError> {
        let expanded = Self::expand_env_vars(content)?;
        let config: BrokerConfig = toml::from_str(&expanded)?;
        Ok(config)
    }

    /// Expand environment variables in the format `${VAR}`.
    fn expand_env_vars(content: &str) -> Result<String, ConfigError> {
        let mut result = content.to_string();
        let re = regex::Regex::new(r"\$\{([^}]+)\}").unwrap();

        for cap in re.captures_iter(content) {
            let var_name = &cap[1];
            let var_value = std::env::var(var_name)
                .map_err(|_| ConfigError::EnvVarNotSet(var_name.to_string()))?;
            result = result.replace(&cap[0], &var_value);
        }

        Ok(result)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_load_empty_config() {
        let config = ConfigLoader::load_str("").unwrap();
        assert_eq!(config.daemon.polling_interval_secs, 5);
        assert_eq!(config.daemon.max_retry, 3);
    }

    #[test]
    fn test_load_basic_config() {
        let content = r#"
            [database]
            path = "/var/lib/gridbroker/broker.db"

            [daemon]
            polling_interval_secs = 2
            max_retry = 5
        "#;
        let config = ConfigLoader::load_str(content).unwrap();
        assert_eq!(config.database.path, PathBuf::from("/var/lib/gridbroker/broker.db"));
        assert_eq!(config.daemon.polling_interval_secs, 2);
        assert_eq!(config.daemon.max_retry, 5);
        // Unset sections keep defaults.
        assert_eq!(config.daemon.max_workers, 4);
    }

    #[test]
    fn test_env_expansion() {
        unsafe { std::env::set_var("GRIDBROKER_TEST_DB", "/tmp/test.db") };
        let config = ConfigLoader::load_str("[database]\npath = \"${GRIDBROKER_TEST_DB}\"").unwrap();
        assert_eq!(config.database.path, PathBuf::from("/tmp/test.db"));
    }

    #[test]
    fn test_unset_env_var_is_an_error() {
        let result = ConfigLoader::load_str("[database]\npath = \"${GRIDBROKER_NO_SUCH_VAR}\"");
        assert!(matches!(result, Err(ConfigError::EnvVarNotSet(_))));
    }
}
