//! Loop configuration.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Configuration for the two control loops and their worker pool.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DaemonConfig {
    /// Polling loop tick interval (seconds).
    #[serde(default = "default_polling_interval")]
    pub polling_interval_secs: u64,

    /// Controller loop tick interval (seconds).
    #[serde(default = "default_controller_interval")]
    pub controller_interval_secs: u64,

    /// Maximum commands claimed per polling tick.
    #[serde(default = "default_polling_batch")]
    pub polling_batch: u32,

    /// Maximum in-flight commands scanned per controller tick.
    #[serde(default = "default_controller_batch")]
    pub controller_batch: u32,

    /// Retry budget: QUEUED re-attempts allowed before a command is
    /// trashed.
    #[serde(default = "default_max_retry")]
    pub max_retry: u32,

    /// Worker pool size shared by each loop's adapter calls.
    #[serde(default = "default_max_workers")]
    pub max_workers: u32,
}

fn default_polling_interval() -> u64 {
    5
}

fn default_controller_interval() -> u64 {
    10
}

fn default_polling_batch() -> u32 {
    5
}

fn default_controller_batch() -> u32 {
    5
}

fn default_max_retry() -> u32 {
    3
}

fn default_max_workers() -> u32 {
    4
}

impl Default for DaemonConfig {
    fn default() -> Self {
        Self {
            polling_interval_secs: default_polling_interval(),
            controller_interval_secs: default_controller_interval(),
            polling_batch: default_polling_batch(),
            controller_batch: default_controller_batch(),
            max_retry: default_max_retry(),
            max_workers: default_max_workers(),
        }
    }
}

impl DaemonConfig {
    /// Get the polling tick interval as a Duration.
    pub fn polling_interval(&self) -> Duration {
        Duration::from_secs(self.polling_interval_secs)
    }

    /// Get the controller tick interval as a Duration.
    pub fn controller_interval(&self) -> Duration {
        Duration::from_secs(self.controller_interval_secs)
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<(), String> {
        if self.polling_interval_secs == 0 {
            return Err("polling_interval_secs must be > 0".to_string());
        }
        if self.controller_interval_secs == 0 {
            return Err("controller_interval_secs must be > 0".to_string());
        }
        if self.polling_batch == 0 || self.controller_batch == 0 {
            return Err("batch sizes must be > 0".to_string());
        }
        if self.max_workers == 0 {
            return Err("max_workers must be > 0".to_string());
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = DaemonConfig::default();
        assert_eq!(config.polling_interval_secs, 5);
        assert_eq!(config.controller_interval_secs, 10);
        assert_eq!(config.max_retry, 3);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_duration_getters() {
        let config = DaemonConfig::default();
        assert_eq!(config.polling_interval(), Duration::from_secs(5));
        assert_eq!(config.controller_interval(), Duration::from_secs(10));
    }

    #[test]
    fn test_validate_rejects_zero_interval() {
        let mut config = DaemonConfig::default();
        config.polling_interval_secs = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_rejects_zero_batch() {
        let mut config = DaemonConfig::default();
        config.controller_batch = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_rejects_zero_workers() {
        let mut config = DaemonConfig::default();
        config.max_workers = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_deserialization_with_defaults() {
        let json = r#"{"max_retry": 7}"#;
        let config: DaemonConfig = serde_json::from_str(json).unwrap();
        assert_eq!(config.max_retry, 7);
        assert_eq!(config.polling_batch, 5);
    }
}
