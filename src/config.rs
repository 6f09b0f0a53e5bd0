//! Runtime configuration.
//!
//! Load order: built-in defaults, then the JSON file named by
//! `HOSTBRIDGE_CONFIG` (if set), then `HOSTBRIDGE_*` environment overrides.

use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

pub const CONFIG_PATH_ENV: &str = "HOSTBRIDGE_CONFIG";
pub const ENV_PREFIX: &str = "HOSTBRIDGE_";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse config file {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
    #[error("invalid value for {key}: {value:?}")]
    InvalidEnv { key: String, value: String },
    #[error("invalid config: {0}")]
    Invalid(String),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AppConfig {
    #[serde(default = "default_history_capacity")]
    pub history_capacity: usize,
    #[serde(default = "default_request_timeout_ms")]
    pub request_timeout_ms: u64,
    #[serde(default = "default_heartbeat_interval_ms")]
    pub heartbeat_interval_ms: u64,
    #[serde(default = "default_probe_timeout_ms")]
    pub probe_timeout_ms: u64,
    #[serde(default = "default_reconnect_delay_ms")]
    pub reconnect_delay_ms: u64,
    #[serde(default = "default_max_reconnect_attempts")]
    pub max_reconnect_attempts: u32,
    #[serde(default = "default_transition_log_size")]
    pub transition_log_size: usize,
    #[serde(default = "default_error_log_size")]
    pub error_log_size: usize,
    #[serde(default = "default_batch_flush_interval_ms")]
    pub batch_flush_interval_ms: u64,
    #[serde(default = "default_batch_max_size")]
    pub batch_max_size: usize,
    /// `tracing_subscriber` filter directive; `RUST_LOG` wins when set.
    #[serde(default)]
    pub log_filter: Option<String>,
}

fn default_history_capacity() -> usize {
    500
}

fn default_request_timeout_ms() -> u64 {
    5_000
}

fn default_heartbeat_interval_ms() -> u64 {
    5_000
}

fn default_probe_timeout_ms() -> u64 {
    3_000
}

fn default_reconnect_delay_ms() -> u64 {
    5_000
}

fn default_max_reconnect_attempts() -> u32 {
    10
}

fn default_transition_log_size() -> usize {
    20
}

fn default_error_log_size() -> usize {
    50
}

fn default_batch_flush_interval_ms() -> u64 {
    100
}

fn default_batch_max_size() -> usize {
    50
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            history_capacity: default_history_capacity(),
            request_timeout_ms: default_request_timeout_ms(),
            heartbeat_interval_ms: default_heartbeat_interval_ms(),
            probe_timeout_ms: default_probe_timeout_ms(),
            reconnect_delay_ms: default_reconnect_delay_ms(),
            max_reconnect_attempts: default_max_reconnect_attempts(),
            transition_log_size: default_transition_log_size(),
            error_log_size: default_error_log_size(),
            batch_flush_interval_ms: default_batch_flush_interval_ms(),
            batch_max_size: default_batch_max_size(),
            log_filter: None,
        }
    }
}

impl AppConfig {
    /// Defaults, then `HOSTBRIDGE_CONFIG`, then `HOSTBRIDGE_*` variables.
    pub fn load() -> Result<Self, ConfigError> {
        let mut config = match std::env::var_os(CONFIG_PATH_ENV) {
            Some(path) => Self::from_file(Path::new(&path))?,
            None => Self::default(),
        };
        config.apply_env_overrides(|key| std::env::var(key).ok())?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        serde_json::from_str(&raw).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    /// Apply `HOSTBRIDGE_<FIELD>` overrides using `lookup` to read variables.
    pub fn apply_env_overrides<F>(&mut self, lookup: F) -> Result<(), ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        override_from(&lookup, "HISTORY_CAPACITY", &mut self.history_capacity)?;
        override_from(&lookup, "REQUEST_TIMEOUT_MS", &mut self.request_timeout_ms)?;
        override_from(&lookup, "HEARTBEAT_INTERVAL_MS", &mut self.heartbeat_interval_ms)?;
        override_from(&lookup, "PROBE_TIMEOUT_MS", &mut self.probe_timeout_ms)?;
        override_from(&lookup, "RECONNECT_DELAY_MS", &mut self.reconnect_delay_ms)?;
        override_from(&lookup, "MAX_RECONNECT_ATTEMPTS", &mut self.max_reconnect_attempts)?;
        override_from(&lookup, "TRANSITION_LOG_SIZE", &mut self.transition_log_size)?;
        override_from(&lookup, "ERROR_LOG_SIZE", &mut self.error_log_size)?;
        override_from(&lookup, "BATCH_FLUSH_INTERVAL_MS", &mut self.batch_flush_interval_ms)?;
        override_from(&lookup, "BATCH_MAX_SIZE", &mut self.batch_max_size)?;
        if let Some(filter) = lookup(&format!("{ENV_PREFIX}LOG_FILTER")) {
            self.log_filter = Some(filter);
        }
        Ok(())
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.request_timeout_ms == 0 {
            return Err(ConfigError::Invalid("request_timeout_ms must be > 0".into()));
        }
        if self.heartbeat_interval_ms == 0 {
            return Err(ConfigError::Invalid("heartbeat_interval_ms must be > 0".into()));
        }
        if self.probe_timeout_ms == 0 {
            return Err(ConfigError::Invalid("probe_timeout_ms must be > 0".into()));
        }
        if self.probe_timeout_ms > self.heartbeat_interval_ms {
            return Err(ConfigError::Invalid(format!(
                "probe_timeout_ms ({}) exceeds heartbeat_interval_ms ({})",
                self.probe_timeout_ms, self.heartbeat_interval_ms
            )));
        }
        if self.reconnect_delay_ms == 0 {
            return Err(ConfigError::Invalid("reconnect_delay_ms must be > 0".into()));
        }
        if self.max_reconnect_attempts == 0 {
            return Err(ConfigError::Invalid("max_reconnect_attempts must be > 0".into()));
        }
        if self.batch_flush_interval_ms == 0 {
            return Err(ConfigError::Invalid("batch_flush_interval_ms must be > 0".into()));
        }
        Ok(())
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }

    pub fn heartbeat_interval(&self) -> Duration {
        Duration::from_millis(self.heartbeat_interval_ms)
    }

    pub fn probe_timeout(&self) -> Duration {
        Duration::from_millis(self.probe_timeout_ms)
    }

    pub fn reconnect_delay(&self) -> Duration {
        Duration::from_millis(self.reconnect_delay_ms)
    }

    pub fn batch_flush_interval(&self) -> Duration {
        Duration::from_millis(self.batch_flush_interval_ms)
    }
}

fn override_from<T, F>(lookup: &F, field: &str, target: &mut T) -> Result<(), ConfigError>
where
    T: FromStr,
    F: Fn(&str) -> Option<String>,
{
    let key = format!("{ENV_PREFIX}{field}");
    let Some(value) = lookup(&key) else {
        return Ok(());
    };
    *target = value
        .trim()
        .parse()
        .map_err(|_| ConfigError::InvalidEnv { key, value })?;
    Ok(())
}
