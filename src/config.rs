//! Application configuration
//!
//! Settings are grouped by named environment: one table per environment in
//! the settings file, optionally overridden by `GPS_INGEST__<ENV>__<KEY>`
//! environment variables.

use std::net::{SocketAddr, ToSocketAddrs};
use std::path::{Path, PathBuf};
use std::time::Duration;

use config::{Config, ConfigError, Environment, File};
use serde::Deserialize;
use serde_with::serde_as;
use tracing::warn;

use crate::errors::IngestError;

/// Settings file looked up when none is given on the command line.
pub const DEFAULT_CONFIG_PATH: &str = "settings";

/// How a connection is served after its first message.
#[derive(Debug, Deserialize, Clone, Copy, Default, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum InteractionMode {
    /// Single bounded read, no reply, close.
    #[default]
    FireAndForget,
    /// Reply to every message and keep reading until the peer closes.
    Acknowledged,
}

#[serde_as]
#[derive(Debug, Deserialize, Clone)]
pub struct EnvironmentConfig {
    pub ip_address: String,
    pub port_number: u16,
    pub database_url: String,
    pub log_folder_path: PathBuf,
    #[serde(default = "default_workers")]
    pub workers: usize,
    #[serde(default = "default_backlog")]
    pub backlog: i32,
    #[serde(default = "default_replicas")]
    pub replicas: usize,
    #[serde(default = "default_max_message_bytes")]
    pub max_message_bytes: usize,
    #[serde(default)]
    pub mode: InteractionMode,
    #[serde_as(as = "serde_with::DurationSeconds<u64>")]
    #[serde(default = "default_log_poll_interval")]
    pub log_poll_interval: Duration,
    #[serde_as(as = "serde_with::DurationSeconds<u64>")]
    #[serde(default = "default_shutdown_grace")]
    pub shutdown_grace: Duration,
    /// Longest wait for a client to send data before the connection is dropped
    #[serde_as(as = "serde_with::DurationSeconds<u64>")]
    #[serde(default = "default_read_timeout")]
    pub read_timeout: Duration,
}

fn default_workers() -> usize {
    2
}

fn default_backlog() -> i32 {
    1000
}

fn default_replicas() -> usize {
    2
}

fn default_max_message_bytes() -> usize {
    1024
}

fn default_log_poll_interval() -> Duration {
    Duration::from_secs(1)
}

fn default_shutdown_grace() -> Duration {
    Duration::from_secs(10)
}

fn default_read_timeout() -> Duration {
    Duration::from_secs(30)
}

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub environment: String,
    pub settings: EnvironmentConfig,
}

impl AppConfig {
    /// Load the settings of environment `env` from `path` and the process environment.
    pub fn load(path: impl AsRef<Path>, env: &str) -> Result<Self, IngestError> {
        let path = path.as_ref().to_string_lossy().into_owned();
        let config = Config::builder()
            .add_source(File::with_name(&path).required(false))
            .add_source(
                Environment::with_prefix("GPS_INGEST")
                    .prefix_separator("__")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        Self::from_config(&config, env)
    }

    fn from_config(config: &Config, env: &str) -> Result<Self, IngestError> {
        match config.get_table(env) {
            Ok(_) => {}
            Err(ConfigError::NotFound(_)) => {
                return Err(IngestError::UnknownEnvironment(env.to_string()))
            }
            Err(e) => return Err(e.into()),
        }

        let settings: EnvironmentConfig = config.get(env)?;
        settings.validate()?;

        Ok(Self {
            environment: env.to_string(),
            settings,
        })
    }
}

impl EnvironmentConfig {
    /// Validate configuration parameters
    pub fn validate(&self) -> Result<(), IngestError> {
        if self.workers == 0 {
            return Err(IngestError::invalid_config("workers must be greater than zero"));
        }
        if self.replicas == 0 {
            return Err(IngestError::invalid_config("replicas must be greater than zero"));
        }
        if self.max_message_bytes == 0 {
            return Err(IngestError::invalid_config(
                "max_message_bytes must be greater than zero",
            ));
        }
        if self.database_url.trim().is_empty() {
            return Err(IngestError::invalid_config("database_url cannot be empty"));
        }
        if self.log_folder_path.as_os_str().is_empty() {
            return Err(IngestError::invalid_config("log_folder_path cannot be empty"));
        }
        if self.log_poll_interval.is_zero() {
            return Err(IngestError::invalid_config(
                "log_poll_interval must be greater than zero",
            ));
        }
        if self.read_timeout.is_zero() {
            return Err(IngestError::invalid_config(
                "read_timeout must be greater than zero",
            ));
        }
        if self.backlog <= 0 {
            warn!(backlog = self.backlog, "Non-positive listen backlog, the OS default applies");
        }
        Ok(())
    }

    /// Resolve `ip_address:port_number` to a socket address
    pub fn socket_addr(&self) -> Result<SocketAddr, IngestError> {
        (self.ip_address.as_str(), self.port_number)
            .to_socket_addrs()?
            .next()
            .ok_or_else(|| {
                IngestError::invalid_config(format!(
                    "could not resolve {}:{}",
                    self.ip_address, self.port_number
                ))
            })
    }
}

#[cfg(test)]
pub(crate) fn test_settings(
    database_url: impl Into<String>,
    log_folder_path: impl Into<PathBuf>,
) -> EnvironmentConfig {
    EnvironmentConfig {
        ip_address: "127.0.0.1".to_string(),
        port_number: 0,
        database_url: database_url.into(),
        log_folder_path: log_folder_path.into(),
        workers: default_workers(),
        backlog: default_backlog(),
        replicas: 1,
        max_message_bytes: default_max_message_bytes(),
        mode: InteractionMode::FireAndForget,
        log_poll_interval: Duration::from_millis(50),
        shutdown_grace: default_shutdown_grace(),
        read_timeout: default_read_timeout(),
    }
}
