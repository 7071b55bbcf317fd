//! Configuration management for harborr.
//!
//! Configuration is set via environment variables:
//! - `HOST` - Optional. Server host. Defaults to `127.0.0.1`.
//! - `PORT` - Optional. Server port. Defaults to `8080`.
//! - `DATA_DIR` - Optional. Directory for persisted stores. Defaults to `./data`.
//! - `DEV_MODE` - Optional. Disables the session guard for local dashboards.
//! - `TOKEN_KEY` - Optional. 32-byte hex/base64 key for encrypting agent
//!   tokens at rest; generated under `DATA_DIR` when absent.
//! - `PROBE_INTERVAL_SECS` - Optional. Health probe period per agent. Defaults to `30`.
//! - `PROBE_TIMEOUT_SECS` - Optional. Deadline for a single probe call. Defaults to `10`.
//! - `AGGREGATION_TIMEOUT_SECS` - Optional. Per-agent deadline during task
//!   aggregation. Defaults to `15`.

use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Invalid value for {0}: {1}")]
    InvalidValue(String, String),
}

/// Server configuration.
#[derive(Debug, Clone)]
pub struct Config {
    /// Server host
    pub host: String,

    /// Server port
    pub port: u16,

    /// Directory holding the JSON stores and the generated token key
    pub data_dir: PathBuf,

    /// When true, API endpoints skip the session guard
    pub dev_mode: bool,

    /// Interval between health probes of a single agent
    pub probe_interval: Duration,

    /// Deadline for one probe call
    pub probe_timeout: Duration,

    /// Deadline for one agent's task listing during aggregation
    pub aggregation_timeout: Duration,
}

fn env_secs(name: &str, default: u64) -> Result<Duration, ConfigError> {
    let secs = match std::env::var(name) {
        Ok(value) => value
            .parse()
            .map_err(|e| ConfigError::InvalidValue(name.to_string(), format!("{}", e)))?,
        Err(_) => default,
    };
    Ok(Duration::from_secs(secs))
}

impl Config {
    /// Load configuration from environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        let host = std::env::var("HOST").unwrap_or_else(|_| "127.0.0.1".to_string());

        let port = std::env::var("PORT")
            .unwrap_or_else(|_| "8080".to_string())
            .parse()
            .map_err(|e| ConfigError::InvalidValue("PORT".to_string(), format!("{}", e)))?;

        let data_dir = std::env::var("DATA_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("./data"));

        let dev_mode = matches!(
            std::env::var("DEV_MODE").as_deref(),
            Ok("1") | Ok("true") | Ok("yes") | Ok("on")
        );

        Ok(Self {
            host,
            port,
            data_dir,
            dev_mode,
            probe_interval: env_secs("PROBE_INTERVAL_SECS", 30)?,
            probe_timeout: env_secs("PROBE_TIMEOUT_SECS", 10)?,
            aggregation_timeout: env_secs("AGGREGATION_TIMEOUT_SECS", 15)?,
        })
    }

    /// Create a config with custom values (useful for testing).
    pub fn new(data_dir: PathBuf) -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 8080,
            data_dir,
            dev_mode: false,
            probe_interval: Duration::from_secs(30),
            probe_timeout: Duration::from_secs(10),
            aggregation_timeout: Duration::from_secs(15),
        }
    }
}
