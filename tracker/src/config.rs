//! Configuration module for DevBoost Tracker.
//!
//! This module handles parsing configuration from environment variables.
//!
//! # Environment Variables
//!
//! | Variable | Required | Default | Description |
//! |----------|----------|---------|-------------|
//! | `DEVBOOST_API_URL` | No | `https://api.dev-boost.com` | Remote API base URL |
//! | `DEVBOOST_DATA_DIR` | No | `~/.devboost` | Local cache directory |
//! | `DEVBOOST_WORKSPACES` | No | current directory | Comma-separated workspace roots |
//! | `DEVBOOST_SESSION_TIMEOUT_SECS` | No | 60 | Length of an activity session window |
//! | `DEVBOOST_DEBOUNCE_MS` | No | 50 | Debounce window for document changes |
//! | `DEVBOOST_REQUEST_TIMEOUT_SECS` | No | 20 | HTTP request timeout |
//! | `DEVBOOST_TRACK_UNCOMMITTED` | No | `true` | Enables uncommitted change tracking |
//! | `DEVBOOST_EDITOR_NAME` | No | `devboost-tracker` | Editor name reported to the service |
//! | `DEVBOOST_EDITOR_VERSION` | No | crate version | Editor version reported to the service |
//! | `DEVBOOST_LOGIN_PORT` | No | 3008 | Local port for the login callback |
//!
//! # Example
//!
//! ```no_run
//! use devboost_tracker::config::Config;
//!
//! let config = Config::from_env().expect("Failed to load configuration");
//! println!("API URL: {}", config.api_url);
//! ```

use std::env;
use std::path::PathBuf;
use std::time::Duration;

use directories::BaseDirs;
use thiserror::Error;

use crate::session::DEFAULT_SESSION_SECS;
use crate::utils::DEFAULT_DEBOUNCE_MS;

/// Default remote API base URL.
pub const DEFAULT_API_URL: &str = "https://api.dev-boost.com";

/// Default data directory name relative to home.
const DEFAULT_DATA_DIR: &str = ".devboost";

/// Default HTTP request timeout in seconds.
pub const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 20;

/// Default editor name reported in records and the user agent.
const DEFAULT_EDITOR_NAME: &str = "devboost-tracker";

/// Default port for the local login callback listener.
pub const DEFAULT_LOGIN_PORT: u16 = 3008;

/// Errors that can occur during configuration parsing.
#[derive(Error, Debug)]
pub enum ConfigError {
    /// Environment variable has an invalid value.
    #[error("invalid value for {key}: {message}")]
    InvalidValue { key: String, message: String },

    /// Failed to determine home directory.
    #[error("failed to determine home directory")]
    NoHomeDirectory,
}

/// Configuration for the DevBoost Tracker.
#[derive(Debug, Clone)]
pub struct Config {
    /// Base URL of the remote API (no trailing slash).
    pub api_url: String,

    /// Directory holding the local cache files.
    pub data_dir: PathBuf,

    /// Workspace roots whose files are tracked.
    pub workspaces: Vec<PathBuf>,

    /// Fixed length of an activity session.
    pub session_timeout: Duration,

    /// Debounce window applied to document change events.
    pub debounce: Duration,

    /// Timeout applied to every HTTP request.
    pub request_timeout: Duration,

    /// Whether uncommitted change tracking is enabled.
    pub track_uncommitted: bool,

    /// Editor name reported to the service.
    pub editor_name: String,

    /// Editor version reported to the service.
    pub editor_version: String,

    /// Local port the login callback listens on.
    pub login_port: u16,
}

impl Config {
    /// Creates a new `Config` by parsing environment variables.
    ///
    /// # Errors
    ///
    /// Returns a `ConfigError` if:
    /// - A numeric variable is set but is not a positive integer
    /// - `DEVBOOST_TRACK_UNCOMMITTED` is not a boolean
    /// - The home directory cannot be determined and `DEVBOOST_DATA_DIR` is unset
    pub fn from_env() -> Result<Self, ConfigError> {
        let api_url = env::var("DEVBOOST_API_URL")
            .map(|url| url.trim_end_matches('/').to_string())
            .unwrap_or_else(|_| DEFAULT_API_URL.to_string());

        // Optional: DEVBOOST_DATA_DIR (default: ~/.devboost)
        let data_dir = match env::var("DEVBOOST_DATA_DIR") {
            Ok(dir) => PathBuf::from(dir),
            Err(_) => {
                let base_dirs = BaseDirs::new().ok_or(ConfigError::NoHomeDirectory)?;
                base_dirs.home_dir().join(DEFAULT_DATA_DIR)
            }
        };

        let workspaces = match env::var("DEVBOOST_WORKSPACES") {
            Ok(val) => val
                .split(',')
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(PathBuf::from)
                .collect(),
            Err(_) => env::current_dir().map(|dir| vec![dir]).unwrap_or_default(),
        };

        let session_timeout = Duration::from_secs(parse_positive(
            "DEVBOOST_SESSION_TIMEOUT_SECS",
            DEFAULT_SESSION_SECS,
        )?);

        // Zero is allowed here: it disables coalescing
        let debounce_ms = match env::var("DEVBOOST_DEBOUNCE_MS") {
            Ok(val) => val.parse::<u64>().map_err(|_| ConfigError::InvalidValue {
                key: "DEVBOOST_DEBOUNCE_MS".to_string(),
                message: format!("expected non-negative integer, got '{val}'"),
            })?,
            Err(_) => DEFAULT_DEBOUNCE_MS,
        };

        let request_timeout = Duration::from_secs(parse_positive(
            "DEVBOOST_REQUEST_TIMEOUT_SECS",
            DEFAULT_REQUEST_TIMEOUT_SECS,
        )?);

        let track_uncommitted = match env::var("DEVBOOST_TRACK_UNCOMMITTED") {
            Ok(val) => parse_bool(&val).ok_or_else(|| ConfigError::InvalidValue {
                key: "DEVBOOST_TRACK_UNCOMMITTED".to_string(),
                message: format!("expected true/false, got '{val}'"),
            })?,
            Err(_) => true,
        };

        let editor_name =
            env::var("DEVBOOST_EDITOR_NAME").unwrap_or_else(|_| DEFAULT_EDITOR_NAME.to_string());
        let editor_version = env::var("DEVBOOST_EDITOR_VERSION")
            .unwrap_or_else(|_| env!("CARGO_PKG_VERSION").to_string());

        let login_port = match env::var("DEVBOOST_LOGIN_PORT") {
            Ok(val) => val.parse::<u16>().map_err(|_| ConfigError::InvalidValue {
                key: "DEVBOOST_LOGIN_PORT".to_string(),
                message: format!("expected port number, got '{val}'"),
            })?,
            Err(_) => DEFAULT_LOGIN_PORT,
        };

        Ok(Self {
            api_url,
            data_dir,
            workspaces,
            session_timeout,
            debounce: Duration::from_millis(debounce_ms),
            request_timeout,
            track_uncommitted,
            editor_name,
            editor_version,
            login_port,
        })
    }

    /// Returns the user agent sent with every API request.
    #[must_use]
    pub fn user_agent(&self) -> String {
        format!(
            "{}/{} devboost-tracker/{}",
            self.editor_name,
            self.editor_version,
            env!("CARGO_PKG_VERSION")
        )
    }
}

/// Parses a positive integer variable, falling back to `default` when unset.
fn parse_positive(key: &str, default: u64) -> Result<u64, ConfigError> {
    match env::var(key) {
        Ok(val) => {
            let parsed = val.parse::<u64>().map_err(|_| ConfigError::InvalidValue {
                key: key.to_string(),
                message: format!("expected positive integer, got '{val}'"),
            })?;
            if parsed == 0 {
                return Err(ConfigError::InvalidValue {
                    key: key.to_string(),
                    message: "value must be greater than 0".to_string(),
                });
            }
            Ok(parsed)
        }
        Err(_) => Ok(default),
    }
}

fn parse_bool(val: &str) -> Option<bool> {
    match val.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}
