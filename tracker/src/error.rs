//! Error types for the DevBoost tracker.
//!
//! Each subsystem owns a narrow `thiserror` enum; [`TrackerError`] wraps them
//! for callers that cross subsystem boundaries.

use thiserror::Error;

use crate::api::ApiError;
use crate::config::ConfigError;
use crate::login::LoginError;
use crate::store::StoreError;
use crate::utils::DebouncerError;
use crate::watcher::WatcherError;

/// Errors that can occur during tracker operations.
///
/// # Examples
///
/// ```ignore
/// use devboost_tracker::error::TrackerError;
///
/// fn read_event(line: &str) -> Result<EditorEvent, TrackerError> {
///     Ok(serde_json::from_str(line)?)
/// }
/// ```
#[derive(Error, Debug)]
pub enum TrackerError {
    /// Configuration-related error.
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),

    /// File system I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON parsing or serialization error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Local cache error.
    #[error("store error: {0}")]
    Store(#[from] StoreError),

    /// Remote API error.
    #[error("API error: {0}")]
    Api(#[from] ApiError),

    /// File watching error.
    #[error("file watch error: {0}")]
    Watch(#[from] WatcherError),

    /// Debouncer error.
    #[error("debounce error: {0}")]
    Debounce(#[from] DebouncerError),

    /// Login flow error.
    #[error("login error: {0}")]
    Login(#[from] LoginError),
}

/// A specialized `Result` type for tracker operations.
pub type Result<T> = std::result::Result<T, TrackerError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn config_error_invalid_value_display() {
        let err = ConfigError::InvalidValue {
            key: "DEVBOOST_SESSION_TIMEOUT_SECS".to_string(),
            message: "expected positive integer".to_string(),
        };
        assert_eq!(
            err.to_string(),
            "invalid value for DEVBOOST_SESSION_TIMEOUT_SECS: expected positive integer"
        );
    }

    #[test]
    fn tracker_error_config_display() {
        let err = TrackerError::Config(ConfigError::NoHomeDirectory);
        assert_eq!(
            err.to_string(),
            "configuration error: failed to determine home directory"
        );
    }

    #[test]
    fn tracker_error_io_conversion() {
        let io_err = std::io::Error::new(std::io::ErrorKind::NotFound, "file not found");
        let err: TrackerError = io_err.into();
        assert!(matches!(err, TrackerError::Io(_)));
        assert!(err.to_string().contains("I/O error"));
    }

    #[test]
    fn tracker_error_json_conversion() {
        let json_err = serde_json::from_str::<serde_json::Value>("{ invalid json }").unwrap_err();
        let err: TrackerError = json_err.into();
        assert!(matches!(err, TrackerError::Json(_)));
        assert!(err.to_string().contains("JSON error"));
    }

    #[test]
    fn tracker_error_api_display() {
        let err: TrackerError = ApiError::Unauthorized.into();
        assert!(matches!(err, TrackerError::Api(_)));
        assert!(err.to_string().starts_with("API error: "));
    }

    #[test]
    fn tracker_error_watch_display() {
        let err: TrackerError = WatcherError::InitError("inotify limit reached".to_string()).into();
        assert!(err.to_string().contains("inotify limit reached"));
    }

    #[test]
    fn error_source_chain() {
        use std::error::Error;

        let io_err = std::io::Error::new(std::io::ErrorKind::PermissionDenied, "access denied");
        let err: TrackerError = StoreError::Io(io_err).into();

        assert!(err.source().is_some());
    }
}
