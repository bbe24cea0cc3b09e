//! Error types for daemon configuration and startup.

use std::io;
use std::path::PathBuf;

use thiserror::Error;

/// Errors that abort the daemon during configuration or initialization.
///
/// Every variant is fatal: the binary logs it and exits non-zero. Runtime
/// conditions (watch registration failure, stale descriptors, failed child
/// actions) are logged and survived instead, and never appear here.
#[derive(Error, Debug)]
pub enum ConfigError {
    /// Setting present but missing its required parameter
    #[error("setting '{key}' requires a parameter")]
    MissingParameter { key: String },

    /// Setting or sync option with a value that fails validation
    #[error("invalid value for '{key}': {reason}")]
    InvalidValue { key: String, reason: String },

    /// Source directory that cannot be resolved to a real directory
    #[error("cannot resolve source directory: {}", path.display())]
    UnresolvableSource { path: PathBuf },

    /// Configuration contains no sync entries
    #[error("nothing to watch: no sync entries configured")]
    NothingToWatch,

    /// A configured startup command could not be spawned
    #[error("startup command failed to spawn for target '{target}'")]
    StartupSpawn { target: String },

    /// IO error reading the config file
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    /// Config file is not valid JSON or fails the schema
    #[error("config parse error: {0}")]
    Json(#[from] serde_json::Error),
}

impl ConfigError {
    /// Create an invalid-value error
    pub fn invalid_value(key: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidValue {
            key: key.into(),
            reason: reason.into(),
        }
    }
}

/// Result type alias for configuration operations
pub type ConfigResult<T> = Result<T, ConfigError>;
