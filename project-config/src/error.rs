//! Error types for project configuration.

use std::path::PathBuf;

use thiserror::Error;

/// Result type alias for configuration operations.
pub type Result<T> = std::result::Result<T, ConfigError>;

/// Errors raised while reading a project configuration file.
///
/// These never escape [`ConfigSource::load`](crate::ConfigSource::load), which
/// falls back to defaults; they surface only through
/// [`TrbConfigFile::read`](crate::TrbConfigFile::read).
#[derive(Error, Debug)]
pub enum ConfigError {
    /// The config file does not exist.
    #[error("config file not found: {0}")]
    NotFound(PathBuf),

    /// IO error.
    #[error("failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}
