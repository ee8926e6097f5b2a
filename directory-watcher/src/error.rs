//! Error types for the directory watcher.

use std::path::PathBuf;

use thiserror::Error;

/// Result type alias for watcher operations.
pub type Result<T> = std::result::Result<T, WatcherError>;

/// Errors that can occur while starting a directory watcher.
#[derive(Error, Debug)]
pub enum WatcherError {
    /// Watcher already running.
    #[error("watcher already running for: {0}")]
    AlreadyWatching(String),

    /// The watch root could not be created.
    #[error("failed to create directory {path}: {source}")]
    CreateDirectory {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The watch root exists but is not a directory.
    #[error("not a directory: {0}")]
    NotADirectory(String),

    /// No root has been supplied yet.
    #[error("no watch root configured")]
    NoRoot,

    /// Notify error.
    #[error("notify error: {0}")]
    Notify(#[from] notify::Error),

    /// IO error.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}
