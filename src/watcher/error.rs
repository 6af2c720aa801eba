//! Watcher error types.

use std::path::PathBuf;

/// Errors that can occur while tailing or discovering sources.
#[derive(thiserror::Error, Debug)]
pub enum WatcherError {
    /// Source file does not exist.
    #[error("Source file not found: {0}")]
    FileNotFound(PathBuf),

    /// Permission denied accessing file.
    #[error("Permission denied: {0}")]
    PermissionDenied(PathBuf),

    /// Neither the discovery directory nor its parent can be watched.
    #[error("Cannot watch directory {0}: neither it nor its parent exists")]
    DirectoryUnavailable(PathBuf),

    /// Notify watcher error.
    #[error("File watcher error: {0}")]
    Notify(#[from] notify::Error),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// A background tailing task panicked or was aborted.
    #[error("Tailing task failed: {0}")]
    Task(#[from] tokio::task::JoinError),
}

impl WatcherError {
    /// Map an I/O error on `path` to the most specific variant.
    #[must_use]
    pub fn from_io(path: &std::path::Path, err: std::io::Error) -> Self {
        match err.kind() {
            std::io::ErrorKind::NotFound => Self::FileNotFound(path.to_path_buf()),
            std::io::ErrorKind::PermissionDenied => Self::PermissionDenied(path.to_path_buf()),
            _ => Self::Io(err),
        }
    }
}
