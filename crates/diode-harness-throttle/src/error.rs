//! Throttle error types.

use std::path::PathBuf;

/// Result type alias for throttle operations.
pub type Result<T> = std::result::Result<T, ThrottleError>;

/// Storage proxy errors.
#[derive(Debug, thiserror::Error)]
pub enum ThrottleError {
    /// Rate must be a positive number of bytes per second.
    #[error("invalid rate: {0} bytes/s")]
    InvalidRate(u64),

    /// Source directory missing or not a directory.
    #[error("source is not a directory: {}", .0.display())]
    InvalidSource(PathBuf),

    /// The FUSE session could not be mounted.
    #[error("failed to mount {}: {source}", .mountpoint.display())]
    Mount {
        /// Requested mountpoint.
        mountpoint: PathBuf,
        /// Underlying error.
        #[source]
        source: std::io::Error,
    },

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}
