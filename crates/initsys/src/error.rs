use thiserror::Error;

/// Errors that can occur while querying the init system.
#[derive(Debug, Error)]
pub enum Error {
    /// Neither systemd nor SysV init scripts were found
    #[error("unsupported init system")]
    Unsupported,

    /// Service control command could not be executed
    #[error("{command} failed: {message}")]
    CommandFailed {
        /// Program that failed (systemctl, service, ...)
        command: String,
        /// Error details
        message: String,
    },

    /// Service names may not contain path separators or whitespace
    #[error("invalid service name: {0:?}")]
    InvalidName(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type for init system operations
pub type Result<T> = std::result::Result<T, Error>;
