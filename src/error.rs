//! Error handling for backupg.
use thiserror::Error;

/// Defines all possible errors that can occur in the backup manager.
#[derive(Debug, Error)]
pub enum BackupManagerError {
    /// Error reading or accessing a configuration file.
    #[error("Failed to read config file: {0}")]
    ConfigReadError(#[from] std::io::Error),

    /// Error parsing YAML configuration.
    #[error("Invalid YAML format: {0}")]
    ConfigParseError(#[from] serde_yaml::Error),

    /// A target whose shape survived parsing but cannot drive a cycle.
    #[error("Invalid configuration for volume '{volume}': {reason}")]
    InvalidTarget {
        /// The volume whose target definition is unusable.
        volume: String,
        /// What is wrong with it.
        reason: String,
    },

    /// Error launching an external process.
    #[error("Failed to start {process}: {source}")]
    SpawnError {
        /// Role of the process that failed to start.
        process: String,
        /// The underlying error that occurred.
        #[source]
        source: std::io::Error,
    },

    /// A supervised process exited out of its expected order.
    #[error("{process} exited prematurely")]
    PrematureExit {
        /// Role of the process that exited.
        process: String,
    },

    /// Error for poisoned mutex.
    #[error("Mutex is poisoned: {0}")]
    MutexPoisonError(String),

    /// Error for PID file.
    #[error("PID file error: {0}")]
    PidFileError(#[from] PidFileError),

    /// Error from a raw OS call.
    #[error("OS error: {0}")]
    ErrNo(#[from] nix::errno::Errno),
}

/// Implement the `From` trait to convert a `std::sync::PoisonError` into a
/// `BackupManagerError`.
impl<T> From<std::sync::PoisonError<T>> for BackupManagerError {
    /// Converts a `std::sync::PoisonError` into a `BackupManagerError`.
    fn from(err: std::sync::PoisonError<T>) -> Self {
        BackupManagerError::MutexPoisonError(err.to_string())
    }
}

/// Error type for PID file operations.
#[derive(Debug, Error)]
pub enum PidFileError {
    /// Error reading or creating the PID file.
    #[error("Failed to access PID file: {0}")]
    ReadError(#[from] std::io::Error),

    /// Another instance already holds the PID file lock.
    #[error("Another backupg instance is already running (PID {0})")]
    AlreadyRunning(u32),

    /// The PID file names a process that no longer exists.
    #[error("PID file does not name a running instance")]
    NotRunning,

    /// The PID file contents are not a process ID.
    #[error("Failed to parse PID file contents")]
    ParseError,
}
