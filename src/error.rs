use std::io;
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

/// Errors surfaced by the remote lifecycle engine
#[derive(Error, Debug)]
pub enum RemoteError {
    #[error("rclone config not found at {0:?}")]
    ConfigNotFound(PathBuf),

    #[error("Failed to read config {path:?}: {source}")]
    ConfigRead {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("Failed to write config {path:?}: {source}")]
    ConfigWrite {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("Remote '{0}' not found in config")]
    RemoteNotFound(String),

    #[error("{0}")]
    Validation(String),

    #[error("Plugin '{0}' not found")]
    PluginNotFound(String),

    #[error("Failed to start {program}: {source}")]
    SpawnFailed {
        program: String,
        #[source]
        source: io::Error,
    },

    #[error("{operation} timed out after {}ms", elapsed.as_millis())]
    TimedOut {
        operation: String,
        elapsed: Duration,
    },

    #[error("{0} was cancelled")]
    Cancelled(String),

    #[error("Mount command executed but {path:?} is not mounted: {detail}")]
    MountVerificationFailed { path: PathBuf, detail: String },

    #[error("Connection test for '{remote}' failed: {detail}")]
    ConnectionFailed { remote: String, detail: String },

    #[error("Unmount of {path:?} failed: {detail}")]
    UnmountFailed { path: PathBuf, detail: String },

    #[error("An operation on remote '{0}' is already in progress")]
    OperationInProgress(String),

    #[error("Scheduler error: {0}")]
    Scheduler(String),

    #[error("{0} is not supported on this platform")]
    Unsupported(String),

    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

impl RemoteError {
    /// Whether the error reflects an interrupted orchestration rather than a failed one
    pub fn is_interrupted(&self) -> bool {
        matches!(
            self,
            RemoteError::TimedOut { .. } | RemoteError::Cancelled(_)
        )
    }
}

pub type Result<T> = std::result::Result<T, RemoteError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_timeout_message_states_bound() {
        let err = RemoteError::TimedOut {
            operation: "Connection test for drive".to_string(),
            elapsed: Duration::from_millis(10),
        };
        assert_eq!(
            err.to_string(),
            "Connection test for drive timed out after 10ms"
        );
        assert!(err.is_interrupted());
    }

    #[test]
    fn test_verification_failure_is_not_interrupted() {
        let err = RemoteError::MountVerificationFailed {
            path: PathBuf::from("/mnt/x"),
            detail: "Unknown error".to_string(),
        };
        assert!(!err.is_interrupted());
    }
}
