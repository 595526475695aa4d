//! Error taxonomy shared by the session, artifact and lifecycle layers.

use std::path::PathBuf;

use papermux_process::{SessionName, VersionChannel};

/// Failures reported by a [`crate::session::SessionController`].
#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    /// The multiplexer server itself is not running or not reachable.
    #[error("terminal multiplexer is not reachable: {0}")]
    BackendUnavailable(String),

    #[error("session '{0}' already exists")]
    AlreadyExists(SessionName),

    #[error("session '{0}' does not exist")]
    NotFound(SessionName),

    #[error("session '{0}' has no active pane")]
    NoActiveSurface(SessionName),

    #[error("`{command}` failed: {stderr}")]
    Command { command: String, stderr: String },

    #[error("failed to run `{command}`")]
    Spawn {
        command: String,
        #[source]
        source: std::io::Error,
    },
}

/// Failures reported by the artifact synchronizer.
#[derive(Debug, thiserror::Error)]
pub enum SyncError {
    #[error("download of {url} failed")]
    DownloadFailed {
        url: String,
        #[source]
        source: Box<dyn std::error::Error + Send + Sync + 'static>,
    },

    /// A partially written download could not be removed.
    #[error("partial download left behind at {path}")]
    PartialWriteLeftover {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("artifact directory error")]
    Io(#[from] std::io::Error),
}

/// Everything a manager command can fail with. Each variant maps to its own
/// process exit code.
#[derive(Debug, thiserror::Error)]
pub enum ManagerError {
    #[error("configuration error: {0}")]
    Config(String),

    #[error("terminal multiplexer is not running, nothing to control")]
    BackendUnavailable,

    #[error("session '{0}' is already running")]
    AlreadyRunning(SessionName),

    #[error("session '{0}' is not running")]
    NotRunning(SessionName),

    #[error("no server artifact found for version channel {0}")]
    NoArtifactAvailable(VersionChannel),

    #[error("another manager invocation holds {0}")]
    Busy(PathBuf),

    #[error(transparent)]
    Sync(#[from] SyncError),

    #[error(transparent)]
    Session(#[from] SessionError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl ManagerError {
    pub fn exit_code(&self) -> u8 {
        match self {
            ManagerError::Config(_) => 2,
            ManagerError::BackendUnavailable => 3,
            ManagerError::AlreadyRunning(_) => 4,
            ManagerError::NotRunning(_) => 5,
            ManagerError::NoArtifactAvailable(_) => 6,
            ManagerError::Sync(SyncError::DownloadFailed { .. }) => 7,
            ManagerError::Sync(SyncError::PartialWriteLeftover { .. }) => 8,
            ManagerError::Busy(_) => 9,
            ManagerError::Session(SessionError::BackendUnavailable(_)) => 3,
            ManagerError::Sync(SyncError::Io(_))
            | ManagerError::Session(_)
            | ManagerError::Io(_) => 1,
        }
    }
}
