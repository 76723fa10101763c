//! Error types for CapyPopups

use std::path::PathBuf;
use std::time::Duration;

/// Daemon and popup service errors
#[derive(Debug, thiserror::Error)]
pub enum PopupError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("failed to start {program}: {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },

    #[error("{program} exited with {status}: {stderr}")]
    CommandFailed {
        program: String,
        status: i32,
        stderr: String,
    },

    #[error("{program} timed out after {timeout:?}")]
    Timeout { program: String, timeout: Duration },

    #[error("{0}")]
    Cancelled(#[from] capy_tasks::Cancelled),

    #[error("could not parse {what}: {detail}")]
    Parse { what: &'static str, detail: String },

    #[error("Unknown popup '{0}'")]
    UnknownCategory(String),

    #[error("daemon is not running")]
    DaemonNotRunning,

    #[error("another instance is already listening on {}", .0.display())]
    AlreadyRunning(PathBuf),

    #[error("{0}")]
    Other(String),
}

impl PopupError {
    pub fn parse(what: &'static str, detail: impl Into<String>) -> Self {
        PopupError::Parse {
            what,
            detail: detail.into(),
        }
    }
}
