//! Error types for collector operations

use std::fmt;
use std::path::PathBuf;

use crate::actors::state::CollectorState;

/// Result type alias for collector operations
pub type CollectorResult<T> = Result<T, CollectorError>;

/// Errors that can end a worker or reject a lifecycle operation
#[derive(Debug)]
pub enum CollectorError {
    /// The log file could not be opened or written
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    /// A record could not be encoded as a JSON line
    Serialization(serde_json::Error),

    /// Every receiving end of the hand-off channel is gone
    ChannelClosed,

    /// A lifecycle operation was called in a state that does not allow it
    InvalidState {
        collector: String,
        state: CollectorState,
        operation: &'static str,
    },

    /// A worker task panicked or was cancelled by the runtime
    WorkerPanicked(String),
}

impl CollectorError {
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        CollectorError::Io {
            path: path.into(),
            source,
        }
    }
}

impl fmt::Display for CollectorError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CollectorError::Io { path, source } => {
                write!(f, "I/O error on {}: {}", path.display(), source)
            }
            CollectorError::Serialization(err) => write!(f, "record serialization error: {}", err),
            CollectorError::ChannelClosed => write!(f, "record channel closed"),
            CollectorError::InvalidState {
                collector,
                state,
                operation,
            } => write!(f, "collector {collector}: cannot {operation} while {state}"),
            CollectorError::WorkerPanicked(msg) => write!(f, "worker task failed: {}", msg),
        }
    }
}

impl std::error::Error for CollectorError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            CollectorError::Io { source, .. } => Some(source),
            CollectorError::Serialization(err) => Some(err),
            _ => None,
        }
    }
}

impl From<serde_json::Error> for CollectorError {
    fn from(err: serde_json::Error) -> Self {
        CollectorError::Serialization(err)
    }
}

impl From<tokio::task::JoinError> for CollectorError {
    fn from(err: tokio::task::JoinError) -> Self {
        CollectorError::WorkerPanicked(err.to_string())
    }
}
