//! Error types for the sync engine.

use fieldsync_protocol::EntityKey;
use fieldsync_store::StoreError;
use thiserror::Error;

/// Result type for sync operations.
pub type SyncResult<T> = Result<T, SyncError>;

/// Errors that can occur during sync operations.
#[derive(Error, Debug)]
pub enum SyncError {
    /// Network or transport error.
    #[error("transport error: {message}")]
    Transport {
        /// Error message.
        message: String,
        /// Whether the operation can be retried.
        retryable: bool,
    },

    /// Protocol error (malformed request or response body).
    #[error("protocol error: {0}")]
    Protocol(String),

    /// The server rejected a request as invalid. Terminal: retrying the same
    /// bytes cannot succeed.
    #[error("server rejected request: {0}")]
    Rejected(String),

    /// Local storage error during sync.
    #[error("store error: {0}")]
    Store(#[from] StoreError),

    /// Operation timed out.
    #[error("operation timed out")]
    Timeout,

    /// Not connected to the server.
    #[error("not connected to server")]
    NotConnected,

    /// The cycle was cancelled.
    #[error("sync cancelled")]
    Cancelled,

    /// A conflict that requires manual resolution.
    #[error("unresolved conflict for {key}")]
    UnresolvedConflict {
        /// Identity of the contested entity.
        key: EntityKey,
    },
}

impl SyncError {
    /// Creates a retryable transport error.
    pub fn transport_retryable(message: impl Into<String>) -> Self {
        Self::Transport {
            message: message.into(),
            retryable: true,
        }
    }

    /// Creates a non-retryable transport error.
    pub fn transport_fatal(message: impl Into<String>) -> Self {
        Self::Transport {
            message: message.into(),
            retryable: false,
        }
    }

    /// Returns true if retrying the operation may succeed.
    pub fn is_retryable(&self) -> bool {
        match self {
            SyncError::Transport { retryable, .. } => *retryable,
            SyncError::Timeout => true,
            _ => false,
        }
    }
}
