//! Error types for the fieldsync store.

use fieldsync_protocol::EntityKey;
use std::io;
use thiserror::Error;

/// Result type for store operations.
pub type StoreResult<T> = Result<T, StoreError>;

/// Errors that can occur in store operations.
///
/// Mutating operations are transactional: when an error is returned, nothing
/// was committed and the caller may retry the whole operation.
#[derive(Debug, Error)]
pub enum StoreError {
    /// Durable write or read failed at the SQLite layer.
    #[error("storage error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    /// I/O error outside SQLite (e.g. attachment handling).
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// Entity not found. Expected outcome for reads, not a fault.
    #[error("entity not found: {key}")]
    NotFound {
        /// The identity that was looked up.
        key: EntityKey,
    },

    /// Caller supplied invalid input.
    #[error("invalid input: {message}")]
    InvalidInput {
        /// Description of the problem.
        message: String,
    },

    /// Payload or metadata could not be serialized/deserialized.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// A stored row is inconsistent with the schema expectations.
    #[error("corrupt row: {message}")]
    CorruptRow {
        /// Description of the inconsistency.
        message: String,
    },
}

impl StoreError {
    /// Creates a not-found error for the given key.
    pub fn not_found(key: &EntityKey) -> Self {
        Self::NotFound { key: key.clone() }
    }

    /// Creates an invalid-input error.
    pub fn invalid_input(message: impl Into<String>) -> Self {
        Self::InvalidInput {
            message: message.into(),
        }
    }

    /// Creates a corrupt-row error.
    pub fn corrupt_row(message: impl Into<String>) -> Self {
        Self::CorruptRow {
            message: message.into(),
        }
    }

    /// Returns true if this is the expected miss outcome rather than a fault.
    pub fn is_not_found(&self) -> bool {
        matches!(self, StoreError::NotFound { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn not_found_is_not_a_fault() {
        let err = StoreError::not_found(&EntityKey::new("shift", "s1"));
        assert!(err.is_not_found());
        assert!(err.to_string().contains("shift"));

        let err = StoreError::invalid_input("empty payload");
        assert!(!err.is_not_found());
    }
}
