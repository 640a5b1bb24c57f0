//! Change operations.

use serde::{Deserialize, Serialize};

/// The kind of mutation a queued change represents.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChangeOperation {
    /// Entity did not exist on the server before this change.
    Create,
    /// Entity exists on the server; payload replaces it.
    Update,
    /// Entity is deleted; a tombstone must reach the server.
    Delete,
}

impl ChangeOperation {
    /// Converts to the code stored in the database.
    pub fn to_code(self) -> u8 {
        match self {
            ChangeOperation::Create => 1,
            ChangeOperation::Update => 2,
            ChangeOperation::Delete => 3,
        }
    }

    /// Converts from a stored code.
    pub fn from_code(code: u8) -> Option<Self> {
        match code {
            1 => Some(ChangeOperation::Create),
            2 => Some(ChangeOperation::Update),
            3 => Some(ChangeOperation::Delete),
            _ => None,
        }
    }

    /// Merges a new local mutation into an already-queued one.
    ///
    /// A local edit amends the pending queue item for the same identity
    /// rather than enqueueing a competitor, so the operation kinds must be
    /// coalesced:
    ///
    /// - `Create` followed by `Update` is still a `Create` (the server has
    ///   never seen the entity);
    /// - `Create` followed by `Delete` yields `None`: the item can be dropped
    ///   entirely, nothing ever left the device;
    /// - anything else followed by `Delete` collapses to `Delete`;
    /// - `Delete` followed by a re-create becomes an `Update` of the
    ///   server-known entity.
    pub fn coalesce(self, next: ChangeOperation) -> Option<ChangeOperation> {
        match (self, next) {
            (ChangeOperation::Create, ChangeOperation::Delete) => None,
            (ChangeOperation::Create, _) => Some(ChangeOperation::Create),
            (_, ChangeOperation::Delete) => Some(ChangeOperation::Delete),
            (ChangeOperation::Delete, _) => Some(ChangeOperation::Update),
            (ChangeOperation::Update, _) => Some(ChangeOperation::Update),
        }
    }

    /// Returns true if this operation carries a payload.
    pub fn has_payload(self) -> bool {
        !matches!(self, ChangeOperation::Delete)
    }
}
