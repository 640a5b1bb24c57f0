//! Wire messages for batch push and delta pull.

use crate::checkpoint::Checkpoint;
use crate::key::EntityKey;
use crate::operation::ChangeOperation;
use serde::{Deserialize, Serialize};

/// One pending mutation in a batch push.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PushItem {
    /// Queue item id (client-assigned, echoed in errors for diagnostics).
    pub id: String,
    /// Identity of the entity being mutated.
    pub key: EntityKey,
    /// Operation kind.
    pub operation: ChangeOperation,
    /// Payload snapshot taken at enqueue time. None for deletes.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub payload: Option<Vec<u8>>,
    /// SHA-256 of the payload, hex-encoded.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hash: Option<String>,
    /// Entity version the client last observed.
    pub base_version: u64,
    /// Client-side modification timestamp (milliseconds).
    pub modified_at: i64,
}

impl PushItem {
    /// Returns the payload size in bytes.
    pub fn payload_size(&self) -> usize {
        self.payload.as_ref().map(|p| p.len()).unwrap_or(0)
    }
}

/// A batch of pending mutations pushed in one network call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BatchPushRequest {
    /// Items in drain order. The response array aligns positionally.
    pub items: Vec<PushItem>,
}

impl BatchPushRequest {
    /// Creates a push request from drained queue items.
    pub fn new(items: Vec<PushItem>) -> Self {
        Self { items }
    }

    /// Total payload bytes in this batch.
    pub fn payload_bytes(&self) -> usize {
        self.items.iter().map(PushItem::payload_size).sum()
    }
}

/// Per-item outcome of a batch push, positionally aligned with the request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PushOutcome {
    /// True if the server applied the mutation.
    pub success: bool,
    /// True if the server detected a version mismatch.
    #[serde(default)]
    pub conflict: bool,
    /// Server's current payload, supplied alongside `conflict`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub server_payload: Option<Vec<u8>>,
    /// Server-side modification timestamp of the conflicting version.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub server_modified_at: Option<i64>,
    /// True if the server rejected the item as invalid (never retried).
    #[serde(default)]
    pub rejected: bool,
    /// Error message for failed items.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl PushOutcome {
    /// Outcome for an applied item.
    pub fn success() -> Self {
        Self {
            success: true,
            conflict: false,
            server_payload: None,
            server_modified_at: None,
            rejected: false,
            error: None,
        }
    }

    /// Outcome for a version conflict, carrying the server's version.
    pub fn conflict(server_payload: Option<Vec<u8>>, server_modified_at: i64) -> Self {
        Self {
            success: false,
            conflict: true,
            server_payload,
            server_modified_at: Some(server_modified_at),
            rejected: false,
            error: None,
        }
    }

    /// Outcome for a transient per-item failure (retried with backoff).
    pub fn error(message: impl Into<String>) -> Self {
        Self {
            success: false,
            conflict: false,
            server_payload: None,
            server_modified_at: None,
            rejected: false,
            error: Some(message.into()),
        }
    }

    /// Outcome for a validation rejection (terminal, never retried).
    pub fn rejected(message: impl Into<String>) -> Self {
        Self {
            success: false,
            conflict: false,
            server_payload: None,
            server_modified_at: None,
            rejected: true,
            error: Some(message.into()),
        }
    }
}

/// Response to a batch push.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BatchPushResponse {
    /// Outcomes aligned positionally with the request items.
    pub items: Vec<PushOutcome>,
}

impl BatchPushResponse {
    /// Creates a response from per-item outcomes.
    pub fn new(items: Vec<PushOutcome>) -> Self {
        Self { items }
    }

    /// Convenience: a response where every item succeeded.
    pub fn all_success(count: usize) -> Self {
        Self {
            items: (0..count).map(|_| PushOutcome::success()).collect(),
        }
    }
}

/// Request for server-side changes since a checkpoint.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeltaRequest {
    /// Entity type being pulled.
    pub entity_type: String,
    /// Checkpoint of the last applied page.
    pub since: Checkpoint,
    /// Maximum changes per page.
    pub limit: u32,
}

/// One inbound change from the server.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeltaChange {
    /// Identity of the changed entity.
    pub key: EntityKey,
    /// Operation kind; `Create`/`Update` carry a payload, `Delete` does not.
    pub operation: ChangeOperation,
    /// Server-side modification timestamp (milliseconds).
    pub timestamp: i64,
    /// Payload for upserts.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub payload: Option<Vec<u8>>,
    /// Fields to project into the local search index.
    #[serde(default)]
    pub searchable_fields: Vec<String>,
}

/// A page of inbound changes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeltaResponse {
    /// Changes in server-assigned order.
    pub changes: Vec<DeltaChange>,
    /// Cursor to store once the whole page is durably applied.
    pub new_checkpoint: Checkpoint,
    /// True if another page is available immediately.
    #[serde(default)]
    pub has_more: bool,
}

impl DeltaResponse {
    /// Creates a delta page.
    pub fn new(changes: Vec<DeltaChange>, new_checkpoint: Checkpoint, has_more: bool) -> Self {
        Self {
            changes,
            new_checkpoint,
            has_more,
        }
    }

    /// An empty page that leaves the checkpoint where it was.
    pub fn empty(checkpoint: Checkpoint) -> Self {
        Self {
            changes: Vec::new(),
            new_checkpoint: checkpoint,
            has_more: false,
        }
    }

    /// Total payload bytes in this page.
    pub fn payload_bytes(&self) -> usize {
        self.changes
            .iter()
            .map(|c| c.payload.as_ref().map(|p| p.len()).unwrap_or(0))
            .sum()
    }
}
