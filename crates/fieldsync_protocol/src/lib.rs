//! Protocol types shared between the fieldsync store and sync engine.
//!
//! This crate defines the domain vocabulary (entity keys, operations,
//! priorities, checkpoints) and the wire messages exchanged with a sync
//! server (batch push, delta pull). All types are serde-serializable; the
//! reference transport encodes them as JSON.

mod checkpoint;
mod conflict;
mod key;
mod messages;
mod operation;

pub use checkpoint::Checkpoint;
pub use conflict::{ConflictOutcome, ConflictPolicy, ConflictResolution};
pub use key::{EntityKey, SyncPriority};
pub use messages::{
    BatchPushRequest, BatchPushResponse, DeltaChange, DeltaRequest, DeltaResponse, PushItem,
    PushOutcome,
};
pub use operation::ChangeOperation;
