//! Durable offline-first entity storage.
//!
//! [`EntityStore`] keeps entities, their search-index projections, a change
//! queue of unsynced local mutations, per-type delta checkpoints, conflict
//! records, and file-attachment bookkeeping in one SQLite database, fronted
//! by a bounded in-memory hot cache.
//!
//! Every local mutation and its queue record commit in the same transaction;
//! after a crash the queue always matches the entities it describes.

pub mod cache;
mod checkpoint;
pub mod conflicts;
pub mod error;
mod files;
pub mod queue;
pub mod schema;
pub mod store;
pub mod types;

pub use cache::HotCache;
pub use conflicts::{ConflictRecord, NewConflict};
pub use error::{StoreError, StoreResult};
pub use queue::{QueueCounts, QueueItem, QueueStatus};
pub use store::{hash_payload, EntityStore, StoreConfig};
pub use types::{
    EntityRecord, FileAttachment, ListOptions, OrderBy, Page, PutOptions, QueryOptions,
};
