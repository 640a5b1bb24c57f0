//! # fieldsync engine
//!
//! Delta synchronization engine for offline-first clients.
//!
//! This crate provides:
//! - Full sync cycle orchestration (push local changes, then pull deltas)
//! - Per-entity-type checkpointed delta pulls
//! - Conflict policies with a persisted audit trail and manual resolution
//! - Retry with exponential backoff, restart-safe via persisted queue state
//! - Network connectivity monitoring and a background sync service
//! - HTTP transport abstraction with a mock for testing
//!
//! ## Key invariants
//!
//! - Push happens before pull in every cycle
//! - At most one change per entity is in flight at a time
//! - A checkpoint only advances after its delta page is durably applied
//! - Retry state lives in the queue rows, so backoff survives a restart

mod config;
mod conflict;
mod delta;
mod error;
mod events;
mod http;
mod monitor;
mod orchestrator;
mod service;
mod transport;

pub use config::{RetryConfig, SyncConfig};
pub use conflict::{ConflictDisposition, ConflictResolver};
pub use delta::{DeltaSyncClient, PullSummary};
pub use error::{SyncError, SyncResult};
pub use events::{SyncEvent, SyncEventFeed};
pub use http::{HttpClient, HttpTransport};
pub use monitor::{wait_for_online, NetworkMonitor};
pub use orchestrator::{SyncOrchestrator, SyncReport};
pub use service::SyncService;
pub use transport::{MockTransport, SyncTransport};
