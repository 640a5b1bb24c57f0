//! Incremental pull of server-side changes.
//!
//! Each tracked entity type keeps its own checkpoint. A page is applied in
//! one store transaction together with its checkpoint advance, so replaying
//! a page after a crash is the worst case, never skipping one.

use crate::error::{SyncError, SyncResult};
use crate::transport::SyncTransport;
use fieldsync_protocol::DeltaRequest;
use fieldsync_store::EntityStore;
use std::sync::Arc;

/// Summary of a pull pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PullSummary {
    /// Server changes applied locally.
    pub applied: usize,
    /// Pages fetched.
    pub pages: usize,
    /// Payload bytes downloaded.
    pub bytes: usize,
}

impl PullSummary {
    fn absorb(&mut self, other: PullSummary) {
        self.applied += other.applied;
        self.pages += other.pages;
        self.bytes += other.bytes;
    }
}

/// Pulls delta pages and applies them to the store.
pub struct DeltaSyncClient {
    store: Arc<EntityStore>,
    transport: Arc<dyn SyncTransport>,
    page_limit: u32,
}

impl DeltaSyncClient {
    /// Creates a client pulling at most `page_limit` changes per page.
    pub fn new(
        store: Arc<EntityStore>,
        transport: Arc<dyn SyncTransport>,
        page_limit: u32,
    ) -> Self {
        Self {
            store,
            transport,
            page_limit: page_limit.max(1),
        }
    }

    /// Pulls all outstanding pages for one entity type.
    pub fn pull_type(&self, entity_type: &str) -> SyncResult<PullSummary> {
        let mut summary = PullSummary::default();
        loop {
            let since = self.store.checkpoint(entity_type)?;
            let request = DeltaRequest {
                entity_type: entity_type.to_string(),
                since: since.clone(),
                limit: self.page_limit,
            };
            let page = self.transport.pull_delta(&request)?;

            if page.changes.is_empty() && page.new_checkpoint == since {
                break;
            }
            // A server claiming more pages while not moving the cursor would
            // pin us in a loop.
            if page.has_more && page.new_checkpoint == since {
                return Err(SyncError::Protocol(format!(
                    "delta page for {entity_type} has more but checkpoint did not advance"
                )));
            }

            summary.pages += 1;
            summary.bytes += page.payload_bytes();
            summary.applied +=
                self.store
                    .apply_delta_page(entity_type, &page.changes, &page.new_checkpoint)?;

            if !page.has_more {
                break;
            }
        }
        tracing::debug!(
            entity_type,
            applied = summary.applied,
            pages = summary.pages,
            "delta pull finished"
        );
        Ok(summary)
    }

    /// Pulls all outstanding pages for every given type, in order.
    pub fn pull_all<S: AsRef<str>>(&self, entity_types: &[S]) -> SyncResult<PullSummary> {
        let mut summary = PullSummary::default();
        for entity_type in entity_types {
            summary.absorb(self.pull_type(entity_type.as_ref())?);
        }
        Ok(summary)
    }
}
