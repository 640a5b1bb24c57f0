//! Record types and operation options.

use fieldsync_protocol::{EntityKey, SyncPriority};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

/// A stored entity with its bookkeeping attributes.
#[derive(Debug, Clone, PartialEq)]
pub struct EntityRecord {
    /// Composite identity.
    pub key: EntityKey,
    /// Opaque payload bytes. The store never interprets these except through
    /// the declared searchable fields.
    pub payload: Vec<u8>,
    /// Hex-encoded SHA-256 of the payload.
    pub hash: String,
    /// Local version, strictly increasing per mutation of this identity.
    pub version: u64,
    /// Schema-version tag of the payload format.
    pub schema_version: u32,
    /// Creation timestamp (milliseconds since the Unix epoch).
    pub created_at: i64,
    /// Last-mutation timestamp (milliseconds since the Unix epoch).
    pub updated_at: i64,
    /// True once the server has acknowledged the latest version.
    pub synced: bool,
    /// Upload priority for pending changes.
    pub priority: SyncPriority,
    /// Payload size in bytes.
    pub size: u64,
    /// Optional free-form metadata (JSON).
    pub metadata: Option<serde_json::Value>,
}

/// Options for [`EntityStore::put`](crate::EntityStore::put).
#[derive(Debug, Clone, Default)]
pub struct PutOptions {
    /// Upload priority for the resulting queue item.
    pub priority: SyncPriority,
    /// Top-level payload fields to project into the search index.
    pub searchable_fields: Vec<String>,
    /// Hot-cache TTL override for this entity.
    pub ttl: Option<Duration>,
    /// Free-form metadata stored alongside the entity.
    pub metadata: Option<serde_json::Value>,
    /// Schema-version tag of the payload format.
    pub schema_version: u32,
}

impl PutOptions {
    /// Creates default options.
    pub fn new() -> Self {
        Self {
            schema_version: 1,
            ..Self::default()
        }
    }

    /// Sets the priority.
    pub fn with_priority(mut self, priority: SyncPriority) -> Self {
        self.priority = priority;
        self
    }

    /// Sets the searchable fields.
    pub fn with_searchable_fields<I, S>(mut self, fields: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.searchable_fields = fields.into_iter().map(Into::into).collect();
        self
    }

    /// Sets the cache TTL.
    pub fn with_ttl(mut self, ttl: Duration) -> Self {
        self.ttl = Some(ttl);
        self
    }

    /// Sets the metadata.
    pub fn with_metadata(mut self, metadata: serde_json::Value) -> Self {
        self.metadata = Some(metadata);
        self
    }
}

/// Sort order for listings and queries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum OrderBy {
    /// Most recently updated first.
    #[default]
    UpdatedAtDesc,
    /// Least recently updated first.
    UpdatedAtAsc,
    /// Most recently created first.
    CreatedAtDesc,
    /// Oldest first.
    CreatedAtAsc,
}

impl OrderBy {
    /// The ORDER BY clause body for this ordering.
    pub(crate) fn to_sql(self) -> &'static str {
        match self {
            OrderBy::UpdatedAtDesc => "updated_at DESC",
            OrderBy::UpdatedAtAsc => "updated_at ASC",
            OrderBy::CreatedAtDesc => "created_at DESC",
            OrderBy::CreatedAtAsc => "created_at ASC",
        }
    }
}

/// Options for indexed queries.
#[derive(Debug, Clone)]
pub struct QueryOptions {
    /// Maximum rows returned.
    pub limit: usize,
    /// Rows skipped before the first returned.
    pub offset: usize,
    /// Sort order.
    pub order_by: OrderBy,
}

impl Default for QueryOptions {
    fn default() -> Self {
        Self {
            limit: 100,
            offset: 0,
            order_by: OrderBy::default(),
        }
    }
}

/// Options for type listings.
#[derive(Debug, Clone)]
pub struct ListOptions {
    /// Maximum rows returned.
    pub limit: usize,
    /// Rows skipped before the first returned.
    pub offset: usize,
    /// Only return entities the server has acknowledged.
    pub synced_only: bool,
    /// Sort order.
    pub order_by: OrderBy,
}

impl Default for ListOptions {
    fn default() -> Self {
        Self {
            limit: 100,
            offset: 0,
            synced_only: false,
            order_by: OrderBy::default(),
        }
    }
}

/// A page of results with the total matching count.
#[derive(Debug, Clone, PartialEq)]
pub struct Page<T> {
    /// Rows in this page.
    pub items: Vec<T>,
    /// Total rows matching the filter, ignoring limit/offset.
    pub total: usize,
}

/// A binary asset owned by an entity.
#[derive(Debug, Clone, PartialEq)]
pub struct FileAttachment {
    /// Attachment id.
    pub id: String,
    /// Owning entity.
    pub key: EntityKey,
    /// Path of the asset on the device filesystem.
    pub path: String,
    /// Hex-encoded SHA-256 of the asset contents.
    pub checksum: String,
    /// Asset size in bytes.
    pub size: u64,
    /// True once uploaded.
    pub synced: bool,
}

/// Milliseconds since the Unix epoch.
pub(crate) fn now_millis() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| i64::try_from(d.as_millis()).unwrap_or(i64::MAX))
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn put_options_builder() {
        let opts = PutOptions::new()
            .with_priority(SyncPriority::High)
            .with_searchable_fields(["status", "site"])
            .with_ttl(Duration::from_secs(60));

        assert_eq!(opts.priority, SyncPriority::High);
        assert_eq!(opts.searchable_fields, vec!["status", "site"]);
        assert_eq!(opts.ttl, Some(Duration::from_secs(60)));
        assert_eq!(opts.schema_version, 1);
    }

    #[test]
    fn order_by_sql() {
        assert_eq!(OrderBy::default().to_sql(), "updated_at DESC");
        assert_eq!(OrderBy::CreatedAtAsc.to_sql(), "created_at ASC");
    }

    #[test]
    fn now_millis_is_positive() {
        assert!(now_millis() > 0);
    }
}
