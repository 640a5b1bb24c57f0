//! The durable entity store.
//!
//! All mutating operations run inside a single SQLite transaction covering
//! the entity row, its search-index projection, and the change-queue row, so
//! the queue can never disagree with the entities it describes.

use crate::cache::HotCache;
use crate::checkpoint;
use crate::conflicts::{self, ConflictRecord, NewConflict};
use crate::error::{StoreError, StoreResult};
use crate::files;
use crate::queue::{self, QueueCounts, QueueItem};
use crate::types::{
    now_millis, EntityRecord, FileAttachment, ListOptions, Page, PutOptions, QueryOptions,
};
use fieldsync_protocol::{
    ChangeOperation, Checkpoint, ConflictOutcome, DeltaChange, EntityKey, SyncPriority,
};
use parking_lot::Mutex;
use rusqlite::{params, Connection, OptionalExtension, Row, Transaction};
use sha2::{Digest, Sha256};
use std::fmt::Write as _;
use std::path::Path;
use std::time::Duration;

/// Tuning knobs for an [`EntityStore`].
#[derive(Debug, Clone)]
pub struct StoreConfig {
    /// Maximum entries held in the hot cache.
    pub cache_capacity: usize,
    /// Default hot-cache TTL, None for no expiry.
    pub cache_ttl: Option<Duration>,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            cache_capacity: 512,
            cache_ttl: Some(Duration::from_secs(300)),
        }
    }
}

impl StoreConfig {
    /// Creates the default configuration.
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the hot-cache capacity.
    pub fn with_cache_capacity(mut self, capacity: usize) -> Self {
        self.cache_capacity = capacity;
        self
    }

    /// Sets the default hot-cache TTL.
    pub fn with_cache_ttl(mut self, ttl: Option<Duration>) -> Self {
        self.cache_ttl = ttl;
        self
    }
}

/// Offline-first entity store: durable SQLite tables fronted by a bounded
/// in-memory cache, with a change queue recording every unsynced mutation.
pub struct EntityStore {
    conn: Mutex<Connection>,
    cache: HotCache,
}

/// Hex-encoded SHA-256 of a payload.
pub fn hash_payload(payload: &[u8]) -> String {
    let digest = Sha256::digest(payload);
    let mut out = String::with_capacity(digest.len() * 2);
    for byte in digest {
        let _ = write!(out, "{byte:02x}");
    }
    out
}

const ENTITY_COLUMNS: &str = "entity_type, id, payload, hash, version, schema_version, \
     created_at, updated_at, synced, priority, size, metadata";

fn map_entity(row: &Row<'_>) -> rusqlite::Result<EntityRecord> {
    let metadata: Option<String> = row.get(11)?;
    let metadata = match metadata {
        Some(text) => Some(serde_json::from_str(&text).map_err(|err| {
            rusqlite::Error::FromSqlConversionFailure(
                11,
                rusqlite::types::Type::Text,
                Box::new(err),
            )
        })?),
        None => None,
    };
    Ok(EntityRecord {
        key: EntityKey::new(row.get::<_, String>(0)?, row.get::<_, String>(1)?),
        payload: row.get(2)?,
        hash: row.get(3)?,
        version: row.get::<_, i64>(4)? as u64,
        schema_version: row.get::<_, i64>(5)? as u32,
        created_at: row.get(6)?,
        updated_at: row.get(7)?,
        synced: row.get::<_, i64>(8)? != 0,
        priority: SyncPriority::from_code(row.get::<_, u8>(9)?).unwrap_or_default(),
        size: row.get::<_, i64>(10)? as u64,
        metadata,
    })
}

/// Escapes LIKE metacharacters for use with `ESCAPE '\'`.
fn escape_like(prefix: &str) -> String {
    let mut out = String::with_capacity(prefix.len());
    for c in prefix.chars() {
        if matches!(c, '\\' | '%' | '_') {
            out.push('\\');
        }
        out.push(c);
    }
    out
}

fn select_entity(conn: &Connection, key: &EntityKey) -> StoreResult<Option<EntityRecord>> {
    let record = conn
        .query_row(
            &format!("SELECT {ENTITY_COLUMNS} FROM entities WHERE entity_type = ?1 AND id = ?2"),
            params![key.entity_type, key.local_id],
            map_entity,
        )
        .optional()?;
    Ok(record)
}

/// Rewrites the search-index projection of one entity.
fn reindex(
    conn: &Connection,
    key: &EntityKey,
    payload: &[u8],
    fields: &[String],
) -> StoreResult<()> {
    conn.execute(
        "DELETE FROM search_index WHERE entity_type = ?1 AND entity_id = ?2",
        params![key.entity_type, key.local_id],
    )?;
    if fields.is_empty() {
        return Ok(());
    }

    // Non-JSON payloads simply are not indexed.
    let value: serde_json::Value = match serde_json::from_slice(payload) {
        Ok(value) => value,
        Err(_) => {
            tracing::debug!(%key, "payload is not JSON, skipping index projection");
            return Ok(());
        }
    };
    let Some(map) = value.as_object() else {
        return Ok(());
    };

    for field in fields {
        if let Some(field_value) = map.get(field) {
            let text = match field_value {
                serde_json::Value::String(s) => s.clone(),
                other => other.to_string(),
            };
            conn.execute(
                "INSERT OR REPLACE INTO search_index
                 (entity_type, field_name, field_value, entity_id)
                 VALUES (?1, ?2, ?3, ?4)",
                params![key.entity_type, field, text, key.local_id],
            )?;
        }
    }
    Ok(())
}

/// Field names currently projected for an entity, so a server-sent payload
/// can be reindexed without the caller redeclaring them.
fn indexed_fields(conn: &Connection, key: &EntityKey) -> StoreResult<Vec<String>> {
    let mut stmt = conn.prepare(
        "SELECT field_name FROM search_index WHERE entity_type = ?1 AND entity_id = ?2",
    )?;
    let fields = stmt
        .query_map(params![key.entity_type, key.local_id], |row| row.get(0))?
        .collect::<rusqlite::Result<Vec<String>>>()?;
    Ok(fields)
}

/// Writes or replaces an entity row from a server-acknowledged payload.
fn upsert_remote(
    conn: &Connection,
    key: &EntityKey,
    payload: &[u8],
    modified_at: i64,
    fields: &[String],
) -> StoreResult<()> {
    let hash = hash_payload(payload);
    let existing = select_entity(conn, key)?;
    let (version, created_at) = match &existing {
        Some(record) => (record.version + 1, record.created_at),
        None => (1, modified_at),
    };
    let metadata_text = existing
        .as_ref()
        .and_then(|r| r.metadata.as_ref())
        .map(serde_json::to_string)
        .transpose()?;
    conn.execute(
        "INSERT OR REPLACE INTO entities
         (entity_type, id, payload, hash, version, schema_version, created_at,
          updated_at, synced, priority, size, metadata)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, 1, ?9, ?10, ?11)",
        params![
            key.entity_type,
            key.local_id,
            payload,
            hash,
            version as i64,
            existing.as_ref().map(|r| r.schema_version as i64).unwrap_or(1),
            created_at,
            modified_at,
            existing
                .as_ref()
                .map(|r| r.priority)
                .unwrap_or_default()
                .to_code(),
            payload.len() as i64,
            metadata_text
        ],
    )?;
    reindex(conn, key, payload, fields)?;
    Ok(())
}

/// Removes an entity row and everything hanging off it. Idempotent.
fn remove_entity_rows(conn: &Connection, key: &EntityKey) -> StoreResult<bool> {
    conn.execute(
        "DELETE FROM search_index WHERE entity_type = ?1 AND entity_id = ?2",
        params![key.entity_type, key.local_id],
    )?;
    files::remove_for_entity(conn, key)?;
    let removed = conn.execute(
        "DELETE FROM entities WHERE entity_type = ?1 AND id = ?2",
        params![key.entity_type, key.local_id],
    )?;
    Ok(removed > 0)
}

/// True if any queue item for this identity is PENDING or SYNCING.
fn has_unsent_change(conn: &Connection, key: &EntityKey) -> StoreResult<bool> {
    let dirty: bool = conn.query_row(
        "SELECT EXISTS(SELECT 1 FROM change_queue
         WHERE entity_type = ?1 AND entity_id = ?2 AND status IN (0, 1))",
        params![key.entity_type, key.local_id],
        |row| row.get::<_, i32>(0).map(|v| v != 0),
    )?;
    Ok(dirty)
}

impl EntityStore {
    /// Opens (creating if needed) a store at the given path.
    pub fn open(path: impl AsRef<Path>, config: StoreConfig) -> StoreResult<Self> {
        let conn = Connection::open(path)?;
        Self::from_connection(conn, config)
    }

    /// Opens an in-memory store. Nothing survives drop; useful for tests.
    pub fn open_in_memory(config: StoreConfig) -> StoreResult<Self> {
        let conn = Connection::open_in_memory()?;
        Self::from_connection(conn, config)
    }

    fn from_connection(conn: Connection, config: StoreConfig) -> StoreResult<Self> {
        crate::schema::init(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
            cache: HotCache::new(config.cache_capacity, config.cache_ttl),
        })
    }

    // ---- local reads and writes ------------------------------------------

    /// Writes an entity and records the change for upload.
    ///
    /// Writing an identical payload (same hash) is a no-op that returns the
    /// existing record without touching the queue.
    ///
    /// Searchable fields declared in `opts` replace the entity's index
    /// projection; an empty declaration reuses the fields declared by the
    /// previous write.
    pub fn put(
        &self,
        key: &EntityKey,
        payload: &[u8],
        opts: &PutOptions,
    ) -> StoreResult<EntityRecord> {
        if payload.is_empty() {
            return Err(StoreError::invalid_input("empty payload"));
        }

        let hash = hash_payload(payload);
        let mut conn = self.conn.lock();
        let tx = conn.transaction()?;

        let existing = select_entity(&tx, key)?;
        if let Some(record) = &existing {
            if record.hash == hash {
                tracing::debug!(%key, "identical payload, skipping write");
                let record = record.clone();
                drop(tx);
                self.cache.insert(record.clone(), opts.ttl);
                return Ok(record);
            }
        }

        let now = now_millis();
        let (operation, version, created_at) = match &existing {
            Some(record) => (ChangeOperation::Update, record.version + 1, record.created_at),
            None => (ChangeOperation::Create, 1, now),
        };

        let record = EntityRecord {
            key: key.clone(),
            payload: payload.to_vec(),
            hash: hash.clone(),
            version,
            schema_version: opts.schema_version.max(1),
            created_at,
            updated_at: now,
            synced: false,
            priority: opts.priority,
            size: payload.len() as u64,
            metadata: opts.metadata.clone(),
        };

        let metadata_text = record
            .metadata
            .as_ref()
            .map(serde_json::to_string)
            .transpose()?;
        tx.execute(
            "INSERT OR REPLACE INTO entities
             (entity_type, id, payload, hash, version, schema_version, created_at,
              updated_at, synced, priority, size, metadata)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, 0, ?9, ?10, ?11)",
            params![
                key.entity_type,
                key.local_id,
                record.payload,
                record.hash,
                record.version as i64,
                record.schema_version as i64,
                record.created_at,
                record.updated_at,
                record.priority.to_code(),
                record.size as i64,
                metadata_text
            ],
        )?;
        let fields = if opts.searchable_fields.is_empty() {
            indexed_fields(&tx, key)?
        } else {
            opts.searchable_fields.clone()
        };
        reindex(&tx, key, payload, &fields)?;
        queue::enqueue(
            &tx,
            key,
            operation,
            Some(payload),
            Some(&hash),
            version,
            opts.priority,
        )?;
        tx.commit()?;

        self.cache.insert(record.clone(), opts.ttl);
        tracing::debug!(%key, version, "entity written");
        Ok(record)
    }

    /// Reads an entity, hot cache first.
    pub fn get(&self, key: &EntityKey) -> StoreResult<EntityRecord> {
        if let Some(record) = self.cache.get(key) {
            return Ok(record);
        }
        let record = {
            let conn = self.conn.lock();
            select_entity(&conn, key)?
        }
        .ok_or_else(|| StoreError::not_found(key))?;
        self.cache.insert(record.clone(), None);
        Ok(record)
    }

    /// Deletes an entity and records a tombstone for upload.
    ///
    /// Deleting an entity the server never saw (an unsent create) cancels
    /// the queued create instead of queueing a tombstone.
    pub fn delete(&self, key: &EntityKey) -> StoreResult<()> {
        let mut conn = self.conn.lock();
        let tx = conn.transaction()?;

        let existing = select_entity(&tx, key)?.ok_or_else(|| StoreError::not_found(key))?;
        remove_entity_rows(&tx, key)?;
        queue::enqueue(
            &tx,
            key,
            ChangeOperation::Delete,
            None,
            None,
            existing.version,
            existing.priority,
        )?;
        tx.commit()?;

        self.cache.evict(key);
        tracing::debug!(%key, "entity deleted");
        Ok(())
    }

    /// Prefix query over one declared searchable field.
    pub fn query(
        &self,
        entity_type: &str,
        field: &str,
        value_prefix: &str,
        opts: &QueryOptions,
    ) -> StoreResult<Vec<EntityRecord>> {
        let pattern = format!("{}%", escape_like(value_prefix));
        let conn = self.conn.lock();
        let mut stmt = conn.prepare(&format!(
            "SELECT {cols} FROM entities e
             JOIN search_index s
               ON s.entity_type = e.entity_type AND s.entity_id = e.id
             WHERE e.entity_type = ?1 AND s.field_name = ?2
               AND s.field_value LIKE ?3 ESCAPE '\\'
             ORDER BY e.{order} LIMIT ?4 OFFSET ?5",
            cols = ENTITY_COLUMNS
                .split(", ")
                .map(|c| format!("e.{c}"))
                .collect::<Vec<_>>()
                .join(", "),
            order = opts.order_by.to_sql()
        ))?;
        let records = stmt
            .query_map(
                params![
                    entity_type,
                    field,
                    pattern,
                    opts.limit as i64,
                    opts.offset as i64
                ],
                map_entity,
            )?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(records)
    }

    /// Lists entities of one type with pagination and a total count.
    pub fn list_by_type(&self, entity_type: &str, opts: &ListOptions) -> StoreResult<Page<EntityRecord>> {
        let synced_clause = if opts.synced_only { "AND synced = 1" } else { "" };
        let conn = self.conn.lock();

        let total: i64 = conn.query_row(
            &format!("SELECT COUNT(*) FROM entities WHERE entity_type = ?1 {synced_clause}"),
            params![entity_type],
            |row| row.get(0),
        )?;

        let mut stmt = conn.prepare(&format!(
            "SELECT {ENTITY_COLUMNS} FROM entities
             WHERE entity_type = ?1 {synced_clause}
             ORDER BY {order} LIMIT ?2 OFFSET ?3",
            order = opts.order_by.to_sql()
        ))?;
        let items = stmt
            .query_map(
                params![entity_type, opts.limit as i64, opts.offset as i64],
                map_entity,
            )?
            .collect::<rusqlite::Result<Vec<_>>>()?;

        Ok(Page {
            items,
            total: total as usize,
        })
    }

    /// Number of entities of one type.
    pub fn count(&self, entity_type: &str) -> StoreResult<usize> {
        let conn = self.conn.lock();
        let count: i64 = conn.query_row(
            "SELECT COUNT(*) FROM entities WHERE entity_type = ?1",
            params![entity_type],
            |row| row.get(0),
        )?;
        Ok(count as usize)
    }

    /// Drops every hot-cache entry. Durable state is unaffected.
    pub fn clear_cache(&self) {
        self.cache.clear();
    }

    // ---- change queue ----------------------------------------------------

    /// Returns PENDING queue items in drain order (priority, then age).
    pub fn pending_changes(&self, limit: usize) -> StoreResult<Vec<QueueItem>> {
        self.pending_changes_page(limit, 0)
    }

    /// Like [`pending_changes`](Self::pending_changes), skipping the first
    /// `offset` items. Lets a drain loop page past deferred items without
    /// pulling the whole queue into memory.
    pub fn pending_changes_page(
        &self,
        limit: usize,
        offset: usize,
    ) -> StoreResult<Vec<QueueItem>> {
        let conn = self.conn.lock();
        queue::pending_batch(&conn, limit, offset)
    }

    /// Fetches one queue item.
    pub fn queue_item(&self, id: &str) -> StoreResult<Option<QueueItem>> {
        let conn = self.conn.lock();
        queue::item(&conn, id)
    }

    /// Marks a batch of items as in flight.
    pub fn mark_items_syncing(&self, ids: &[String]) -> StoreResult<()> {
        let conn = self.conn.lock();
        queue::mark_syncing(&conn, ids)
    }

    /// Marks an item acknowledged; flips the entity to synced when no newer
    /// change is waiting behind it.
    pub fn complete_item(&self, id: &str) -> StoreResult<()> {
        let mut conn = self.conn.lock();
        let tx = conn.transaction()?;

        let Some(item) = queue::item(&tx, id)? else {
            return Err(StoreError::invalid_input(format!("unknown queue item {id}")));
        };
        queue::mark_completed(&tx, id)?;
        if !has_unsent_change(&tx, &item.key)? {
            tx.execute(
                "UPDATE entities SET synced = 1 WHERE entity_type = ?1 AND id = ?2",
                params![item.key.entity_type, item.key.local_id],
            )?;
        }
        tx.commit()?;

        self.cache.evict(&item.key);
        Ok(())
    }

    /// Records a failed attempt; the item returns to PENDING with an
    /// incremented retry count. Returns the new count.
    pub fn record_item_retry(&self, id: &str, error: &str) -> StoreResult<u32> {
        let conn = self.conn.lock();
        queue::record_retry(&conn, id, error)
    }

    /// Marks an item terminally FAILED.
    pub fn fail_item(&self, id: &str, error: &str) -> StoreResult<()> {
        let conn = self.conn.lock();
        queue::mark_failed(&conn, id, error)
    }

    /// Returns an item to PENDING with a fresh retry budget, whatever its
    /// current status.
    pub fn requeue_item(&self, id: &str) -> StoreResult<bool> {
        let conn = self.conn.lock();
        queue::requeue(&conn, id)
    }

    /// Requeues a FAILED item with a fresh retry budget.
    pub fn retry_failed_item(&self, id: &str) -> StoreResult<bool> {
        let conn = self.conn.lock();
        queue::retry_failed(&conn, id)
    }

    /// Returns items stuck in SYNCING to PENDING. Run at cycle start to
    /// recover from a crashed or cancelled previous cycle.
    pub fn reset_stuck_syncing(&self) -> StoreResult<usize> {
        let conn = self.conn.lock();
        queue::reset_stuck_syncing(&conn)
    }

    /// Deletes COMPLETED items older than the retention window.
    pub fn purge_completed(&self, retention: Duration) -> StoreResult<usize> {
        let conn = self.conn.lock();
        queue::purge_completed(&conn, retention.as_millis().min(i64::MAX as u128) as i64)
    }

    /// Per-status queue counts.
    pub fn queue_counts(&self) -> StoreResult<QueueCounts> {
        let conn = self.conn.lock();
        queue::counts(&conn)
    }

    // ---- server-side application -----------------------------------------

    /// Applies one page of server changes and advances the checkpoint, all
    /// in a single transaction. Returns the number of changes applied.
    ///
    /// Changes targeting an entity with unsent local edits are skipped; the
    /// divergence surfaces as a conflict when that edit is pushed.
    pub fn apply_delta_page(
        &self,
        entity_type: &str,
        changes: &[DeltaChange],
        new_checkpoint: &Checkpoint,
    ) -> StoreResult<usize> {
        let mut conn = self.conn.lock();
        let tx = conn.transaction()?;

        let mut applied = 0;
        for change in changes {
            if has_unsent_change(&tx, &change.key)? {
                tracing::debug!(key = %change.key, "local edits pending, deferring server change");
                continue;
            }
            apply_one_remote(&tx, change)?;
            applied += 1;
        }
        checkpoint::advance(&tx, entity_type, new_checkpoint)?;
        tx.commit()?;

        for change in changes {
            self.cache.evict(&change.key);
        }
        tracing::debug!(
            entity_type,
            applied,
            total = changes.len(),
            checkpoint = new_checkpoint.as_str(),
            "delta page applied"
        );
        Ok(applied)
    }

    /// Overwrites the local copy with a server payload and marks it synced.
    /// A `None` payload means the server's copy is a deletion.
    pub fn accept_server_copy(
        &self,
        key: &EntityKey,
        payload: Option<&[u8]>,
        modified_at: i64,
    ) -> StoreResult<()> {
        let mut conn = self.conn.lock();
        let tx = conn.transaction()?;
        match payload {
            Some(payload) => {
                let fields = indexed_fields(&tx, key)?;
                upsert_remote(&tx, key, payload, modified_at, &fields)?;
            }
            None => {
                remove_entity_rows(&tx, key)?;
            }
        }
        tx.commit()?;
        self.cache.evict(key);
        Ok(())
    }

    // ---- checkpoints -----------------------------------------------------

    /// The delta checkpoint for one type; the origin for a fresh type.
    pub fn checkpoint(&self, entity_type: &str) -> StoreResult<Checkpoint> {
        let conn = self.conn.lock();
        checkpoint::get(&conn, entity_type)
    }

    /// Drops the checkpoint for one type, forcing a full re-download next
    /// pull.
    pub fn reset_checkpoint(&self, entity_type: &str) -> StoreResult<bool> {
        let conn = self.conn.lock();
        checkpoint::reset(&conn, entity_type)
    }

    // ---- conflicts -------------------------------------------------------

    /// Records a conflict and returns its id.
    pub fn record_conflict(&self, conflict: NewConflict<'_>) -> StoreResult<String> {
        let conn = self.conn.lock();
        conflicts::insert(&conn, conflict)
    }

    /// Fetches one conflict record.
    pub fn conflict(&self, id: &str) -> StoreResult<Option<ConflictRecord>> {
        let conn = self.conn.lock();
        conflicts::record(&conn, id)
    }

    /// Returns unresolved conflicts, oldest first.
    pub fn pending_conflicts(&self) -> StoreResult<Vec<ConflictRecord>> {
        let conn = self.conn.lock();
        conflicts::pending(&conn)
    }

    /// Marks a pending conflict resolved. Returns false if already resolved
    /// or unknown, making double resolution harmless.
    pub fn mark_conflict_resolved(&self, id: &str, outcome: ConflictOutcome) -> StoreResult<bool> {
        let conn = self.conn.lock();
        conflicts::mark_resolved(&conn, id, outcome)
    }

    // ---- file attachments ------------------------------------------------

    /// Records a file attachment for an entity. The entity must exist.
    pub fn attach_file(
        &self,
        key: &EntityKey,
        path: &str,
        checksum: &str,
        size: u64,
    ) -> StoreResult<String> {
        let conn = self.conn.lock();
        if select_entity(&conn, key)?.is_none() {
            return Err(StoreError::not_found(key));
        }
        files::attach(&conn, key, path, checksum, size)
    }

    /// Returns all attachments of an entity.
    pub fn files_for(&self, key: &EntityKey) -> StoreResult<Vec<FileAttachment>> {
        let conn = self.conn.lock();
        files::for_entity(&conn, key)
    }

    /// Returns attachments not yet uploaded, oldest first.
    pub fn unsynced_files(&self, limit: usize) -> StoreResult<Vec<FileAttachment>> {
        let conn = self.conn.lock();
        files::unsynced(&conn, limit)
    }

    /// Marks an attachment uploaded.
    pub fn mark_file_synced(&self, id: &str) -> StoreResult<bool> {
        let conn = self.conn.lock();
        files::mark_synced(&conn, id)
    }
}

fn apply_one_remote(tx: &Transaction<'_>, change: &DeltaChange) -> StoreResult<()> {
    match change.operation {
        ChangeOperation::Create | ChangeOperation::Update => {
            let payload = change.payload.as_deref().ok_or_else(|| {
                StoreError::invalid_input(format!("server change for {} has no payload", change.key))
            })?;
            upsert_remote(tx, &change.key, payload, change.timestamp, &change.searchable_fields)
        }
        ChangeOperation::Delete => {
            // Deleting an entity we never had is fine.
            remove_entity_rows(tx, &change.key)?;
            Ok(())
        }
    }
}
