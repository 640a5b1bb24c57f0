//! Durable change queue: pending local mutations awaiting upload.
//!
//! The queue is the write-ahead record of everything the server has not yet
//! acknowledged. Rows are written in the same transaction as the entity
//! mutation that caused them, so a crash can never separate an entity from
//! its pending change.

use crate::error::{StoreError, StoreResult};
use crate::types::now_millis;
use fieldsync_protocol::{ChangeOperation, EntityKey, SyncPriority};
use rusqlite::{params, Connection, OptionalExtension, Row};
use uuid::Uuid;

/// Lifecycle state of a queue item.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueueStatus {
    /// Waiting to be drained (includes items waiting out a retry backoff).
    Pending,
    /// Included in an in-flight batch.
    Syncing,
    /// Terminal failure: retries exhausted or the server rejected the item.
    Failed,
    /// Acknowledged by the server; purged after a retention window.
    Completed,
}

impl QueueStatus {
    /// Converts to the stored code.
    pub fn to_code(self) -> u8 {
        match self {
            QueueStatus::Pending => 0,
            QueueStatus::Syncing => 1,
            QueueStatus::Failed => 2,
            QueueStatus::Completed => 3,
        }
    }

    /// Converts from a stored code.
    pub fn from_code(code: u8) -> Option<Self> {
        match code {
            0 => Some(QueueStatus::Pending),
            1 => Some(QueueStatus::Syncing),
            2 => Some(QueueStatus::Failed),
            3 => Some(QueueStatus::Completed),
            _ => None,
        }
    }
}

/// One pending mutation intent.
#[derive(Debug, Clone, PartialEq)]
pub struct QueueItem {
    /// Queue item id.
    pub id: String,
    /// Identity of the mutated entity.
    pub key: EntityKey,
    /// Operation kind after coalescing.
    pub operation: ChangeOperation,
    /// Payload snapshot taken at enqueue/amend time. None for deletes.
    pub payload: Option<Vec<u8>>,
    /// Hex SHA-256 of the payload snapshot.
    pub hash: Option<String>,
    /// Entity version this change is based on.
    pub base_version: u64,
    /// Upload priority.
    pub priority: SyncPriority,
    /// Attempts made so far.
    pub retry_count: u32,
    /// Message of the last failed attempt.
    pub last_error: Option<String>,
    /// Timestamp of the last attempt (milliseconds).
    pub last_attempt_at: Option<i64>,
    /// Lifecycle state.
    pub status: QueueStatus,
    /// Enqueue timestamp (milliseconds); preserved across amendments so
    /// temporal drain order reflects the first local edit.
    pub created_at: i64,
    /// Last amendment timestamp (milliseconds).
    pub modified_at: i64,
}

/// Per-status queue counts.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct QueueCounts {
    /// Items waiting to be drained.
    pub pending: usize,
    /// Items in flight.
    pub syncing: usize,
    /// Terminal failures needing attention.
    pub failed: usize,
    /// Acknowledged items awaiting purge.
    pub completed: usize,
}

fn map_item(row: &Row<'_>) -> rusqlite::Result<QueueItem> {
    Ok(QueueItem {
        id: row.get(0)?,
        key: EntityKey::new(row.get::<_, String>(1)?, row.get::<_, String>(2)?),
        operation: ChangeOperation::from_code(row.get::<_, u8>(3)?)
            .unwrap_or(ChangeOperation::Update),
        payload: row.get(4)?,
        hash: row.get(5)?,
        base_version: row.get::<_, i64>(6)? as u64,
        priority: SyncPriority::from_code(row.get::<_, u8>(7)?).unwrap_or_default(),
        retry_count: row.get::<_, i64>(8)? as u32,
        last_error: row.get(9)?,
        last_attempt_at: row.get(10)?,
        status: QueueStatus::from_code(row.get::<_, u8>(11)?).unwrap_or(QueueStatus::Pending),
        created_at: row.get(12)?,
        modified_at: row.get(13)?,
    })
}

const ITEM_COLUMNS: &str = "id, entity_type, entity_id, operation, payload, hash, base_version, \
     priority, retry_count, last_error, last_attempt_at, status, created_at, modified_at";

/// Enqueues a local mutation, amending any unsent item for the same identity.
///
/// Returns the queue item id, or `None` when the mutation coalesced to
/// nothing (a delete of an entity the server never saw).
///
/// Must run inside the same transaction as the entity write.
pub(crate) fn enqueue(
    conn: &Connection,
    key: &EntityKey,
    operation: ChangeOperation,
    payload: Option<&[u8]>,
    hash: Option<&str>,
    base_version: u64,
    priority: SyncPriority,
) -> StoreResult<Option<String>> {
    let now = now_millis();

    // Amend an existing unsent item rather than racing a second writer.
    // In-flight (SYNCING) items are never touched: their snapshot is already
    // on the wire.
    let existing: Option<(String, u8)> = conn
        .query_row(
            "SELECT id, operation FROM change_queue
             WHERE entity_type = ?1 AND entity_id = ?2 AND status IN (?3, ?4)
             ORDER BY created_at DESC LIMIT 1",
            params![
                key.entity_type,
                key.local_id,
                QueueStatus::Pending.to_code(),
                QueueStatus::Failed.to_code()
            ],
            |row| Ok((row.get(0)?, row.get(1)?)),
        )
        .optional()?;

    if let Some((id, op_code)) = existing {
        let prior = ChangeOperation::from_code(op_code)
            .ok_or_else(|| StoreError::corrupt_row(format!("queue item {id}: bad operation")))?;

        return match prior.coalesce(operation) {
            None => {
                conn.execute("DELETE FROM change_queue WHERE id = ?1", params![id])?;
                tracing::debug!(%key, "queued create cancelled by delete");
                Ok(None)
            }
            Some(merged) => {
                conn.execute(
                    "UPDATE change_queue
                     SET operation = ?2, payload = ?3, hash = ?4, base_version = ?5,
                         priority = ?6, retry_count = 0, last_error = NULL,
                         status = ?7, modified_at = ?8
                     WHERE id = ?1",
                    params![
                        id,
                        merged.to_code(),
                        merged.has_payload().then(|| payload).flatten(),
                        merged.has_payload().then(|| hash).flatten(),
                        base_version as i64,
                        priority.to_code(),
                        QueueStatus::Pending.to_code(),
                        now
                    ],
                )?;
                Ok(Some(id))
            }
        };
    }

    let id = Uuid::now_v7().to_string();
    conn.execute(
        "INSERT INTO change_queue
         (id, entity_type, entity_id, operation, payload, hash, base_version,
          priority, status, created_at, modified_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?10)",
        params![
            id,
            key.entity_type,
            key.local_id,
            operation.to_code(),
            operation.has_payload().then(|| payload).flatten(),
            operation.has_payload().then(|| hash).flatten(),
            base_version as i64,
            priority.to_code(),
            QueueStatus::Pending.to_code(),
            now
        ],
    )?;
    Ok(Some(id))
}

/// Returns PENDING items in drain order: priority ascending, then enqueue
/// time ascending. Backoff due-ness is the caller's concern; `offset` lets
/// the caller page past deferred items.
pub(crate) fn pending_batch(
    conn: &Connection,
    limit: usize,
    offset: usize,
) -> StoreResult<Vec<QueueItem>> {
    let mut stmt = conn.prepare(&format!(
        "SELECT {ITEM_COLUMNS} FROM change_queue
         WHERE status = ?1
         ORDER BY priority ASC, created_at ASC
         LIMIT ?2 OFFSET ?3"
    ))?;
    let items = stmt
        .query_map(
            params![QueueStatus::Pending.to_code(), limit as i64, offset as i64],
            map_item,
        )?
        .collect::<rusqlite::Result<Vec<_>>>()?;
    Ok(items)
}

/// Fetches one item by id.
pub(crate) fn item(conn: &Connection, id: &str) -> StoreResult<Option<QueueItem>> {
    let item = conn
        .query_row(
            &format!("SELECT {ITEM_COLUMNS} FROM change_queue WHERE id = ?1"),
            params![id],
            map_item,
        )
        .optional()?;
    Ok(item)
}

/// Marks items as in flight.
pub(crate) fn mark_syncing(conn: &Connection, ids: &[String]) -> StoreResult<()> {
    let now = now_millis();
    for id in ids {
        conn.execute(
            "UPDATE change_queue SET status = ?2, last_attempt_at = ?3, modified_at = ?3
             WHERE id = ?1",
            params![id, QueueStatus::Syncing.to_code(), now],
        )?;
    }
    Ok(())
}

/// Marks an item acknowledged by the server.
pub(crate) fn mark_completed(conn: &Connection, id: &str) -> StoreResult<()> {
    conn.execute(
        "UPDATE change_queue SET status = ?2, last_error = NULL, modified_at = ?3
         WHERE id = ?1",
        params![id, QueueStatus::Completed.to_code(), now_millis()],
    )?;
    Ok(())
}

/// Records a failed attempt and requeues the item for a later retry.
pub(crate) fn record_retry(conn: &Connection, id: &str, error: &str) -> StoreResult<u32> {
    let now = now_millis();
    conn.execute(
        "UPDATE change_queue
         SET status = ?2, retry_count = retry_count + 1, last_error = ?3,
             last_attempt_at = ?4, modified_at = ?4
         WHERE id = ?1",
        params![id, QueueStatus::Pending.to_code(), error, now],
    )?;
    let count: i64 = conn.query_row(
        "SELECT retry_count FROM change_queue WHERE id = ?1",
        params![id],
        |row| row.get(0),
    )?;
    Ok(count as u32)
}

/// Marks an item as terminally failed. It stays visible until manually
/// retried or superseded by a newer local edit.
pub(crate) fn mark_failed(conn: &Connection, id: &str, error: &str) -> StoreResult<()> {
    let now = now_millis();
    conn.execute(
        "UPDATE change_queue
         SET status = ?2, last_error = ?3, last_attempt_at = ?4, modified_at = ?4
         WHERE id = ?1",
        params![id, QueueStatus::Failed.to_code(), error, now],
    )?;
    Ok(())
}

/// Resets items stuck in SYNCING (a cycle that was cancelled or crashed)
/// back to PENDING. Returns the number of items reset.
pub(crate) fn reset_stuck_syncing(conn: &Connection) -> StoreResult<usize> {
    let reset = conn.execute(
        "UPDATE change_queue SET status = ?1, modified_at = ?2 WHERE status = ?3",
        params![
            QueueStatus::Pending.to_code(),
            now_millis(),
            QueueStatus::Syncing.to_code()
        ],
    )?;
    if reset > 0 {
        tracing::warn!(reset, "reset stuck in-flight queue items");
    }
    Ok(reset)
}

/// Deletes COMPLETED items older than `retention_ms`. Returns rows purged.
pub(crate) fn purge_completed(conn: &Connection, retention_ms: i64) -> StoreResult<usize> {
    let cutoff = now_millis() - retention_ms;
    let purged = conn.execute(
        "DELETE FROM change_queue WHERE status = ?1 AND modified_at < ?2",
        params![QueueStatus::Completed.to_code(), cutoff],
    )?;
    Ok(purged)
}

/// Returns an item to PENDING with a fresh retry budget, whatever its
/// current status. Used when a conflict resolution decides the local change
/// should be pushed again.
pub(crate) fn requeue(conn: &Connection, id: &str) -> StoreResult<bool> {
    let changed = conn.execute(
        "UPDATE change_queue
         SET status = ?2, retry_count = 0, last_error = NULL, modified_at = ?3
         WHERE id = ?1",
        params![id, QueueStatus::Pending.to_code(), now_millis()],
    )?;
    Ok(changed > 0)
}

/// Manually requeues a FAILED item with a fresh retry budget.
pub(crate) fn retry_failed(conn: &Connection, id: &str) -> StoreResult<bool> {
    let changed = conn.execute(
        "UPDATE change_queue
         SET status = ?2, retry_count = 0, last_error = NULL, modified_at = ?3
         WHERE id = ?1 AND status = ?4",
        params![
            id,
            QueueStatus::Pending.to_code(),
            now_millis(),
            QueueStatus::Failed.to_code()
        ],
    )?;
    Ok(changed > 0)
}

/// Returns per-status counts.
pub(crate) fn counts(conn: &Connection) -> StoreResult<QueueCounts> {
    let mut stmt = conn.prepare("SELECT status, COUNT(*) FROM change_queue GROUP BY status")?;
    let mut counts = QueueCounts::default();
    let rows = stmt.query_map([], |row| {
        Ok((row.get::<_, u8>(0)?, row.get::<_, i64>(1)? as usize))
    })?;
    for row in rows {
        let (status, count) = row?;
        match QueueStatus::from_code(status) {
            Some(QueueStatus::Pending) => counts.pending = count,
            Some(QueueStatus::Syncing) => counts.syncing = count,
            Some(QueueStatus::Failed) => counts.failed = count,
            Some(QueueStatus::Completed) => counts.completed = count,
            None => {}
        }
    }
    Ok(counts)
}
