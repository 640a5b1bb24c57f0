//! Persisted conflict records.
//!
//! Every detected conflict gets a row, including conflicts an automatic
//! policy resolves immediately. Auto-resolved rows serve as an audit trail;
//! rows left PENDING under the manual policy wait for an explicit decision.

use crate::error::StoreResult;
use crate::types::now_millis;
use fieldsync_protocol::{ConflictOutcome, EntityKey};
use rusqlite::{params, Connection, OptionalExtension, Row};
use uuid::Uuid;

/// A persisted conflict between a local change and the server's copy.
#[derive(Debug, Clone, PartialEq)]
pub struct ConflictRecord {
    /// Conflict id.
    pub id: String,
    /// Identity of the contested entity.
    pub key: EntityKey,
    /// Queue item whose upload surfaced the conflict, if any.
    pub queue_item_id: Option<String>,
    /// The local payload at detection time.
    pub client_payload: Option<Vec<u8>>,
    /// The server's payload at detection time.
    pub server_payload: Option<Vec<u8>>,
    /// Local last-modified timestamp (milliseconds).
    pub client_modified_at: i64,
    /// Server last-modified timestamp (milliseconds).
    pub server_modified_at: i64,
    /// Human-readable detection reason.
    pub reason: String,
    /// Resolution state.
    pub outcome: ConflictOutcome,
    /// Detection timestamp (milliseconds).
    pub created_at: i64,
    /// Resolution timestamp (milliseconds), once resolved.
    pub resolved_at: Option<i64>,
}

fn map_record(row: &Row<'_>) -> rusqlite::Result<ConflictRecord> {
    Ok(ConflictRecord {
        id: row.get(0)?,
        key: EntityKey::new(row.get::<_, String>(1)?, row.get::<_, String>(2)?),
        queue_item_id: row.get(3)?,
        client_payload: row.get(4)?,
        server_payload: row.get(5)?,
        client_modified_at: row.get(6)?,
        server_modified_at: row.get(7)?,
        reason: row.get(8)?,
        outcome: ConflictOutcome::from_code(row.get::<_, u8>(9)?)
            .unwrap_or(ConflictOutcome::Pending),
        created_at: row.get(10)?,
        resolved_at: row.get(11)?,
    })
}

const RECORD_COLUMNS: &str = "id, entity_type, entity_id, queue_item_id, client_payload, \
     server_payload, client_modified_at, server_modified_at, reason, outcome, \
     created_at, resolved_at";

/// A freshly detected conflict, before it has a row.
#[derive(Debug, Clone, Copy)]
pub struct NewConflict<'a> {
    /// Identity of the contested entity.
    pub key: &'a EntityKey,
    /// Queue item whose upload surfaced the conflict, if any.
    pub queue_item_id: Option<&'a str>,
    /// The local payload at detection time.
    pub client_payload: Option<&'a [u8]>,
    /// The server's payload at detection time.
    pub server_payload: Option<&'a [u8]>,
    /// Local last-modified timestamp (milliseconds).
    pub client_modified_at: i64,
    /// Server last-modified timestamp (milliseconds).
    pub server_modified_at: i64,
    /// Human-readable detection reason.
    pub reason: &'a str,
    /// Outcome to record immediately (PENDING when unresolved).
    pub outcome: ConflictOutcome,
}

/// Records a conflict and returns its id.
pub(crate) fn insert(conn: &Connection, new: NewConflict<'_>) -> StoreResult<String> {
    let id = Uuid::now_v7().to_string();
    let now = now_millis();
    let resolved_at = new.outcome.is_resolved().then_some(now);
    conn.execute(
        "INSERT INTO conflicts
         (id, entity_type, entity_id, queue_item_id, client_payload, server_payload,
          client_modified_at, server_modified_at, reason, outcome, created_at, resolved_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)",
        params![
            id,
            new.key.entity_type,
            new.key.local_id,
            new.queue_item_id,
            new.client_payload,
            new.server_payload,
            new.client_modified_at,
            new.server_modified_at,
            new.reason,
            new.outcome.to_code(),
            now,
            resolved_at
        ],
    )?;
    Ok(id)
}

/// Fetches one record by id.
pub(crate) fn record(conn: &Connection, id: &str) -> StoreResult<Option<ConflictRecord>> {
    let record = conn
        .query_row(
            &format!("SELECT {RECORD_COLUMNS} FROM conflicts WHERE id = ?1"),
            params![id],
            map_record,
        )
        .optional()?;
    Ok(record)
}

/// Returns unresolved records, oldest first.
pub(crate) fn pending(conn: &Connection) -> StoreResult<Vec<ConflictRecord>> {
    let mut stmt = conn.prepare(&format!(
        "SELECT {RECORD_COLUMNS} FROM conflicts
         WHERE outcome = ?1 ORDER BY created_at ASC"
    ))?;
    let records = stmt
        .query_map(params![ConflictOutcome::Pending.to_code()], map_record)?
        .collect::<rusqlite::Result<Vec<_>>>()?;
    Ok(records)
}

/// Marks a pending record resolved. Returns false if the record was already
/// resolved or does not exist, making resolution idempotent.
pub(crate) fn mark_resolved(
    conn: &Connection,
    id: &str,
    outcome: ConflictOutcome,
) -> StoreResult<bool> {
    let changed = conn.execute(
        "UPDATE conflicts SET outcome = ?2, resolved_at = ?3
         WHERE id = ?1 AND outcome = ?4",
        params![
            id,
            outcome.to_code(),
            now_millis(),
            ConflictOutcome::Pending.to_code()
        ],
    )?;
    Ok(changed > 0)
}
