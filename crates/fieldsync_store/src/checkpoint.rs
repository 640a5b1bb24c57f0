//! Per-entity-type delta checkpoints.
//!
//! A checkpoint is only advanced after the page of changes it covers has
//! been committed, so a crash between pull and apply replays the same page
//! on the next cycle instead of skipping it.

use crate::error::StoreResult;
use crate::types::now_millis;
use fieldsync_protocol::Checkpoint;
use rusqlite::{params, Connection, OptionalExtension};

/// Returns the stored checkpoint for a type, or the origin for a type that
/// has never pulled.
pub(crate) fn get(conn: &Connection, entity_type: &str) -> StoreResult<Checkpoint> {
    let stored: Option<String> = conn
        .query_row(
            "SELECT checkpoint FROM sync_checkpoints WHERE entity_type = ?1",
            params![entity_type],
            |row| row.get(0),
        )
        .optional()?;
    Ok(stored.map(Checkpoint::new).unwrap_or_else(Checkpoint::origin))
}

/// Stores the checkpoint for a type.
pub(crate) fn advance(
    conn: &Connection,
    entity_type: &str,
    checkpoint: &Checkpoint,
) -> StoreResult<()> {
    conn.execute(
        "INSERT INTO sync_checkpoints (entity_type, checkpoint, updated_at)
         VALUES (?1, ?2, ?3)
         ON CONFLICT(entity_type) DO UPDATE SET checkpoint = ?2, updated_at = ?3",
        params![entity_type, checkpoint.as_str(), now_millis()],
    )?;
    Ok(())
}

/// Drops the checkpoint for a type, forcing the next pull to start from the
/// origin (a full re-download).
pub(crate) fn reset(conn: &Connection, entity_type: &str) -> StoreResult<bool> {
    let removed = conn.execute(
        "DELETE FROM sync_checkpoints WHERE entity_type = ?1",
        params![entity_type],
    )?;
    Ok(removed > 0)
}
