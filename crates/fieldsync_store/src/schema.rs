//! Database schema and migrations.

use crate::error::StoreResult;
use rusqlite::Connection;

/// Current schema version.
const CURRENT_VERSION: i32 = 1;

/// Configures pragmas and runs all pending migrations.
pub fn init(conn: &Connection) -> StoreResult<()> {
    configure(conn)?;

    let version = get_version(conn)?;
    if version < 1 {
        migrate_v1(conn)?;
    }

    debug_assert!(get_version(conn)? == CURRENT_VERSION);
    Ok(())
}

/// Configures SQLite for a mobile-style embedded workload.
fn configure(conn: &Connection) -> StoreResult<()> {
    // WAL may be unavailable (e.g. in-memory databases); that is fine.
    let _ = conn.pragma_update(None, "journal_mode", "WAL");
    let _ = conn.pragma_update(None, "synchronous", "NORMAL");
    conn.pragma_update(None, "foreign_keys", "ON")?;
    Ok(())
}

/// Reads the current schema version, 0 for a fresh database.
fn get_version(conn: &Connection) -> StoreResult<i32> {
    let exists: bool = conn.query_row(
        "SELECT EXISTS(SELECT 1 FROM sqlite_master WHERE type='table' AND name='schema_version')",
        [],
        |row| row.get::<_, i32>(0).map(|v| v != 0),
    )?;

    if !exists {
        return Ok(0);
    }

    let version: i32 = conn.query_row(
        "SELECT COALESCE(MAX(version), 0) FROM schema_version",
        [],
        |row| row.get(0),
    )?;
    Ok(version)
}

/// Version 1: initial schema.
fn migrate_v1(conn: &Connection) -> StoreResult<()> {
    conn.execute_batch(
        "BEGIN;
        CREATE TABLE IF NOT EXISTS schema_version (
            version INTEGER PRIMARY KEY
        );

        CREATE TABLE IF NOT EXISTS entities (
            entity_type TEXT NOT NULL,
            id TEXT NOT NULL,
            payload BLOB NOT NULL,
            hash TEXT NOT NULL,
            version INTEGER NOT NULL,
            schema_version INTEGER NOT NULL DEFAULT 1,
            created_at INTEGER NOT NULL,
            updated_at INTEGER NOT NULL,
            synced INTEGER NOT NULL DEFAULT 0,
            priority INTEGER NOT NULL DEFAULT 1,
            size INTEGER NOT NULL,
            metadata TEXT,
            PRIMARY KEY (entity_type, id)
        );
        CREATE INDEX IF NOT EXISTS idx_entities_type_updated
            ON entities(entity_type, updated_at DESC);
        CREATE INDEX IF NOT EXISTS idx_entities_type_created
            ON entities(entity_type, created_at DESC);
        CREATE INDEX IF NOT EXISTS idx_entities_synced
            ON entities(entity_type, synced);

        CREATE TABLE IF NOT EXISTS files (
            id TEXT PRIMARY KEY,
            entity_type TEXT NOT NULL,
            entity_id TEXT NOT NULL,
            path TEXT NOT NULL,
            checksum TEXT NOT NULL,
            size INTEGER NOT NULL,
            synced INTEGER NOT NULL DEFAULT 0,
            created_at INTEGER NOT NULL
        );
        CREATE INDEX IF NOT EXISTS idx_files_entity
            ON files(entity_type, entity_id);

        CREATE TABLE IF NOT EXISTS change_queue (
            id TEXT PRIMARY KEY,
            entity_type TEXT NOT NULL,
            entity_id TEXT NOT NULL,
            operation INTEGER NOT NULL,
            payload BLOB,
            hash TEXT,
            base_version INTEGER NOT NULL DEFAULT 0,
            priority INTEGER NOT NULL DEFAULT 1,
            retry_count INTEGER NOT NULL DEFAULT 0,
            last_error TEXT,
            last_attempt_at INTEGER,
            status INTEGER NOT NULL DEFAULT 0,
            created_at INTEGER NOT NULL,
            modified_at INTEGER NOT NULL
        );
        CREATE INDEX IF NOT EXISTS idx_queue_drain
            ON change_queue(status, priority, created_at);
        CREATE INDEX IF NOT EXISTS idx_queue_entity
            ON change_queue(entity_type, entity_id, status);

        CREATE TABLE IF NOT EXISTS search_index (
            entity_type TEXT NOT NULL,
            field_name TEXT NOT NULL,
            field_value TEXT NOT NULL,
            entity_id TEXT NOT NULL,
            PRIMARY KEY (entity_type, field_name, entity_id)
        );
        CREATE INDEX IF NOT EXISTS idx_search_lookup
            ON search_index(entity_type, field_name, field_value);

        CREATE TABLE IF NOT EXISTS sync_checkpoints (
            entity_type TEXT PRIMARY KEY,
            checkpoint TEXT NOT NULL,
            updated_at INTEGER NOT NULL
        );

        CREATE TABLE IF NOT EXISTS conflicts (
            id TEXT PRIMARY KEY,
            entity_type TEXT NOT NULL,
            entity_id TEXT NOT NULL,
            queue_item_id TEXT,
            client_payload BLOB,
            server_payload BLOB,
            client_modified_at INTEGER NOT NULL,
            server_modified_at INTEGER NOT NULL,
            reason TEXT NOT NULL,
            outcome INTEGER NOT NULL DEFAULT 0,
            created_at INTEGER NOT NULL,
            resolved_at INTEGER
        );
        CREATE INDEX IF NOT EXISTS idx_conflicts_outcome
            ON conflicts(outcome, created_at);

        INSERT INTO schema_version (version) VALUES (1);
        COMMIT;",
    )?;
    Ok(())
}
