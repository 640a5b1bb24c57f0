//! File attachment bookkeeping.
//!
//! The store tracks attachment metadata only; the bytes live on the device
//! filesystem at the recorded path. Upload of the bytes themselves is the
//! transport's business.

use crate::error::StoreResult;
use crate::types::{now_millis, FileAttachment};
use fieldsync_protocol::EntityKey;
use rusqlite::{params, Connection, Row};
use uuid::Uuid;

fn map_attachment(row: &Row<'_>) -> rusqlite::Result<FileAttachment> {
    Ok(FileAttachment {
        id: row.get(0)?,
        key: EntityKey::new(row.get::<_, String>(1)?, row.get::<_, String>(2)?),
        path: row.get(3)?,
        checksum: row.get(4)?,
        size: row.get::<_, i64>(5)? as u64,
        synced: row.get::<_, i64>(6)? != 0,
    })
}

const ATTACHMENT_COLUMNS: &str = "id, entity_type, entity_id, path, checksum, size, synced";

/// Records an attachment for an entity and returns its id.
pub(crate) fn attach(
    conn: &Connection,
    key: &EntityKey,
    path: &str,
    checksum: &str,
    size: u64,
) -> StoreResult<String> {
    let id = Uuid::now_v7().to_string();
    conn.execute(
        "INSERT INTO files (id, entity_type, entity_id, path, checksum, size, synced, created_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, 0, ?7)",
        params![
            id,
            key.entity_type,
            key.local_id,
            path,
            checksum,
            size as i64,
            now_millis()
        ],
    )?;
    Ok(id)
}

/// Returns all attachments of an entity.
pub(crate) fn for_entity(conn: &Connection, key: &EntityKey) -> StoreResult<Vec<FileAttachment>> {
    let mut stmt = conn.prepare(&format!(
        "SELECT {ATTACHMENT_COLUMNS} FROM files
         WHERE entity_type = ?1 AND entity_id = ?2
         ORDER BY created_at ASC"
    ))?;
    let attachments = stmt
        .query_map(params![key.entity_type, key.local_id], map_attachment)?
        .collect::<rusqlite::Result<Vec<_>>>()?;
    Ok(attachments)
}

/// Returns attachments not yet uploaded, oldest first.
pub(crate) fn unsynced(conn: &Connection, limit: usize) -> StoreResult<Vec<FileAttachment>> {
    let mut stmt = conn.prepare(&format!(
        "SELECT {ATTACHMENT_COLUMNS} FROM files
         WHERE synced = 0 ORDER BY created_at ASC LIMIT ?1"
    ))?;
    let attachments = stmt
        .query_map(params![limit as i64], map_attachment)?
        .collect::<rusqlite::Result<Vec<_>>>()?;
    Ok(attachments)
}

/// Marks an attachment uploaded. Returns false for an unknown id.
pub(crate) fn mark_synced(conn: &Connection, id: &str) -> StoreResult<bool> {
    let changed = conn.execute("UPDATE files SET synced = 1 WHERE id = ?1", params![id])?;
    Ok(changed > 0)
}

/// Removes all attachment rows of an entity. The caller owns deleting the
/// underlying files.
pub(crate) fn remove_for_entity(conn: &Connection, key: &EntityKey) -> StoreResult<usize> {
    let removed = conn.execute(
        "DELETE FROM files WHERE entity_type = ?1 AND entity_id = ?2",
        params![key.entity_type, key.local_id],
    )?;
    Ok(removed)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema;

    fn setup() -> Connection {
        let conn = Connection::open_in_memory().unwrap();
        schema::init(&conn).unwrap();
        conn
    }

    #[test]
    fn attach_and_list() {
        let conn = setup();
        let key = EntityKey::new("inspection", "i1");

        attach(&conn, &key, "/data/photos/a.jpg", "abc123", 1024).unwrap();
        attach(&conn, &key, "/data/photos/b.jpg", "def456", 2048).unwrap();

        let attachments = for_entity(&conn, &key).unwrap();
        assert_eq!(attachments.len(), 2);
        assert_eq!(attachments[0].path, "/data/photos/a.jpg");
        assert!(!attachments[0].synced);

        let other = EntityKey::new("inspection", "i2");
        assert!(for_entity(&conn, &other).unwrap().is_empty());
    }

    #[test]
    fn unsynced_drains_as_uploads_complete() {
        let conn = setup();
        let key = EntityKey::new("inspection", "i1");
        let id = attach(&conn, &key, "/data/photos/a.jpg", "abc123", 1024).unwrap();
        attach(&conn, &key, "/data/photos/b.jpg", "def456", 2048).unwrap();

        assert_eq!(unsynced(&conn, 10).unwrap().len(), 2);
        assert!(mark_synced(&conn, &id).unwrap());
        assert_eq!(unsynced(&conn, 10).unwrap().len(), 1);
        assert!(!mark_synced(&conn, "missing").unwrap());
    }

    #[test]
    fn removal_follows_entity() {
        let conn = setup();
        let key = EntityKey::new("inspection", "i1");
        attach(&conn, &key, "/data/photos/a.jpg", "abc123", 1024).unwrap();

        assert_eq!(remove_for_entity(&conn, &key).unwrap(), 1);
        assert!(for_entity(&conn, &key).unwrap().is_empty());
    }
}
