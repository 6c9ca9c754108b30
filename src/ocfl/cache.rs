use std::collections::HashMap;
use std::sync::Mutex;

use crate::ocfl::error::Result;
use crate::ocfl::{RevisionNum, RocflError, VersionNum};

/// A snapshot of the bookkeeping the repository engine needs about an object's current HEAD
/// without re-reading and re-parsing its inventory from storage: the version (and, if a mutable
/// HEAD is staged, the revision) it is currently at, where its root lives, and the digest of the
/// inventory bytes that produced the snapshot.
#[derive(Debug, Clone)]
pub struct ObjectDetailsRow {
    pub object_id: String,
    pub version_num: VersionNum,
    pub revision_num: Option<RevisionNum>,
    pub object_root_path: String,
    pub inventory_digest: String,
    pub digest_algorithm: String,
    pub inventory_bytes: Option<Vec<u8>>,
    pub update_timestamp: i64,
}

/// Caches `ObjectDetailsRow`s so that repeated lookups of an object's current state do not
/// require re-reading its inventory from the storage backend. Implementations are also
/// responsible for detecting when two writers raced to update the same object: `upsert` must
/// reject an update that does not advance directly from the row it is replacing.
pub trait ObjectDetailsCache: Send + Sync {
    /// Returns the cached row for `object_id`, if any.
    fn retrieve(&self, object_id: &str) -> Result<Option<ObjectDetailsRow>>;

    /// Inserts or replaces the cached row for `row.object_id`.
    ///
    /// If a row is already cached for the object, `row` must describe a direct successor of it --
    /// either the next version with no revision, the first revision of a newly staged mutable
    /// HEAD, or the next revision of the mutable HEAD already staged -- otherwise
    /// `RocflError::ObjectOutOfSync` is returned and the cache is left unmodified. This is the
    /// mechanism that detects two writers concurrently updating the same object.
    fn upsert(&self, row: ObjectDetailsRow) -> Result<()>;

    /// Removes the cached row for `object_id`, if any.
    fn delete(&self, object_id: &str) -> Result<()>;

    /// Removes every cached row.
    fn clear(&self) -> Result<()>;
}

fn validate_transition(existing: Option<&ObjectDetailsRow>, next: &ObjectDetailsRow) -> Result<()> {
    let existing = match existing {
        None => return Ok(()),
        Some(existing) => existing,
    };

    // Re-caching the exact same state is a no-op, not a conflict -- this happens when a read
    // populates the cache for an object another thread already cached.
    if existing.version_num.number == next.version_num.number
        && existing.revision_num == next.revision_num
    {
        return Ok(());
    }

    let is_direct_successor = match (existing.revision_num, next.revision_num) {
        // Normal -> Normal: the next version number, no mutable head.
        (None, None) => next.version_num.number == existing.version_num.number + 1,
        // Normal -> MutableHead: same version number, first revision.
        (None, Some(next_rev)) => {
            next.version_num.number == existing.version_num.number && next_rev == RevisionNum::r1()
        }
        // MutableHead -> MutableHead: same version number, next revision.
        (Some(existing_rev), Some(next_rev)) => {
            next.version_num.number == existing.version_num.number
                && next_rev == existing_rev.next()
        }
        // MutableHead -> Normal: committing the mutable head back down to the same version number.
        (Some(_), None) => next.version_num.number == existing.version_num.number,
    };

    if is_direct_successor {
        Ok(())
    } else {
        Err(RocflError::ObjectOutOfSync(next.object_id.clone()))
    }
}

/// An `ObjectDetailsCache` implementation that holds rows entirely in process memory.
#[derive(Default)]
pub struct InMemoryObjectDetailsCache {
    rows: Mutex<HashMap<String, ObjectDetailsRow>>,
}

impl InMemoryObjectDetailsCache {
    pub fn new() -> Self {
        Self::default()
    }
}

impl ObjectDetailsCache for InMemoryObjectDetailsCache {
    fn retrieve(&self, object_id: &str) -> Result<Option<ObjectDetailsRow>> {
        Ok(self.rows.lock().unwrap().get(object_id).cloned())
    }

    fn upsert(&self, row: ObjectDetailsRow) -> Result<()> {
        let mut rows = self.rows.lock().unwrap();
        validate_transition(rows.get(&row.object_id), &row)?;
        rows.insert(row.object_id.clone(), row);
        Ok(())
    }

    fn delete(&self, object_id: &str) -> Result<()> {
        self.rows.lock().unwrap().remove(object_id);
        Ok(())
    }

    fn clear(&self) -> Result<()> {
        self.rows.lock().unwrap().clear();
        Ok(())
    }
}

/// An `ObjectDetailsCache` implementation backed by a SQLite database, allowing the cache to be
/// shared by multiple processes operating on the same storage root.
#[cfg(feature = "sql-lock")]
pub struct SqliteObjectDetailsCache {
    conn: Mutex<rusqlite::Connection>,
}

#[cfg(feature = "sql-lock")]
impl SqliteObjectDetailsCache {
    pub fn new(db_path: impl AsRef<std::path::Path>) -> Result<Self> {
        let conn = rusqlite::Connection::open(db_path)?;
        conn.execute(
            "CREATE TABLE IF NOT EXISTS object_details (
                object_id TEXT PRIMARY KEY,
                version_num INTEGER NOT NULL,
                version_width INTEGER NOT NULL,
                revision_num INTEGER,
                object_root_path TEXT NOT NULL,
                inventory_digest TEXT NOT NULL,
                digest_algorithm TEXT NOT NULL,
                inventory_bytes BLOB,
                update_timestamp INTEGER NOT NULL
            )",
            [],
        )?;

        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn row_from_sql(row: &rusqlite::Row) -> rusqlite::Result<ObjectDetailsRow> {
        let revision_num: Option<u32> = row.get(3)?;

        Ok(ObjectDetailsRow {
            object_id: row.get(0)?,
            version_num: VersionNum {
                number: row.get(1)?,
                width: row.get(2)?,
            },
            revision_num: revision_num.map(RevisionNum),
            object_root_path: row.get(4)?,
            inventory_digest: row.get(5)?,
            digest_algorithm: row.get(6)?,
            inventory_bytes: row.get(7)?,
            update_timestamp: row.get(8)?,
        })
    }
}

#[cfg(feature = "sql-lock")]
impl ObjectDetailsCache for SqliteObjectDetailsCache {
    fn retrieve(&self, object_id: &str) -> Result<Option<ObjectDetailsRow>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(
            "SELECT object_id, version_num, version_width, revision_num, object_root_path,
                    inventory_digest, digest_algorithm, inventory_bytes, update_timestamp
             FROM object_details WHERE object_id = ?1",
        )?;

        let mut rows = stmt.query(rusqlite::params![object_id])?;
        match rows.next()? {
            Some(row) => Ok(Some(Self::row_from_sql(row)?)),
            None => Ok(None),
        }
    }

    fn upsert(&self, row: ObjectDetailsRow) -> Result<()> {
        let existing = self.retrieve(&row.object_id)?;
        validate_transition(existing.as_ref(), &row)?;

        let conn = self.conn.lock().unwrap();
        conn.execute(
            "INSERT INTO object_details (
                object_id, version_num, version_width, revision_num, object_root_path,
                inventory_digest, digest_algorithm, inventory_bytes, update_timestamp
             ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)
             ON CONFLICT(object_id) DO UPDATE SET
                version_num = excluded.version_num,
                version_width = excluded.version_width,
                revision_num = excluded.revision_num,
                object_root_path = excluded.object_root_path,
                inventory_digest = excluded.inventory_digest,
                digest_algorithm = excluded.digest_algorithm,
                inventory_bytes = excluded.inventory_bytes,
                update_timestamp = excluded.update_timestamp",
            rusqlite::params![
                row.object_id,
                row.version_num.number,
                row.version_num.width,
                row.revision_num.map(|r| r.0),
                row.object_root_path,
                row.inventory_digest,
                row.digest_algorithm,
                row.inventory_bytes,
                row.update_timestamp,
            ],
        )?;

        Ok(())
    }

    fn delete(&self, object_id: &str) -> Result<()> {
        self.conn.lock().unwrap().execute(
            "DELETE FROM object_details WHERE object_id = ?1",
            rusqlite::params![object_id],
        )?;
        Ok(())
    }

    fn clear(&self) -> Result<()> {
        self.conn
            .lock()
            .unwrap()
            .execute("DELETE FROM object_details", [])?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn row(object_id: &str, version: u32, revision: Option<u32>) -> ObjectDetailsRow {
        ObjectDetailsRow {
            object_id: object_id.to_string(),
            version_num: VersionNum {
                number: version,
                width: 0,
            },
            revision_num: revision.map(RevisionNum),
            object_root_path: format!("{object_id}-root"),
            inventory_digest: "abc123".to_string(),
            digest_algorithm: "sha512".to_string(),
            inventory_bytes: None,
            update_timestamp: 0,
        }
    }

    #[test]
    fn first_insert_always_succeeds() {
        let cache = InMemoryObjectDetailsCache::new();
        cache.upsert(row("obj-1", 1, None)).unwrap();
        assert_eq!(1, cache.retrieve("obj-1").unwrap().unwrap().version_num.number);
    }

    #[test]
    fn advancing_to_next_version_succeeds() {
        let cache = InMemoryObjectDetailsCache::new();
        cache.upsert(row("obj-1", 1, None)).unwrap();
        cache.upsert(row("obj-1", 2, None)).unwrap();
        assert_eq!(2, cache.retrieve("obj-1").unwrap().unwrap().version_num.number);
    }

    #[test]
    fn skipping_a_version_is_out_of_sync() {
        let cache = InMemoryObjectDetailsCache::new();
        cache.upsert(row("obj-1", 1, None)).unwrap();
        let err = cache.upsert(row("obj-1", 3, None)).unwrap_err();
        assert!(matches!(err, RocflError::ObjectOutOfSync(_)));
    }

    #[test]
    fn staging_first_mutable_head_revision_succeeds() {
        let cache = InMemoryObjectDetailsCache::new();
        cache.upsert(row("obj-1", 1, None)).unwrap();
        cache.upsert(row("obj-1", 1, Some(1))).unwrap();
        assert_eq!(
            Some(RevisionNum(1)),
            cache.retrieve("obj-1").unwrap().unwrap().revision_num
        );
    }

    #[test]
    fn skipping_a_mutable_head_revision_is_out_of_sync() {
        let cache = InMemoryObjectDetailsCache::new();
        cache.upsert(row("obj-1", 1, None)).unwrap();
        cache.upsert(row("obj-1", 1, Some(1))).unwrap();
        let err = cache.upsert(row("obj-1", 1, Some(3))).unwrap_err();
        assert!(matches!(err, RocflError::ObjectOutOfSync(_)));
    }

    #[test]
    fn committing_mutable_head_back_to_normal_succeeds() {
        let cache = InMemoryObjectDetailsCache::new();
        cache.upsert(row("obj-1", 1, None)).unwrap();
        cache.upsert(row("obj-1", 1, Some(1))).unwrap();
        cache.upsert(row("obj-1", 1, None)).unwrap();
        assert_eq!(None, cache.retrieve("obj-1").unwrap().unwrap().revision_num);
    }

    #[test]
    fn delete_removes_row() {
        let cache = InMemoryObjectDetailsCache::new();
        cache.upsert(row("obj-1", 1, None)).unwrap();
        cache.delete("obj-1").unwrap();
        assert!(cache.retrieve("obj-1").unwrap().is_none());
    }
}
