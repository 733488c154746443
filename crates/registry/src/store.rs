//! Capsule store backends.
//!
//! The registry talks to storage through the [`CapsuleStore`] trait. Two
//! backends are provided: an in-memory map for tests and embedders, and a
//! SQLite store with WAL mode for durable deployments.
//!
//! Both backends share the same contract:
//! - `insert` rejects ids that are live or were deleted earlier (tombstones)
//! - `compare_and_swap` only writes when the caller saw the latest revision
//! - `list` returns capsules ordered by registration time, then id

use capsulecore_core::time::unix_timestamp_ms;
use rusqlite::{params, Connection, OpenFlags, OptionalExtension};
use std::collections::{HashMap, HashSet};
use std::path::Path;
use std::sync::{Mutex, RwLock};
use tracing::{debug, info};

use crate::capsule::Capsule;
use crate::error::StoreError;

/// Storage contract for capsule records.
pub trait CapsuleStore: Send + Sync {
    /// Fetch a capsule by id.
    fn get(&self, id: &str) -> Result<Option<Capsule>, StoreError>;

    /// All live capsules, ordered by registration time then id.
    fn list(&self) -> Result<Vec<Capsule>, StoreError>;

    /// Insert a new capsule. Fails with [`StoreError::AlreadyExists`] when
    /// the id is live or tombstoned.
    fn insert(&self, capsule: &Capsule) -> Result<(), StoreError>;

    /// Replace the stored record if and only if its current revision equals
    /// `expected_revision`. The caller supplies the fully updated record,
    /// including the bumped revision.
    fn compare_and_swap(&self, expected_revision: u64, capsule: &Capsule)
        -> Result<(), StoreError>;

    /// Delete a capsule and tombstone its id. Returns the removed record.
    fn remove(&self, id: &str) -> Result<Capsule, StoreError>;

    /// Number of live capsules.
    fn len(&self) -> Result<usize, StoreError> {
        Ok(self.list()?.len())
    }
}

#[derive(Debug, Default)]
struct MemoryInner {
    live: HashMap<String, Capsule>,
    tombstones: HashSet<String>,
}

/// In-memory store backed by a `HashMap` under a read-write lock.
#[derive(Debug, Default)]
pub struct MemoryCapsuleStore {
    inner: RwLock<MemoryInner>,
}

impl MemoryCapsuleStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl CapsuleStore for MemoryCapsuleStore {
    fn get(&self, id: &str) -> Result<Option<Capsule>, StoreError> {
        let inner = self.inner.read().unwrap();
        Ok(inner.live.get(id).cloned())
    }

    fn list(&self) -> Result<Vec<Capsule>, StoreError> {
        let inner = self.inner.read().unwrap();
        let mut capsules: Vec<Capsule> = inner.live.values().cloned().collect();
        capsules.sort_by(|a, b| {
            a.registered_at_ms
                .cmp(&b.registered_at_ms)
                .then_with(|| a.id.cmp(&b.id))
        });
        Ok(capsules)
    }

    fn insert(&self, capsule: &Capsule) -> Result<(), StoreError> {
        let mut inner = self.inner.write().unwrap();
        if inner.live.contains_key(&capsule.id) || inner.tombstones.contains(&capsule.id) {
            return Err(StoreError::AlreadyExists {
                id: capsule.id.clone(),
            });
        }
        inner.live.insert(capsule.id.clone(), capsule.clone());
        Ok(())
    }

    fn compare_and_swap(
        &self,
        expected_revision: u64,
        capsule: &Capsule,
    ) -> Result<(), StoreError> {
        let mut inner = self.inner.write().unwrap();
        let current = inner
            .live
            .get(&capsule.id)
            .ok_or_else(|| StoreError::NotFound {
                id: capsule.id.clone(),
            })?;
        if current.revision != expected_revision {
            return Err(StoreError::RevisionMismatch {
                id: capsule.id.clone(),
                expected: expected_revision,
                found: current.revision,
            });
        }
        inner.live.insert(capsule.id.clone(), capsule.clone());
        Ok(())
    }

    fn remove(&self, id: &str) -> Result<Capsule, StoreError> {
        let mut inner = self.inner.write().unwrap();
        let removed = inner
            .live
            .remove(id)
            .ok_or_else(|| StoreError::NotFound { id: id.to_string() })?;
        inner.tombstones.insert(id.to_string());
        Ok(removed)
    }
}

/// Durable store on SQLite with WAL mode.
///
/// Records are stored as JSON alongside indexed columns for ordering and
/// concurrency checks. Tombstones live in their own table so deleted ids
/// stay unavailable across restarts.
pub struct SqliteCapsuleStore {
    conn: Mutex<Connection>,
}

impl SqliteCapsuleStore {
    /// Create or open a store at the specified path.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, StoreError> {
        let path = path.as_ref();

        info!(path = %path.display(), "Opening capsule store");

        // Create parent directories if they don't exist
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let conn = Connection::open_with_flags(
            path,
            OpenFlags::SQLITE_OPEN_READ_WRITE
                | OpenFlags::SQLITE_OPEN_CREATE
                | OpenFlags::SQLITE_OPEN_NO_MUTEX,
        )?;

        // Enable WAL mode for better concurrency and durability
        conn.pragma_update(None, "journal_mode", "WAL")?;
        conn.pragma_update(None, "synchronous", "NORMAL")?;

        Self::init_schema(&conn)?;

        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// In-memory SQLite store, for tests.
    pub fn open_in_memory() -> Result<Self, StoreError> {
        let conn = Connection::open_in_memory()?;
        Self::init_schema(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn init_schema(conn: &Connection) -> Result<(), StoreError> {
        conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS capsules (
                id TEXT PRIMARY KEY,
                record TEXT NOT NULL,
                revision INTEGER NOT NULL,
                registered_at INTEGER NOT NULL,
                updated_at INTEGER NOT NULL
            );

            CREATE TABLE IF NOT EXISTS capsule_tombstones (
                id TEXT PRIMARY KEY,
                deleted_at INTEGER NOT NULL
            );

            CREATE INDEX IF NOT EXISTS idx_capsules_registered_at
                ON capsules(registered_at);
            "#,
        )?;

        Ok(())
    }
}

impl CapsuleStore for SqliteCapsuleStore {
    fn get(&self, id: &str) -> Result<Option<Capsule>, StoreError> {
        let conn = self.conn.lock().unwrap();
        let record: Option<String> = conn
            .query_row("SELECT record FROM capsules WHERE id = ?1", params![id], |row| {
                row.get(0)
            })
            .optional()?;
        match record {
            Some(json) => Ok(Some(serde_json::from_str(&json)?)),
            None => Ok(None),
        }
    }

    fn list(&self) -> Result<Vec<Capsule>, StoreError> {
        let conn = self.conn.lock().unwrap();
        let mut stmt =
            conn.prepare("SELECT record FROM capsules ORDER BY registered_at, id")?;
        let rows = stmt.query_map([], |row| row.get::<_, String>(0))?;

        let mut capsules = Vec::new();
        for row in rows {
            let json = row?;
            capsules.push(serde_json::from_str(&json)?);
        }
        Ok(capsules)
    }

    fn insert(&self, capsule: &Capsule) -> Result<(), StoreError> {
        let mut conn = self.conn.lock().unwrap();
        let tx = conn.transaction()?;

        let live: Option<i64> = tx
            .query_row(
                "SELECT 1 FROM capsules WHERE id = ?1",
                params![capsule.id],
                |row| row.get(0),
            )
            .optional()?;
        let tombstoned: Option<i64> = tx
            .query_row(
                "SELECT 1 FROM capsule_tombstones WHERE id = ?1",
                params![capsule.id],
                |row| row.get(0),
            )
            .optional()?;
        if live.is_some() || tombstoned.is_some() {
            return Err(StoreError::AlreadyExists {
                id: capsule.id.clone(),
            });
        }

        let record = serde_json::to_string(capsule)?;
        tx.execute(
            r#"
            INSERT INTO capsules (id, record, revision, registered_at, updated_at)
            VALUES (?1, ?2, ?3, ?4, ?5)
            "#,
            params![
                capsule.id,
                record,
                capsule.revision as i64,
                capsule.registered_at_ms as i64,
                capsule.last_updated_ms as i64,
            ],
        )?;
        tx.commit()?;

        debug!(capsule_id = %capsule.id, "Capsule inserted");
        Ok(())
    }

    fn compare_and_swap(
        &self,
        expected_revision: u64,
        capsule: &Capsule,
    ) -> Result<(), StoreError> {
        let mut conn = self.conn.lock().unwrap();
        let tx = conn.transaction()?;

        let found: Option<i64> = tx
            .query_row(
                "SELECT revision FROM capsules WHERE id = ?1",
                params![capsule.id],
                |row| row.get(0),
            )
            .optional()?;
        let found = match found {
            Some(revision) => revision as u64,
            None => {
                return Err(StoreError::NotFound {
                    id: capsule.id.clone(),
                })
            }
        };
        if found != expected_revision {
            return Err(StoreError::RevisionMismatch {
                id: capsule.id.clone(),
                expected: expected_revision,
                found,
            });
        }

        let record = serde_json::to_string(capsule)?;
        tx.execute(
            r#"
            UPDATE capsules SET record = ?2, revision = ?3, updated_at = ?4
            WHERE id = ?1 AND revision = ?5
            "#,
            params![
                capsule.id,
                record,
                capsule.revision as i64,
                capsule.last_updated_ms as i64,
                expected_revision as i64,
            ],
        )?;
        tx.commit()?;

        Ok(())
    }

    fn remove(&self, id: &str) -> Result<Capsule, StoreError> {
        let mut conn = self.conn.lock().unwrap();
        let tx = conn.transaction()?;

        let record: Option<String> = tx
            .query_row(
                "SELECT record FROM capsules WHERE id = ?1",
                params![id],
                |row| row.get(0),
            )
            .optional()?;
        let json = record.ok_or_else(|| StoreError::NotFound { id: id.to_string() })?;
        let capsule: Capsule = serde_json::from_str(&json)?;

        tx.execute("DELETE FROM capsules WHERE id = ?1", params![id])?;
        tx.execute(
            "INSERT OR IGNORE INTO capsule_tombstones (id, deleted_at) VALUES (?1, ?2)",
            params![id, unix_timestamp_ms() as i64],
        )?;
        tx.commit()?;

        debug!(capsule_id = %id, "Capsule removed");
        Ok(capsule)
    }

    fn len(&self) -> Result<usize, StoreError> {
        let conn = self.conn.lock().unwrap();
        let count: i64 = conn.query_row("SELECT COUNT(*) FROM capsules", [], |row| row.get(0))?;
        Ok(count as usize)
    }
}
