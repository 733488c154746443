//! Durable audit journal, the default anchor backend.
//!
//! The journal is an append-only SQLite table in WAL mode. Every row carries
//! the digest of its predecessor, forming a hash chain that is verified on
//! every open. Tampering with a committed row makes the chain verification
//! fail before the journal accepts new writes.
//!
//! # Guarantees
//!
//! - Strict ordering: seq_no increases by 1 for each record
//! - Chain continuity: prev_digest must match the previous entry_digest
//! - Append-only: no in-place updates or deletes
//! - Corruption detection: open() verifies the full chain

use rusqlite::{params, Connection, OpenFlags, OptionalExtension};
use std::path::Path;
use std::sync::Mutex;
use tracing::{debug, error, info};

use capsulecore_core::error::ServiceError;

use crate::anchor::{AnchorAction, AnchorClient, AnchorReceipt, AnchorRecord, AnchorStatus};
use crate::error::JournalError;

/// Digest value preceding the first journal entry: 32 zero bytes, hex encoded.
pub const GENESIS_DIGEST: &str =
    "0000000000000000000000000000000000000000000000000000000000000000";

/// Observability counters for the journal.
#[derive(Debug, Default, Clone)]
pub struct JournalMetrics {
    /// Total records appended
    pub journal_records_appended_total: u64,
    /// Total chain verifications performed
    pub journal_chain_checks_total: u64,
    /// Total corruption detections
    pub journal_corruption_detections_total: u64,
}

/// Append-only, digest-chained anchor backend on SQLite.
#[derive(Debug)]
pub struct JournalAnchor {
    conn: Mutex<Connection>,
    metrics: Mutex<JournalMetrics>,
}

impl JournalAnchor {
    /// Create or open a journal at the specified path.
    ///
    /// Verifies the full digest chain before returning; a journal that fails
    /// verification is unusable until restored from backup.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, JournalError> {
        let path = path.as_ref();

        info!(path = %path.display(), "Opening audit journal");

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

        let journal = Self {
            conn: Mutex::new(conn),
            metrics: Mutex::new(JournalMetrics::default()),
        };

        journal.verify_chain()?;

        Ok(journal)
    }

    /// In-memory journal, for tests.
    pub fn open_in_memory() -> Result<Self, JournalError> {
        let conn = Connection::open_in_memory()?;
        Self::init_schema(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
            metrics: Mutex::new(JournalMetrics::default()),
        })
    }

    fn init_schema(conn: &Connection) -> Result<(), JournalError> {
        conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS anchor_records (
                seq_no INTEGER PRIMARY KEY AUTOINCREMENT,
                record_id TEXT NOT NULL UNIQUE,
                capsule_id TEXT NOT NULL,
                action TEXT NOT NULL,
                timestamp INTEGER NOT NULL,
                payload TEXT NOT NULL,
                payload_digest TEXT NOT NULL,
                prev_digest TEXT NOT NULL,
                entry_digest TEXT NOT NULL
            );

            CREATE INDEX IF NOT EXISTS idx_anchor_capsule_id
                ON anchor_records(capsule_id);
            "#,
        )?;

        Ok(())
    }

    /// Digest binding one entry to its predecessor.
    fn entry_digest(prev_digest: &str, record: &AnchorRecord) -> String {
        let mut hasher = blake3::Hasher::new();
        hasher.update(prev_digest.as_bytes());
        hasher.update(record.record_id.as_bytes());
        hasher.update(record.capsule_id.as_bytes());
        hasher.update(record.action.as_str().as_bytes());
        hasher.update(&record.timestamp.to_le_bytes());
        hasher.update(record.payload_digest.as_bytes());
        hex::encode(hasher.finalize().as_bytes())
    }

    /// Append a record, extending the digest chain.
    pub fn append(&self, record: &AnchorRecord) -> Result<AnchorReceipt, JournalError> {
        let mut conn = self.conn.lock().unwrap();
        let tx = conn.transaction()?;

        let prev_digest: String = tx
            .query_row(
                "SELECT entry_digest FROM anchor_records ORDER BY seq_no DESC LIMIT 1",
                [],
                |row| row.get(0),
            )
            .optional()?
            .unwrap_or_else(|| GENESIS_DIGEST.to_string());

        let entry_digest = Self::entry_digest(&prev_digest, record);
        let payload = record.payload.to_string();

        tx.execute(
            r#"
            INSERT INTO anchor_records (
                record_id, capsule_id, action, timestamp,
                payload, payload_digest, prev_digest, entry_digest
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
            "#,
            params![
                record.record_id,
                record.capsule_id,
                record.action.as_str(),
                record.timestamp as i64,
                payload,
                record.payload_digest,
                prev_digest,
                entry_digest,
            ],
        )?;

        let seq_no = tx.last_insert_rowid() as u64;
        tx.commit()?;

        self.metrics.lock().unwrap().journal_records_appended_total += 1;

        debug!(
            seq_no = seq_no,
            record_id = %record.record_id,
            capsule_id = %record.capsule_id,
            action = %record.action,
            "Anchor record appended"
        );

        Ok(AnchorReceipt {
            record_id: record.record_id.clone(),
            capsule_id: record.capsule_id.clone(),
            action: record.action,
            timestamp: record.timestamp,
            payload_digest: record.payload_digest.clone(),
            reference: format!("journal:{seq_no}"),
            status: AnchorStatus::Recorded,
        })
    }

    /// Walk the whole chain and verify every digest link.
    pub fn verify_chain(&self) -> Result<(), JournalError> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(
            r#"
            SELECT seq_no, record_id, capsule_id, action, timestamp,
                   payload, payload_digest, prev_digest, entry_digest
            FROM anchor_records
            ORDER BY seq_no ASC
            "#,
        )?;

        let rows = stmt.query_map([], |row| {
            Ok((
                row.get::<_, i64>(0)? as u64,
                row.get::<_, String>(1)?,
                row.get::<_, String>(2)?,
                row.get::<_, String>(3)?,
                row.get::<_, i64>(4)? as u64,
                row.get::<_, String>(5)?,
                row.get::<_, String>(6)?,
                row.get::<_, String>(7)?,
                row.get::<_, String>(8)?,
            ))
        })?;

        let mut expected_prev = GENESIS_DIGEST.to_string();
        let mut checked: u64 = 0;
        for row in rows {
            let (
                seq_no,
                record_id,
                capsule_id,
                action,
                timestamp,
                payload,
                payload_digest,
                prev_digest,
                entry_digest,
            ) = row?;

            if prev_digest != expected_prev {
                return Err(self.corruption(seq_no, "prev_digest does not match chain"));
            }

            let payload_recomputed = hex::encode(blake3::hash(payload.as_bytes()).as_bytes());
            if payload_recomputed != payload_digest {
                return Err(self.corruption(seq_no, "payload digest mismatch"));
            }

            let action = parse_action(&action)?;
            let probe = AnchorRecord {
                record_id,
                capsule_id,
                action,
                timestamp,
                payload: serde_json::Value::Null,
                payload_digest,
            };
            let recomputed = Self::entry_digest(&prev_digest, &probe);
            if recomputed != entry_digest {
                return Err(self.corruption(seq_no, "entry_digest mismatch"));
            }

            expected_prev = entry_digest;
            checked += 1;
        }

        let mut metrics = self.metrics.lock().unwrap();
        metrics.journal_chain_checks_total += 1;
        drop(metrics);

        debug!(records_checked = checked, "Journal chain verified");
        Ok(())
    }

    fn corruption(&self, seq_no: u64, detail: &str) -> JournalError {
        self.metrics
            .lock()
            .unwrap()
            .journal_corruption_detections_total += 1;
        error!(seq_no = seq_no, detail = detail, "Journal corruption detected");
        JournalError::CorruptionDetected {
            seq_no,
            detail: detail.to_string(),
        }
    }

    /// All receipts for one capsule, oldest first.
    pub fn receipts_for(&self, capsule_id: &str) -> Result<Vec<AnchorReceipt>, JournalError> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(
            r#"
            SELECT seq_no, record_id, capsule_id, action, timestamp, payload_digest
            FROM anchor_records
            WHERE capsule_id = ?1
            ORDER BY seq_no ASC
            "#,
        )?;

        let rows = stmt.query_map(params![capsule_id], |row| {
            Ok((
                row.get::<_, i64>(0)? as u64,
                row.get::<_, String>(1)?,
                row.get::<_, String>(2)?,
                row.get::<_, String>(3)?,
                row.get::<_, i64>(4)? as u64,
                row.get::<_, String>(5)?,
            ))
        })?;

        let mut receipts = Vec::new();
        for row in rows {
            let (seq_no, record_id, capsule_id, action, timestamp, payload_digest) = row?;
            receipts.push(AnchorReceipt {
                record_id,
                capsule_id,
                action: parse_action(&action)?,
                timestamp,
                payload_digest,
                reference: format!("journal:{seq_no}"),
                status: AnchorStatus::Recorded,
            });
        }
        Ok(receipts)
    }

    /// Total number of journal entries.
    pub fn len(&self) -> Result<u64, JournalError> {
        let conn = self.conn.lock().unwrap();
        let count: i64 =
            conn.query_row("SELECT COUNT(*) FROM anchor_records", [], |row| row.get(0))?;
        Ok(count as u64)
    }

    pub fn is_empty(&self) -> Result<bool, JournalError> {
        Ok(self.len()? == 0)
    }

    /// Snapshot of the journal counters.
    pub fn metrics(&self) -> JournalMetrics {
        self.metrics.lock().unwrap().clone()
    }
}

fn parse_action(text: &str) -> Result<AnchorAction, JournalError> {
    serde_json::from_value(serde_json::Value::String(text.to_string()))
        .map_err(JournalError::Serialization)
}

impl AnchorClient for JournalAnchor {
    fn record(&self, record: &AnchorRecord) -> Result<AnchorReceipt, ServiceError> {
        self.append(record)
            .map_err(|err| ServiceError::new(err.to_string()))
    }

    fn history(&self, capsule_id: &str) -> Result<Vec<AnchorReceipt>, ServiceError> {
        self.receipts_for(capsule_id)
            .map_err(|err| ServiceError::new(err.to_string()))
    }
}
