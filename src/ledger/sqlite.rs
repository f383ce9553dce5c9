//! SQLite backed ledger
//!
//! Timestamps are stored as chrono text values; UTC values share one format,
//! so ordering by `sent_at` is chronological.

use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard};

use chrono::{DateTime, Utc};
use rusqlite::types::{FromSql, FromSqlError, FromSqlResult, ToSqlOutput, ValueRef};
use rusqlite::{params, Connection, OptionalExtension, Row, ToSql};
use tracing::{debug, info};

use super::{
    FolderMapping, FolderMappings, HistoryLedger, LedgerError, LedgerResult, NewTransfer,
    TransferRecord, TransferStatus, UploadRecord,
};

const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS transfer_history (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    local_hostname TEXT NOT NULL,
    remote_hostname TEXT NOT NULL,
    source_path TEXT NOT NULL,
    remote_path TEXT NOT NULL,
    remote_folder TEXT,
    remote_folder_tag TEXT,
    archive_path TEXT,
    filename TEXT NOT NULL,
    filesize INTEGER NOT NULL,
    file_timestamp TEXT NOT NULL,
    content_type TEXT NOT NULL,
    status TEXT NOT NULL DEFAULT 'sent',
    sent_at TEXT NOT NULL,
    acknowledged_at TEXT,
    acknowledged_by TEXT,
    acknowledged INTEGER NOT NULL DEFAULT 0,
    operating_user TEXT NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_transfer_history_filename ON transfer_history(filename);

CREATE TABLE IF NOT EXISTS folder_mapping (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    base_path TEXT NOT NULL,
    folder_name TEXT NOT NULL,
    tag TEXT NOT NULL,
    label TEXT NOT NULL,
    UNIQUE (base_path, folder_name, label),
    UNIQUE (base_path, tag, label)
);

CREATE TABLE IF NOT EXISTS upload (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    filename TEXT NOT NULL,
    uploaded_at TEXT NOT NULL,
    uploaded_by TEXT NOT NULL,
    sent INTEGER NOT NULL DEFAULT 0,
    sent_at TEXT,
    audited INTEGER NOT NULL DEFAULT 0,
    auditor TEXT,
    audited_at TEXT
);
CREATE INDEX IF NOT EXISTS idx_upload_filename ON upload(filename);
"#;

const TRANSFER_COLUMNS: &str = "id, local_hostname, remote_hostname, source_path, remote_path, \
     remote_folder, remote_folder_tag, archive_path, filename, filesize, file_timestamp, \
     content_type, status, sent_at, acknowledged_at, acknowledged_by, acknowledged, operating_user";

const UPLOAD_COLUMNS: &str =
    "id, filename, uploaded_at, uploaded_by, sent, sent_at, audited, auditor, audited_at";

impl ToSql for TransferStatus {
    fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
        Ok(self.as_str().into())
    }
}

impl FromSql for TransferStatus {
    fn column_result(value: ValueRef<'_>) -> FromSqlResult<Self> {
        value
            .as_str()?
            .parse()
            .map_err(|e: LedgerError| FromSqlError::Other(Box::new(e)))
    }
}

/// History, folder mappings and uploads in one SQLite database
#[derive(Clone)]
pub struct SqliteStore {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteStore {
    /// Open or create a database file, creating its parent folder
    pub fn open(path: impl AsRef<Path>) -> LedgerResult<Self> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        let conn = Connection::open(path)?;
        let store = Self::from_connection(conn)?;
        info!(path = %path.display(), "Ledger opened");
        Ok(store)
    }

    /// Private database that lives as long as the store (and its clones)
    pub fn open_in_memory() -> LedgerResult<Self> {
        Self::from_connection(Connection::open_in_memory()?)
    }

    fn from_connection(conn: Connection) -> LedgerResult<Self> {
        conn.execute_batch(SCHEMA)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    fn lock(&self) -> LedgerResult<MutexGuard<'_, Connection>> {
        self.conn.lock().map_err(|_| LedgerError::Poisoned)
    }

    /// Insert a mapping unless `(base_path, folder_name, label)` already exists
    ///
    /// Returns `true` when a row was added.
    pub fn insert_mapping(&self, mapping: &FolderMapping) -> LedgerResult<bool> {
        let conn = self.lock()?;
        let exists: Option<i64> = conn
            .query_row(
                "SELECT id FROM folder_mapping WHERE base_path = ?1 AND folder_name = ?2 AND label = ?3",
                params![mapping.base_path, mapping.folder_name, mapping.label],
                |row| row.get(0),
            )
            .optional()?;
        if exists.is_some() {
            return Ok(false);
        }
        conn.execute(
            "INSERT INTO folder_mapping (base_path, folder_name, tag, label) VALUES (?1, ?2, ?3, ?4)",
            params![
                mapping.base_path,
                mapping.folder_name,
                mapping.tag,
                mapping.label
            ],
        )?;
        debug!(
            "Added folder mapping {}/{} tag={} label={}",
            mapping.base_path, mapping.folder_name, mapping.tag, mapping.label
        );
        Ok(true)
    }

    pub fn mappings(&self) -> LedgerResult<Vec<FolderMapping>> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare(
            "SELECT base_path, folder_name, tag, label FROM folder_mapping \
             ORDER BY base_path, label, tag",
        )?;
        let rows = stmt.query_map([], mapping_from_row)?;
        Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
    }

    /// Register a file handed in by `user`
    pub fn register_upload(
        &self,
        filename: &str,
        user: &str,
        at: DateTime<Utc>,
    ) -> LedgerResult<i64> {
        let conn = self.lock()?;
        conn.execute(
            "INSERT INTO upload (filename, uploaded_at, uploaded_by) VALUES (?1, ?2, ?3)",
            params![filename, at, user],
        )?;
        Ok(conn.last_insert_rowid())
    }

    pub fn uploads(&self) -> LedgerResult<Vec<UploadRecord>> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare(&format!(
            "SELECT {} FROM upload ORDER BY uploaded_at, id",
            UPLOAD_COLUMNS
        ))?;
        let rows = stmt.query_map([], upload_from_row)?;
        Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
    }

    /// Backfill `sent`/`sent_at` on every upload from the history
    ///
    /// When several transfers share the filename the earliest `sent_at` wins.
    /// Uploads with no transfer are reset to unsent. Returns the number of
    /// uploads whose sent state changed.
    pub fn reconcile_uploads(&self) -> LedgerResult<usize> {
        let mut conn = self.lock()?;
        let tx = conn.transaction()?;
        let mut changed = 0;
        {
            let mut uploads = tx.prepare("SELECT id, filename, sent, sent_at FROM upload")?;
            let rows = uploads
                .query_map([], |row| {
                    Ok((
                        row.get::<_, i64>(0)?,
                        row.get::<_, String>(1)?,
                        row.get::<_, bool>(2)?,
                        row.get::<_, Option<DateTime<Utc>>>(3)?,
                    ))
                })?
                .collect::<rusqlite::Result<Vec<_>>>()?;

            let mut earliest = tx.prepare(
                "SELECT sent_at FROM transfer_history WHERE filename = ?1 \
                 ORDER BY sent_at ASC, id ASC LIMIT 1",
            )?;
            for (id, filename, sent, sent_at) in rows {
                let first: Option<DateTime<Utc>> = earliest
                    .query_row(params![filename], |row| row.get(0))
                    .optional()?;
                let now_sent = first.is_some();
                if now_sent == sent && first == sent_at {
                    continue;
                }
                tx.execute(
                    "UPDATE upload SET sent = ?1, sent_at = ?2 WHERE id = ?3",
                    params![now_sent, first, id],
                )?;
                changed += 1;
            }
        }
        tx.commit()?;
        info!("Reconciled uploads against history, {} changed", changed);
        Ok(changed)
    }

    /// Flag every sent, not yet audited upload as audited by `auditor`
    pub fn audit_uploads(&self, auditor: &str, at: DateTime<Utc>) -> LedgerResult<usize> {
        let conn = self.lock()?;
        let n = conn.execute(
            "UPDATE upload SET audited = 1, auditor = ?1, audited_at = ?2 \
             WHERE sent = 1 AND audited = 0",
            params![auditor, at],
        )?;
        Ok(n)
    }

    /// Clear the audit flag on every upload
    pub fn unaudit_uploads(&self) -> LedgerResult<usize> {
        let conn = self.lock()?;
        let n = conn.execute(
            "UPDATE upload SET audited = 0, auditor = NULL, audited_at = NULL WHERE audited = 1",
            [],
        )?;
        Ok(n)
    }

    fn transfer_by_id(conn: &Connection, id: i64) -> LedgerResult<TransferRecord> {
        conn.query_row(
            &format!("SELECT {} FROM transfer_history WHERE id = ?1", TRANSFER_COLUMNS),
            params![id],
            transfer_from_row,
        )
        .optional()?
        .ok_or_else(|| LedgerError::NotFound(format!("transfer record {}", id)))
    }
}

impl HistoryLedger for SqliteStore {
    fn record(&self, t: &NewTransfer) -> LedgerResult<i64> {
        let filesize = i64::try_from(t.filesize)
            .map_err(|_| LedgerError::InvalidValue(format!("file size {}", t.filesize)))?;
        let conn = self.lock()?;
        conn.execute(
            "INSERT INTO transfer_history (local_hostname, remote_hostname, source_path, \
             remote_path, remote_folder, remote_folder_tag, archive_path, filename, filesize, \
             file_timestamp, content_type, status, sent_at, operating_user) \
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14)",
            params![
                t.local_hostname,
                t.remote_hostname,
                t.source_path,
                t.remote_path,
                t.remote_folder,
                t.remote_folder_tag,
                t.archive_path,
                t.filename,
                filesize,
                t.file_timestamp,
                t.content_type,
                TransferStatus::Sent,
                t.sent_at,
                t.operating_user,
            ],
        )?;
        Ok(conn.last_insert_rowid())
    }

    fn find_by_filename(&self, filename: &str) -> LedgerResult<Vec<TransferRecord>> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare(&format!(
            "SELECT {} FROM transfer_history WHERE filename = ?1 ORDER BY sent_at ASC, id ASC",
            TRANSFER_COLUMNS
        ))?;
        let rows = stmt.query_map(params![filename], transfer_from_row)?;
        Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
    }

    fn acknowledge(&self, id: i64, user: &str, at: DateTime<Utc>) -> LedgerResult<TransferRecord> {
        let conn = self.lock()?;
        let n = conn.execute(
            "UPDATE transfer_history SET status = ?1, acknowledged = 1, acknowledged_at = ?2, \
             acknowledged_by = ?3 WHERE id = ?4",
            params![TransferStatus::Acknowledged, at, user, id],
        )?;
        if n == 0 {
            return Err(LedgerError::NotFound(format!("transfer record {}", id)));
        }
        Self::transfer_by_id(&conn, id)
    }

    fn unacknowledge(&self, id: i64) -> LedgerResult<TransferRecord> {
        let conn = self.lock()?;
        let n = conn.execute(
            "UPDATE transfer_history SET status = ?1, acknowledged = 0, acknowledged_at = NULL, \
             acknowledged_by = NULL WHERE id = ?2",
            params![TransferStatus::Sent, id],
        )?;
        if n == 0 {
            return Err(LedgerError::NotFound(format!("transfer record {}", id)));
        }
        Self::transfer_by_id(&conn, id)
    }
}

impl FolderMappings for SqliteStore {
    fn find_mapping(
        &self,
        base_path: &str,
        tag: &str,
        label: &str,
    ) -> LedgerResult<Option<FolderMapping>> {
        let conn = self.lock()?;
        let mapping = conn
            .query_row(
                "SELECT base_path, folder_name, tag, label FROM folder_mapping \
                 WHERE base_path = ?1 AND tag = ?2 AND label = ?3",
                params![base_path, tag, label],
                mapping_from_row,
            )
            .optional()?;
        Ok(mapping)
    }

    fn labels(&self, base_path: &str) -> LedgerResult<Vec<String>> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare(
            "SELECT DISTINCT label FROM folder_mapping WHERE base_path = ?1 ORDER BY label",
        )?;
        let rows = stmt.query_map(params![base_path], |row| row.get(0))?;
        Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
    }
}

fn mapping_from_row(row: &Row<'_>) -> rusqlite::Result<FolderMapping> {
    Ok(FolderMapping {
        base_path: row.get(0)?,
        folder_name: row.get(1)?,
        tag: row.get(2)?,
        label: row.get(3)?,
    })
}

fn transfer_from_row(row: &Row<'_>) -> rusqlite::Result<TransferRecord> {
    Ok(TransferRecord {
        id: row.get(0)?,
        local_hostname: row.get(1)?,
        remote_hostname: row.get(2)?,
        source_path: row.get(3)?,
        remote_path: row.get(4)?,
        remote_folder: row.get(5)?,
        remote_folder_tag: row.get(6)?,
        archive_path: row.get(7)?,
        filename: row.get(8)?,
        filesize: row.get::<_, i64>(9)?.max(0) as u64,
        file_timestamp: row.get(10)?,
        content_type: row.get(11)?,
        status: row.get(12)?,
        sent_at: row.get(13)?,
        acknowledged_at: row.get(14)?,
        acknowledged_by: row.get(15)?,
        acknowledged: row.get(16)?,
        operating_user: row.get(17)?,
    })
}

fn upload_from_row(row: &Row<'_>) -> rusqlite::Result<UploadRecord> {
    Ok(UploadRecord {
        id: row.get(0)?,
        filename: row.get(1)?,
        uploaded_at: row.get(2)?,
        uploaded_by: row.get(3)?,
        sent: row.get(4)?,
        sent_at: row.get(5)?,
        audited: row.get(6)?,
        auditor: row.get(7)?,
        audited_at: row.get(8)?,
    })
}
