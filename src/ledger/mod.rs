//! Durable bookkeeping: transfer history, folder mappings and uploads
//!
//! The dispatcher only talks to the [`HistoryLedger`] and [`FolderMappings`]
//! traits. [`SqliteStore`] implements both against one SQLite database; it is
//! cheap to clone, and clones share the same connection.

pub mod csv_import;
mod sqlite;

pub use csv_import::{load_folder_mappings, load_folder_mappings_from_reader, ImportSummary};
pub use sqlite::SqliteStore;

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, FixedOffset, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Ledger result type
pub type LedgerResult<T> = std::result::Result<T, LedgerError>;

/// Ledger errors
#[derive(Error, Debug)]
pub enum LedgerError {
    #[error("Database error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Invalid value: {0}")]
    InvalidValue(String),

    #[error("Database connection lock poisoned")]
    Poisoned,
}

/// Lifecycle of a transfer record
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransferStatus {
    Sent,
    Acknowledged,
}

impl TransferStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            TransferStatus::Sent => "sent",
            TransferStatus::Acknowledged => "acknowledged",
        }
    }
}

impl fmt::Display for TransferStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TransferStatus {
    type Err = LedgerError;

    fn from_str(s: &str) -> LedgerResult<Self> {
        match s {
            "sent" => Ok(TransferStatus::Sent),
            "acknowledged" => Ok(TransferStatus::Acknowledged),
            other => Err(LedgerError::InvalidValue(format!(
                "unknown transfer status '{}'",
                other
            ))),
        }
    }
}

/// Everything known about a transfer at the moment it succeeds
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct NewTransfer {
    pub local_hostname: String,
    pub remote_hostname: String,
    pub source_path: String,
    pub remote_path: String,
    pub remote_folder: Option<String>,
    pub remote_folder_tag: Option<String>,
    /// Full path of the archived copy, `None` when the source was deleted
    pub archive_path: Option<String>,
    pub filename: String,
    pub filesize: u64,
    pub file_timestamp: DateTime<FixedOffset>,
    pub content_type: String,
    pub sent_at: DateTime<Utc>,
    pub operating_user: String,
}

/// Stored history row
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TransferRecord {
    pub id: i64,
    pub local_hostname: String,
    pub remote_hostname: String,
    pub source_path: String,
    pub remote_path: String,
    pub remote_folder: Option<String>,
    pub remote_folder_tag: Option<String>,
    pub archive_path: Option<String>,
    pub filename: String,
    pub filesize: u64,
    pub file_timestamp: DateTime<FixedOffset>,
    pub content_type: String,
    pub status: TransferStatus,
    pub sent_at: DateTime<Utc>,
    pub acknowledged_at: Option<DateTime<Utc>>,
    pub acknowledged_by: Option<String>,
    pub acknowledged: bool,
    pub operating_user: String,
}

/// `(base_path, tag, label)` to remote sub-folder
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FolderMapping {
    pub base_path: String,
    pub folder_name: String,
    pub tag: String,
    pub label: String,
}

/// A file handed in by an uploader, reconciled against the history
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct UploadRecord {
    pub id: i64,
    pub filename: String,
    pub uploaded_at: DateTime<Utc>,
    pub uploaded_by: String,
    pub sent: bool,
    pub sent_at: Option<DateTime<Utc>>,
    pub audited: bool,
    pub auditor: Option<String>,
    pub audited_at: Option<DateTime<Utc>>,
}

/// Append-only record of successful transfers
pub trait HistoryLedger {
    /// Append one record and return its id
    fn record(&self, transfer: &NewTransfer) -> LedgerResult<i64>;

    /// All records for `filename`, oldest `sent_at` first
    fn find_by_filename(&self, filename: &str) -> LedgerResult<Vec<TransferRecord>>;

    /// Latest record for `filename`
    fn most_recent(&self, filename: &str) -> LedgerResult<Option<TransferRecord>> {
        Ok(self.find_by_filename(filename)?.pop())
    }

    /// Mark a record acknowledged by `user`
    fn acknowledge(&self, id: i64, user: &str, at: DateTime<Utc>)
        -> LedgerResult<TransferRecord>;

    /// Undo an acknowledgement
    fn unacknowledge(&self, id: i64) -> LedgerResult<TransferRecord>;
}

/// Read side of the folder mapping table
pub trait FolderMappings {
    fn find_mapping(
        &self,
        base_path: &str,
        tag: &str,
        label: &str,
    ) -> LedgerResult<Option<FolderMapping>>;

    /// Distinct labels that have at least one mapping under `base_path`
    fn labels(&self, base_path: &str) -> LedgerResult<Vec<String>>;
}
