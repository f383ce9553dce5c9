//! Bulk load of folder mappings from CSV
//!
//! Expected header (any case, any column order):
//! `base_path, folder, folder_tag, label`. Fields may be quoted with single
//! quotes. Values are trimmed and lower-cased before storage.

use std::fs::File;
use std::io::Read;
use std::path::Path;

use csv::{ReaderBuilder, StringRecord, Trim};
use serde::Serialize;
use tracing::info;

use super::{FolderMapping, LedgerError, LedgerResult, SqliteStore};

const REQUIRED_COLUMNS: [&str; 4] = ["base_path", "folder", "folder_tag", "label"];

/// Counts from one import
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ImportSummary {
    /// Data rows read
    pub rows: usize,
    /// New mappings written
    pub added: usize,
    /// Rows whose `(base_path, folder, label)` was already present
    pub existing: usize,
}

/// Load mappings from a CSV file into `store`
pub fn load_folder_mappings(store: &SqliteStore, path: &Path) -> LedgerResult<ImportSummary> {
    let file = File::open(path)?;
    let summary = load_folder_mappings_from_reader(store, file)?;
    info!(
        "Loaded folder mappings from {}: {} rows, {} added, {} already present",
        path.display(),
        summary.rows,
        summary.added,
        summary.existing
    );
    Ok(summary)
}

/// Load mappings from any CSV source
pub fn load_folder_mappings_from_reader<R: Read>(
    store: &SqliteStore,
    source: R,
) -> LedgerResult<ImportSummary> {
    let mut reader = ReaderBuilder::new()
        .quote(b'\'')
        .trim(Trim::All)
        .from_reader(source);

    let headers: Vec<String> = reader
        .headers()?
        .iter()
        .map(|h| h.to_lowercase())
        .collect();
    let mut columns = [0usize; 4];
    for (slot, name) in columns.iter_mut().zip(REQUIRED_COLUMNS) {
        *slot = headers
            .iter()
            .position(|h| h == name)
            .ok_or_else(|| LedgerError::InvalidValue(format!("CSV is missing column '{}'", name)))?;
    }

    let mut summary = ImportSummary::default();
    for record in reader.records() {
        let record = record?;
        let mapping = FolderMapping {
            base_path: field(&record, columns[0])?,
            folder_name: field(&record, columns[1])?,
            tag: field(&record, columns[2])?,
            label: field(&record, columns[3])?,
        };
        summary.rows += 1;
        if store.insert_mapping(&mapping)? {
            summary.added += 1;
        } else {
            summary.existing += 1;
        }
    }
    Ok(summary)
}

fn field(record: &StringRecord, index: usize) -> LedgerResult<String> {
    record
        .get(index)
        .map(|v| v.trim().to_lowercase())
        .ok_or_else(|| {
            let line = record.position().map(|p| p.line()).unwrap_or(0);
            LedgerError::InvalidValue(format!("line {}: missing column {}", line, index + 1))
        })
}
