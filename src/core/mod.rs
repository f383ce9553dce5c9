/*!
 * Core dispatch pipeline
 *
 * Watcher events flow through the classifier, the folder resolver and the
 * transfer connection before the source is archived and the transfer is
 * recorded.
 */

pub mod archive;
pub mod classifier;
pub mod dispatch;
pub mod resolver;
pub mod retry;
pub mod sniff;
pub mod watch;

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use chrono::{DateTime, TimeZone, Utc};
use chrono_tz::Tz;
use serde::Serialize;

/// A file seen in the source folder, before dispatch
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PendingFile {
    pub path: PathBuf,
    pub filename: String,
    pub size: u64,
    pub modified: DateTime<Tz>,
}

impl PendingFile {
    /// Snapshot size and mtime of `path`, localised to `tz`
    pub fn from_path(path: &Path, tz: Tz) -> io::Result<Self> {
        let meta = fs::metadata(path)?;
        let filename = file_name_of(path).ok_or_else(|| {
            io::Error::new(
                io::ErrorKind::InvalidInput,
                format!("no file name in {}", path.display()),
            )
        })?;
        let modified: DateTime<Utc> = meta.modified()?.into();
        Ok(Self {
            path: path.to_path_buf(),
            filename: filename.to_string(),
            size: meta.len(),
            modified: tz.from_utc_datetime(&modified.naive_utc()),
        })
    }
}

/// What the watcher saw happen to a path
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventKind {
    Created,
    Modified,
    /// Synthesised for files already present at startup
    Exists,
}

/// One filesystem notification for the dispatcher
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileEvent {
    pub kind: EventKind,
    pub path: PathBuf,
}

impl FileEvent {
    pub fn new(kind: EventKind, path: impl Into<PathBuf>) -> Self {
        Self {
            kind,
            path: path.into(),
        }
    }
}

/// UTF-8 file name of `path`
pub(crate) fn file_name_of(path: &Path) -> Option<&str> {
    path.file_name().and_then(|n| n.to_str())
}
