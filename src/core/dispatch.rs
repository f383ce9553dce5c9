/*!
 * Dispatch pipeline
 *
 * One file at a time: sniff, classify, resolve a remote folder, put, then
 * record the transfer and archive (or delete) the source. The history row
 * is written before the source is moved, so a crash in between leaves the
 * ledger slightly ahead of the local disk, never behind the remote side.
 */

use std::collections::HashSet;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use chrono::Utc;
use chrono_tz::Tz;
use filetime::FileTime;
use tracing::{debug, info, warn};

use super::archive::archive_filename;
use super::classifier::FileClassifier;
use super::resolver::{
    DayFolderHandler, FolderHandler, FolderSelection, LookupFolderHandler, MimeTypeFolderHandler,
};
use super::sniff::sniff_content_type;
use super::{file_name_of, EventKind, FileEvent, PendingFile};
use crate::config::{current_user, DispatchConfig, FolderStrategy};
use crate::error::{ParcelError, Result};
use crate::ledger::{HistoryLedger, NewTransfer, SqliteStore};
use crate::transport::{Connector, PutOutcome, TransferConnection, TransportError};

/// Default mode applied to existing files by `touch_existing`
pub const DEFAULT_FILE_MODE: u32 = 0o644;

/// Where one `handle` call stopped
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DispatchOutcome {
    /// The path is gone (or is not a regular file)
    Missing,
    /// The classifier turned the file down
    Rejected,
    /// No remote folder could be chosen; the file stays put
    Unresolved,
    /// The destination refused the file; the file stays put
    Skipped,
    /// Sent and recorded
    Sent {
        record_id: i64,
        archived_to: Option<PathBuf>,
    },
}

impl DispatchOutcome {
    pub fn is_sent(&self) -> bool {
        matches!(self, DispatchOutcome::Sent { .. })
    }
}

/// Folders, naming and identity used by a [`Dispatcher`]
#[derive(Debug, Clone)]
pub struct DispatchSettings {
    pub source_dir: PathBuf,
    /// Remote base folder; may start with `~`
    pub destination_dir: String,
    pub archive_dir: Option<PathBuf>,
    /// `*.ext` globs used by the startup scan
    pub file_patterns: Vec<String>,
    pub file_mode: u32,
    pub mkdir_local: bool,
    pub mkdir_remote: bool,
    pub time_zone: Tz,
    pub local_hostname: String,
    pub remote_hostname: String,
    pub operating_user: String,
}

impl DispatchSettings {
    pub fn new(source_dir: impl Into<PathBuf>, destination_dir: impl Into<String>) -> Self {
        Self {
            source_dir: source_dir.into(),
            destination_dir: destination_dir.into(),
            archive_dir: None,
            file_patterns: Vec::new(),
            file_mode: DEFAULT_FILE_MODE,
            mkdir_local: false,
            mkdir_remote: false,
            time_zone: Tz::UTC,
            local_hostname: local_hostname(),
            remote_hostname: "localhost".to_string(),
            operating_user: current_user(),
        }
    }

    pub fn with_archive_dir(mut self, archive_dir: impl Into<PathBuf>) -> Self {
        self.archive_dir = Some(archive_dir.into());
        self
    }

    pub fn with_patterns<I, S>(mut self, patterns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.file_patterns = patterns.into_iter().map(Into::into).collect();
        self
    }
}

/// Drives files from the source folder to the destination
pub struct Dispatcher<C: Connector> {
    settings: DispatchSettings,
    classifier: FileClassifier,
    folders: Box<dyn FolderHandler>,
    connection: TransferConnection<C>,
    ledger: Box<dyn HistoryLedger>,
}

impl<C: Connector> Dispatcher<C> {
    pub fn new(
        settings: DispatchSettings,
        classifier: FileClassifier,
        folders: Box<dyn FolderHandler>,
        connection: TransferConnection<C>,
        ledger: Box<dyn HistoryLedger>,
    ) -> Self {
        Self {
            settings,
            classifier,
            folders,
            connection,
            ledger,
        }
    }

    /// Wire a dispatcher from configuration, sharing `store` for history and mappings
    pub fn from_config(config: &DispatchConfig, connector: C, store: SqliteStore) -> Result<Self> {
        let settings = config.dispatch_settings()?;
        let folders: Box<dyn FolderHandler> = match config.folder_strategy {
            FolderStrategy::Lookup => Box::new(LookupFolderHandler::new(
                config.tag_rules()?,
                store.clone(),
                &config.destination_dir,
            )?),
            FolderStrategy::MimeType => Box::new(MimeTypeFolderHandler),
            FolderStrategy::Day => Box::new(DayFolderHandler::new(settings.time_zone)),
        };
        let connection = TransferConnection::new(connector, config.retry.policy())
            .with_create_missing(config.mkdir_remote);

        Ok(Self::new(
            settings,
            config.classifier()?,
            folders,
            connection,
            Box::new(store),
        ))
    }

    pub fn settings(&self) -> &DispatchSettings {
        &self.settings
    }

    pub fn connection(&self) -> &TransferConnection<C> {
        &self.connection
    }

    pub fn connection_mut(&mut self) -> &mut TransferConnection<C> {
        &mut self.connection
    }

    /// Confirm (or create) the local folders and the remote base folder
    ///
    /// The remote base folder is replaced by its `~`-expanded form.
    pub fn check_folders(&mut self) -> Result<()> {
        self.settings.source_dir = local_folder(&self.settings.source_dir, self.settings.mkdir_local)?;
        if let Some(archive) = &self.settings.archive_dir {
            self.settings.archive_dir = Some(local_folder(archive, self.settings.mkdir_local)?);
        }

        let destination = self.settings.destination_dir.clone();
        match self
            .connection
            .ensure_directory(&destination, self.settings.mkdir_remote)
        {
            Ok(path) => {
                info!("Destination folder {} on {}", path, self.connection.endpoint());
                self.settings.destination_dir = path;
                Ok(())
            }
            Err(TransportError::RemoteNotFound(path)) => {
                Err(ParcelError::FolderNotFound(PathBuf::from(path)))
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Handle one watcher event
    ///
    /// Only hard transfer, ledger and local I/O failures are errors; every
    /// other stop is reported as an outcome.
    pub fn handle(&mut self, event: &FileEvent) -> Result<DispatchOutcome> {
        let path = event.path.as_path();
        if !path.is_file() {
            if event.kind == EventKind::Modified {
                debug!("{} modified but no longer there", path.display());
            }
            return Ok(DispatchOutcome::Missing);
        }

        let filename = match file_name_of(path) {
            Some(name) => name.to_string(),
            None => {
                warn!("Ignoring {}: file name is not UTF-8", path.display());
                return Ok(DispatchOutcome::Rejected);
            }
        };

        let content_type = match sniff_content_type(path) {
            Ok(Some(content_type)) => content_type,
            Ok(None) => {
                debug!("{}: empty, waiting for content", filename);
                return Ok(DispatchOutcome::Rejected);
            }
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(DispatchOutcome::Missing),
            Err(e) => {
                debug!("{}: cannot sniff content ({})", filename, e);
                return Ok(DispatchOutcome::Rejected);
            }
        };

        if !self.classifier.eligible(path, &filename, content_type) {
            return Ok(DispatchOutcome::Rejected);
        }

        let pending = match PendingFile::from_path(path, self.settings.time_zone) {
            Ok(pending) => pending,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(DispatchOutcome::Missing),
            Err(e) => return Err(e.into()),
        };

        let selection = self.folders.select(
            &filename,
            content_type,
            &self.settings.destination_dir,
            &mut self.connection,
        )?;
        let remote_dir = match &selection.resolved_path {
            Some(dir) => dir.clone(),
            None => {
                info!(
                    "{}: no remote folder found under {}, leaving it in place",
                    filename, self.settings.destination_dir
                );
                return Ok(DispatchOutcome::Unresolved);
            }
        };

        let remote_path = match self.connection.put(path, &remote_dir)? {
            PutOutcome::Sent { remote_path, .. } => remote_path,
            PutOutcome::Skipped { .. } => return Ok(DispatchOutcome::Skipped),
        };

        self.finish(&pending, content_type, &selection, remote_path)
    }

    /// Record the transfer, then archive or delete the source
    fn finish(
        &mut self,
        pending: &PendingFile,
        content_type: &str,
        selection: &FolderSelection,
        remote_path: String,
    ) -> Result<DispatchOutcome> {
        let archived_to = self
            .settings
            .archive_dir
            .as_ref()
            .map(|dir| dir.join(archive_filename(&pending.filename)));

        let record_id = self.ledger.record(&NewTransfer {
            local_hostname: self.settings.local_hostname.clone(),
            remote_hostname: self.settings.remote_hostname.clone(),
            source_path: pending.path.to_string_lossy().into_owned(),
            remote_path,
            remote_folder: selection.folder_name.clone(),
            remote_folder_tag: selection.tag.clone(),
            archive_path: archived_to
                .as_ref()
                .map(|p| p.to_string_lossy().into_owned()),
            filename: pending.filename.clone(),
            filesize: pending.size,
            file_timestamp: pending.modified.fixed_offset(),
            content_type: content_type.to_string(),
            sent_at: Utc::now(),
            operating_user: self.settings.operating_user.clone(),
        })?;

        match &archived_to {
            Some(target) => {
                fs::rename(&pending.path, target)?;
                info!("Archived {} as {}", pending.filename, target.display());
            }
            None => {
                fs::remove_file(&pending.path)?;
                debug!("Removed {}", pending.path.display());
            }
        }

        Ok(DispatchOutcome::Sent {
            record_id,
            archived_to,
        })
    }

    /// Process files already in the source folder, in name order per pattern
    ///
    /// Returns the number of files sent.
    pub fn process_existing_files(&mut self) -> Result<usize> {
        let files = self.existing_files()?;
        info!("Checking {} existing file(s) in {}", files.len(), self.settings.source_dir.display());

        let mut sent = 0;
        for path in files {
            if self.handle(&FileEvent::new(EventKind::Exists, path))?.is_sent() {
                sent += 1;
            }
        }
        info!("Existing files done, {} sent", sent);
        Ok(sent)
    }

    /// Apply the file mode and a fresh mtime to existing eligible files
    ///
    /// Nothing is sent here; the startup scan is what picks these files up.
    pub fn touch_existing(&self) -> Result<usize> {
        let now = FileTime::now();
        let mut touched = 0;
        for path in self.existing_files()? {
            let filename = match file_name_of(&path) {
                Some(name) => name,
                None => continue,
            };
            let content_type = match sniff_content_type(&path) {
                Ok(Some(content_type)) => content_type,
                _ => continue,
            };
            if !self.classifier.passes_filters(filename, content_type) {
                continue;
            }
            set_mode(&path, self.settings.file_mode)?;
            filetime::set_file_mtime(&path, now)?;
            touched += 1;
        }
        debug!("Touched {} existing file(s)", touched);
        Ok(touched)
    }

    /// Snapshot of files waiting in the source folder
    pub fn pending_files(&self) -> Result<Vec<PendingFile>> {
        pending_files(&self.settings.source_dir, self.settings.time_zone)
    }

    fn existing_files(&self) -> Result<Vec<PathBuf>> {
        let base = self.settings.source_dir.to_string_lossy();
        let base = glob::Pattern::escape(&base);
        let mut seen = HashSet::new();
        let mut files = Vec::new();

        for pattern in &self.settings.file_patterns {
            let full = format!("{}/{}", base.trim_end_matches('/'), pattern);
            let entries = glob::glob(&full).map_err(|e| {
                ParcelError::Config(format!("invalid file pattern '{}': {}", pattern, e))
            })?;
            let mut matched: Vec<PathBuf> = entries
                .filter_map(|entry| entry.ok())
                .filter(|p| p.is_file())
                .collect();
            matched.sort_by(|a, b| a.file_name().cmp(&b.file_name()));
            for path in matched {
                if seen.insert(path.clone()) {
                    files.push(path);
                }
            }
        }
        Ok(files)
    }
}

/// Regular files directly under `source_dir`, sorted by name
pub fn pending_files(source_dir: &Path, tz: Tz) -> Result<Vec<PendingFile>> {
    let mut pending = Vec::new();
    for entry in fs::read_dir(source_dir)? {
        let entry = entry?;
        if !entry.file_type()?.is_file() {
            continue;
        }
        match PendingFile::from_path(&entry.path(), tz) {
            Ok(file) => pending.push(file),
            Err(e) if e.kind() == io::ErrorKind::NotFound => continue,
            Err(e) if e.kind() == io::ErrorKind::InvalidInput => continue,
            Err(e) => return Err(e.into()),
        }
    }
    pending.sort_by(|a, b| a.filename.cmp(&b.filename));
    Ok(pending)
}

/// Expand `~`, then confirm or create a local folder
pub fn local_folder(path: &Path, create: bool) -> Result<PathBuf> {
    let path = expand_local_home(path);
    if path.is_dir() {
        return Ok(path);
    }
    if path.exists() {
        return Err(ParcelError::InvalidPath(path));
    }
    if !create {
        return Err(ParcelError::FolderNotFound(path));
    }
    fs::create_dir_all(&path)?;
    info!("Created local folder {}", path.display());
    Ok(path)
}

fn expand_local_home(path: &Path) -> PathBuf {
    match path.strip_prefix("~") {
        Ok(rest) => match dirs::home_dir() {
            Some(home) => home.join(rest),
            None => path.to_path_buf(),
        },
        Err(_) => path.to_path_buf(),
    }
}

fn local_hostname() -> String {
    hostname::get()
        .ok()
        .and_then(|h| h.into_string().ok())
        .unwrap_or_else(|| "localhost".to_string())
}

#[cfg(unix)]
fn set_mode(path: &Path, mode: u32) -> io::Result<()> {
    use std::os::unix::fs::PermissionsExt;
    fs::set_permissions(path, fs::Permissions::from_mode(mode))
}

#[cfg(not(unix))]
fn set_mode(_path: &Path, _mode: u32) -> io::Result<()> {
    Ok(())
}
