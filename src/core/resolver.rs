//! Remote sub-folder selection
//!
//! A [`FolderHandler`] picks the sub-folder of the destination a file goes
//! to, and confirms it on the remote side through [`RemoteDirectories`].
//! An all-empty [`FolderSelection`] means the file must not be sent.

use chrono::Utc;
use chrono_tz::Tz;
use regex::Regex;
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::error::Result;
use crate::ledger::FolderMappings;
use crate::transport::{join_remote, remote_basename, RemoteDirectories, TransportError};

/// Outcome of folder selection
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct FolderSelection {
    pub folder_name: Option<String>,
    pub resolved_path: Option<String>,
    pub tag: Option<String>,
    pub label: Option<String>,
}

impl FolderSelection {
    /// No destination could be chosen
    pub fn unresolved() -> Self {
        Self::default()
    }

    pub fn is_resolved(&self) -> bool {
        self.resolved_path.is_some()
    }
}

/// Chooses the destination sub-folder for a file
pub trait FolderHandler {
    fn select(
        &mut self,
        filename: &str,
        content_type: &str,
        base_path: &str,
        remote: &mut dyn RemoteDirectories,
    ) -> Result<FolderSelection>;
}

/// Extracts a tag from filenames of one format family
#[derive(Debug, Clone)]
pub struct TagRule {
    label: String,
    regex: Regex,
    start: usize,
    end: usize,
}

impl TagRule {
    /// `pattern` must match at the start of the filename; the tag is the
    /// filename slice `start..end`
    pub fn new(
        label: impl Into<String>,
        pattern: &str,
        start: usize,
        end: usize,
    ) -> std::result::Result<Self, regex::Error> {
        Ok(Self {
            label: label.into(),
            regex: Regex::new(pattern)?,
            start,
            end,
        })
    }

    /// `066-12000001-3...` carries the tag in characters 4..6
    pub fn bhs() -> std::result::Result<Self, regex::Error> {
        Self::new("bhs", r"^066\-[0-9]{8}\-[0-9]{1}", 4, 6)
    }

    /// `112-3456...` carries the tag in characters 1..3
    pub fn cdc1() -> std::result::Result<Self, regex::Error> {
        Self::new("cdc1", r"^[123]{1}[0-9]{2}\-[0-9]{4}", 1, 3)
    }

    /// `12-345-67-89...` carries the tag in characters 0..2; not in the defaults
    pub fn cdc2() -> std::result::Result<Self, regex::Error> {
        Self::new("cdc2", r"^[0-9]{2}\-[0-9]{3}\-[0-9]{2}\-[0-9]{2}", 0, 2)
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    pub fn tag(&self, filename: &str) -> Option<String> {
        match self.regex.find(filename) {
            Some(m) if m.start() == 0 => filename.get(self.start..self.end).map(str::to_string),
            _ => None,
        }
    }
}

/// Built-in rules in evaluation order
pub fn default_tag_rules() -> std::result::Result<Vec<TagRule>, regex::Error> {
    Ok(vec![TagRule::bhs()?, TagRule::cdc1()?])
}

/// Tag rules plus a folder mapping lookup; first rule with a mapping wins
pub struct LookupFolderHandler<M: FolderMappings> {
    rules: Vec<TagRule>,
    mappings: M,
}

impl<M: FolderMappings> LookupFolderHandler<M> {
    /// Warns about rules whose label has no mapping under `base_path`
    pub fn new(rules: Vec<TagRule>, mappings: M, base_path: &str) -> Result<Self> {
        let known = mappings.labels(remote_basename(base_path))?;
        for rule in &rules {
            if !known.iter().any(|l| l == rule.label()) {
                warn!(
                    "Label '{}' has no folder mappings for '{}'",
                    rule.label(),
                    remote_basename(base_path)
                );
            }
        }
        Ok(Self { rules, mappings })
    }
}

impl<M: FolderMappings> FolderHandler for LookupFolderHandler<M> {
    fn select(
        &mut self,
        filename: &str,
        _content_type: &str,
        base_path: &str,
        remote: &mut dyn RemoteDirectories,
    ) -> Result<FolderSelection> {
        let lookup_base = remote_basename(base_path);

        for rule in &self.rules {
            let tag = match rule.tag(filename) {
                Some(tag) => tag,
                None => continue,
            };
            let mapping = match self.mappings.find_mapping(lookup_base, &tag, rule.label())? {
                Some(mapping) => mapping,
                None => {
                    debug!(
                        "{}: no folder for tag '{}' label '{}'",
                        filename,
                        tag,
                        rule.label()
                    );
                    continue;
                }
            };

            let wanted = join_remote(base_path, &mapping.folder_name);
            match confirm(remote, &wanted)? {
                Some(path) => {
                    return Ok(FolderSelection {
                        folder_name: Some(mapping.folder_name),
                        resolved_path: Some(path),
                        tag: Some(tag),
                        label: Some(rule.label().to_string()),
                    });
                }
                None => continue,
            }
        }

        Ok(FolderSelection::unresolved())
    }
}

/// Sub-folder named after the content subtype
#[derive(Debug, Clone, Copy, Default)]
pub struct MimeTypeFolderHandler;

impl MimeTypeFolderHandler {
    fn folder_for(content_type: &str) -> &'static str {
        match content_type {
            "application/pdf" => "pdf",
            "text/plain" => "plain",
            _ => "unknown",
        }
    }
}

impl FolderHandler for MimeTypeFolderHandler {
    fn select(
        &mut self,
        _filename: &str,
        content_type: &str,
        base_path: &str,
        remote: &mut dyn RemoteDirectories,
    ) -> Result<FolderSelection> {
        let folder = Self::folder_for(content_type);
        simple_selection(remote, base_path, folder, folder.to_string())
    }
}

/// Sub-folder per day (`YYYYMMDD`), tagged with the weekday (Sunday = 0)
#[derive(Debug, Clone, Copy)]
pub struct DayFolderHandler {
    tz: Tz,
}

impl DayFolderHandler {
    pub fn new(tz: Tz) -> Self {
        Self { tz }
    }
}

impl FolderHandler for DayFolderHandler {
    fn select(
        &mut self,
        _filename: &str,
        _content_type: &str,
        base_path: &str,
        remote: &mut dyn RemoteDirectories,
    ) -> Result<FolderSelection> {
        let today = Utc::now().with_timezone(&self.tz);
        let folder = today.format("%Y%m%d").to_string();
        let tag = today.format("%w").to_string();
        simple_selection(remote, base_path, &folder, tag)
    }
}

fn simple_selection(
    remote: &mut dyn RemoteDirectories,
    base_path: &str,
    folder: &str,
    tag: String,
) -> Result<FolderSelection> {
    let wanted = join_remote(base_path, folder);
    Ok(match confirm(remote, &wanted)? {
        Some(path) => FolderSelection {
            folder_name: Some(folder.to_string()),
            resolved_path: Some(path),
            tag: Some(tag),
            label: None,
        },
        None => FolderSelection::unresolved(),
    })
}

/// `None` when the folder is absent (and may not be created) or not writable
fn confirm(remote: &mut dyn RemoteDirectories, path: &str) -> Result<Option<String>> {
    match remote.confirm_directory(path) {
        Ok(path) => Ok(Some(path)),
        Err(TransportError::RemoteNotFound(p)) => {
            info!("Remote folder {} not found, skipping", p);
            Ok(None)
        }
        Err(e @ TransportError::PermissionDenied { .. }) => {
            warn!("{}", e);
            Ok(None)
        }
        Err(e) => Err(e.into()),
    }
}
