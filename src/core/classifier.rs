//! Eligibility of files for dispatch
//!
//! A file is eligible when its sniffed content type is allowed, its name
//! ends with the suffix of an allowed `*.ext` pattern, the name fits the
//! length bound, and the configured [`ContentCheck`] passes.

use std::path::Path;

use regex::Regex;
use tracing::{debug, warn};

/// Default bound on filename length, in characters
pub const DEFAULT_MAX_FILENAME_LENGTH: usize = 50;

/// MIME type that [`PdfTextCheck`] inspects
pub const PDF: &str = "application/pdf";

/// Extra check on file content, run after the cheap name and type checks
pub trait ContentCheck {
    fn check(&self, path: &Path, filename: &str, content_type: &str) -> bool;
}

/// Accepts every file
#[derive(Debug, Clone, Copy, Default)]
pub struct AcceptAll;

impl ContentCheck for AcceptAll {
    fn check(&self, _path: &Path, _filename: &str, _content_type: &str) -> bool {
        true
    }
}

/// Requires the filename prefix matched by a regex to appear in the PDF text
///
/// Guards against a result being dropped in under another specimen's name.
#[derive(Debug, Clone)]
pub struct PdfTextCheck {
    regex: Regex,
}

impl PdfTextCheck {
    pub fn new(pattern: &str) -> Result<Self, regex::Error> {
        Ok(Self {
            regex: Regex::new(pattern)?,
        })
    }

    fn extract_text(&self, path: &Path) -> Option<String> {
        match pdf_extract::extract_text(path) {
            Ok(text) => Some(text),
            Err(e) => {
                warn!("Could not extract text from {}: {}", path.display(), e);
                None
            }
        }
    }
}

impl ContentCheck for PdfTextCheck {
    fn check(&self, path: &Path, filename: &str, content_type: &str) -> bool {
        if content_type != PDF {
            return false;
        }
        // anchored at the start of the name
        let needle = match self.regex.find(filename) {
            Some(m) if m.start() == 0 => m.as_str(),
            _ => return false,
        };
        match self.extract_text(path) {
            Some(text) => text.contains(needle),
            None => false,
        }
    }
}

/// Decides whether a file is processed at all
pub struct FileClassifier {
    suffixes: Vec<String>,
    content_types: Vec<String>,
    max_length: usize,
    content_check: Box<dyn ContentCheck>,
}

impl FileClassifier {
    /// `patterns` are globs of the form `*.ext`; only the part after the
    /// last `*` is compared
    pub fn new<P, T>(patterns: P, content_types: T) -> Self
    where
        P: IntoIterator,
        P::Item: AsRef<str>,
        T: IntoIterator,
        T::Item: AsRef<str>,
    {
        Self {
            suffixes: patterns
                .into_iter()
                .map(|p| pattern_suffix(p.as_ref()).to_string())
                .collect(),
            content_types: content_types
                .into_iter()
                .map(|t| t.as_ref().to_string())
                .collect(),
            max_length: DEFAULT_MAX_FILENAME_LENGTH,
            content_check: Box::new(AcceptAll),
        }
    }

    pub fn with_max_length(mut self, max_length: usize) -> Self {
        self.max_length = max_length;
        self
    }

    pub fn with_content_check(mut self, check: impl ContentCheck + 'static) -> Self {
        self.content_check = Box::new(check);
        self
    }

    /// Whether `filename` ends with an allowed suffix
    pub fn matches_pattern(&self, filename: &str) -> bool {
        self.suffixes.iter().any(|s| filename.ends_with(s.as_str()))
    }

    pub fn allows_type(&self, content_type: &str) -> bool {
        self.content_types.iter().any(|t| t == content_type)
    }

    /// Type, pattern and length checks, without reading the file
    pub fn passes_filters(&self, filename: &str, content_type: &str) -> bool {
        self.allows_type(content_type)
            && self.matches_pattern(filename)
            && filename.chars().count() <= self.max_length
    }

    /// Full eligibility decision for the file at `path` named `filename`
    pub fn eligible(&self, path: &Path, filename: &str, content_type: &str) -> bool {
        if !self.allows_type(content_type) {
            debug!("{}: content type {} not allowed", filename, content_type);
            return false;
        }
        if !self.matches_pattern(filename) {
            debug!("{}: no matching file pattern", filename);
            return false;
        }
        if filename.chars().count() > self.max_length {
            debug!("{}: name longer than {} characters", filename, self.max_length);
            return false;
        }
        if !self.content_check.check(path, filename, content_type) {
            debug!("{}: content check failed", filename);
            return false;
        }
        true
    }
}

/// Part of a `*.ext` glob after the last `*`
pub fn pattern_suffix(pattern: &str) -> &str {
    match pattern.rfind('*') {
        Some(idx) => &pattern[idx + 1..],
        None => pattern,
    }
}
