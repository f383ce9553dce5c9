/*!
 * Error types for Parcel
 */

use std::fmt;
use std::io;
use std::path::PathBuf;

use crate::ledger::LedgerError;
use crate::transport::TransportError;

pub type Result<T> = std::result::Result<T, ParcelError>;

/// Exit code constants for structured process exit
pub const EXIT_SUCCESS: i32 = 0;
pub const EXIT_PARTIAL: i32 = 1;
pub const EXIT_FATAL: i32 = 2;

#[derive(Debug)]
pub enum ParcelError {
    /// A local working folder is missing and may not be created
    FolderNotFound(PathBuf),

    /// Invalid path (no file name, not UTF-8, ...)
    InvalidPath(PathBuf),

    /// I/O error on the local side
    Io(io::Error),

    /// Configuration error
    Config(String),

    /// Remote transfer failure that could not be skipped or retried away
    Transport(TransportError),

    /// History ledger or folder mapping store failure
    Ledger(LedgerError),

    /// Filesystem watcher failure
    Watch(String),

    /// Generic error with message
    Other(String),
}

impl ParcelError {
    /// Get the process exit code for this error
    pub fn exit_code(&self) -> i32 {
        match self {
            ParcelError::FolderNotFound(_)
            | ParcelError::InvalidPath(_)
            | ParcelError::Config(_) => EXIT_FATAL,
            ParcelError::Transport(e) if e.is_authentication() => EXIT_FATAL,
            _ => EXIT_PARTIAL,
        }
    }

    /// Check if this error must stop the process before (or instead of) watching
    pub fn is_fatal(&self) -> bool {
        match self {
            ParcelError::FolderNotFound(_) => true,
            ParcelError::InvalidPath(_) => true,
            ParcelError::Config(_) => true,
            ParcelError::Watch(_) => true,
            ParcelError::Transport(e) => !e.is_transient(),

            ParcelError::Io(_) => false,
            ParcelError::Ledger(_) => false,
            ParcelError::Other(_) => false,
        }
    }

    /// Get error category for logging
    pub fn category(&self) -> ErrorCategory {
        match self {
            ParcelError::FolderNotFound(_) | ParcelError::InvalidPath(_) => {
                ErrorCategory::Validation
            }
            ParcelError::Io(_) => ErrorCategory::IoError,
            ParcelError::Config(_) => ErrorCategory::Configuration,
            ParcelError::Transport(e) if e.is_authentication() => ErrorCategory::Security,
            ParcelError::Transport(_) => ErrorCategory::Network,
            ParcelError::Ledger(_) => ErrorCategory::Ledger,
            ParcelError::Watch(_) => ErrorCategory::Watch,
            ParcelError::Other(_) => ErrorCategory::Unknown,
        }
    }
}

/// Error category for classification and reporting
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    /// Path validation errors
    Validation,
    /// I/O operation errors
    IoError,
    /// Configuration errors
    Configuration,
    /// Network/protocol errors
    Network,
    /// Authentication and host key errors
    Security,
    /// Sent history / folder mapping store errors
    Ledger,
    /// Filesystem watcher errors
    Watch,
    /// Uncategorized errors
    Unknown,
}

impl fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ErrorCategory::Validation => write!(f, "validation"),
            ErrorCategory::IoError => write!(f, "io"),
            ErrorCategory::Configuration => write!(f, "configuration"),
            ErrorCategory::Network => write!(f, "network"),
            ErrorCategory::Security => write!(f, "security"),
            ErrorCategory::Ledger => write!(f, "ledger"),
            ErrorCategory::Watch => write!(f, "watch"),
            ErrorCategory::Unknown => write!(f, "unknown"),
        }
    }
}

impl fmt::Display for ParcelError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ParcelError::FolderNotFound(path) => {
                write!(f, "Folder not found: {}", path.display())
            }
            ParcelError::InvalidPath(path) => {
                write!(f, "Invalid path: {}", path.display())
            }
            ParcelError::Io(err) => {
                write!(f, "I/O error: {}", err)
            }
            ParcelError::Config(msg) => {
                write!(f, "Configuration error: {}", msg)
            }
            ParcelError::Transport(err) => {
                write!(f, "Transfer error: {}", err)
            }
            ParcelError::Ledger(err) => {
                write!(f, "History error: {}", err)
            }
            ParcelError::Watch(msg) => {
                write!(f, "Watcher error: {}", msg)
            }
            ParcelError::Other(msg) => {
                write!(f, "{}", msg)
            }
        }
    }
}

impl std::error::Error for ParcelError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            ParcelError::Io(err) => Some(err),
            ParcelError::Transport(err) => Some(err),
            ParcelError::Ledger(err) => Some(err),
            _ => None,
        }
    }
}

impl From<io::Error> for ParcelError {
    fn from(err: io::Error) -> Self {
        ParcelError::Io(err)
    }
}

impl From<TransportError> for ParcelError {
    fn from(err: TransportError) -> Self {
        ParcelError::Transport(err)
    }
}

impl From<LedgerError> for ParcelError {
    fn from(err: LedgerError) -> Self {
        ParcelError::Ledger(err)
    }
}

impl From<toml::de::Error> for ParcelError {
    fn from(err: toml::de::Error) -> Self {
        ParcelError::Config(format!("TOML parse error: {}", err))
    }
}

impl From<notify::Error> for ParcelError {
    fn from(err: notify::Error) -> Self {
        ParcelError::Watch(err.to_string())
    }
}
