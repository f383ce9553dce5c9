//! Error types for remote transfers
//!
//! Errors are grouped by how the dispatch pipeline reacts to them:
//! transient errors are retried, permission errors turn a transfer into a
//! skip, and everything else is fatal for the current event.

use std::io;
use thiserror::Error;

/// Result type alias for transport operations
pub type TransportResult<T> = std::result::Result<T, TransportError>;

#[derive(Error, Debug)]
pub enum TransportError {
    #[error("Connection to {endpoint} failed: {source}")]
    ConnectionFailed {
        endpoint: String,
        #[source]
        source: io::Error,
    },

    #[error("Connection to {endpoint} timed out")]
    Timeout { endpoint: String },

    #[error("Authentication failed for user '{user}' on host '{host}': {message}. Add user {user} to authorized_keys on host {host}")]
    Authentication {
        user: String,
        host: String,
        message: String,
    },

    #[error("Host key check failed for '{host}': {message}. Add the server to known_hosts")]
    HostKey { host: String, message: String },

    #[error("No response from server: {0}")]
    NoResponse(String),

    #[error("Permission denied for '{path}': {message}")]
    PermissionDenied { path: String, message: String },

    #[error("{0} not found on remote host")]
    RemoteNotFound(String),

    #[error("Gave up connecting to {endpoint} after {attempts} attempts")]
    RetriesExhausted { endpoint: String, attempts: u32 },

    #[error("Not connected")]
    NotConnected,

    #[error("Session error: {0}")]
    Session(String),

    #[error("Local I/O error: {0}")]
    Io(#[from] io::Error),
}

impl TransportError {
    /// Transient network-level failures worth retrying
    pub fn is_transient(&self) -> bool {
        match self {
            TransportError::ConnectionFailed { source, .. } => {
                use io::ErrorKind::*;
                matches!(
                    source.kind(),
                    ConnectionRefused
                        | ConnectionReset
                        | ConnectionAborted
                        | NotConnected
                        | TimedOut
                        | HostUnreachable
                        | NetworkUnreachable
                        | Interrupted
                )
            }
            TransportError::Timeout { .. } => true,
            TransportError::NoResponse(_) => true,
            _ => false,
        }
    }

    /// Authentication and host key failures, never retried
    pub fn is_authentication(&self) -> bool {
        matches!(
            self,
            TransportError::Authentication { .. } | TransportError::HostKey { .. }
        )
    }

    /// Permission denied on the destination, turned into a skip by callers
    pub fn is_permission_denied(&self) -> bool {
        matches!(self, TransportError::PermissionDenied { .. })
    }

    /// Server stopped answering mid-transfer
    pub fn is_no_response(&self) -> bool {
        matches!(self, TransportError::NoResponse(_))
    }
}
