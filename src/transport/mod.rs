//! Remote transfer abstraction
//!
//! A [`Connector`] opens [`RemoteSession`]s against one destination host. The
//! [`TransferConnection`] wraps a connector with the connect/retry state
//! machine, remote directory confirmation and the put-retry-or-skip policy.
//!
//! Two connectors ship with the crate:
//!
//! - [`SshConnector`]: SCP uploads and SFTP directory handling over `ssh2`
//! - [`LocalConnector`]: a destination tree on the local filesystem
//!
//! Remote paths are plain `/`-separated strings since they name locations on
//! another host, not on this one.

pub mod connection;
pub mod error;
mod local;
mod ssh;

pub use connection::{ConnectionState, PutOutcome, RemoteDirectories, TransferConnection};
pub use error::{TransportError, TransportResult};
pub use local::{LocalConnector, LocalSession};
pub use ssh::{SshAuth, SshConfig, SshConnector, SshSession};

use std::path::Path;

/// One open session on the destination host
pub trait RemoteSession {
    /// Absolute path of the login directory, used to expand `~`
    fn home_dir(&mut self) -> TransportResult<String>;

    /// Whether `path` exists and is a directory
    fn is_dir(&mut self, path: &str) -> TransportResult<bool>;

    /// Create a single directory; the parent must exist
    fn mkdir(&mut self, path: &str) -> TransportResult<()>;

    /// Copy `local` to the remote file `remote`, returning bytes written
    fn put(&mut self, local: &Path, remote: &str) -> TransportResult<u64>;
}

/// Opens sessions against a destination
pub trait Connector {
    type Session: RemoteSession;

    /// Open and authenticate one session (single attempt, no retry)
    fn connect(&mut self) -> TransportResult<Self::Session>;

    /// Human readable `user@host:port` style description for logs
    fn endpoint(&self) -> String;
}

/// Join a remote directory and a child name with `/`
pub fn join_remote(base: &str, name: &str) -> String {
    if base.is_empty() {
        return name.to_string();
    }
    if base.ends_with('/') {
        format!("{}{}", base, name)
    } else {
        format!("{}/{}", base, name)
    }
}

/// Last component of a remote path, ignoring a trailing slash
pub fn remote_basename(path: &str) -> &str {
    path.trim_end_matches('/')
        .rsplit('/')
        .next()
        .unwrap_or(path)
}
