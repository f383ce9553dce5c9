//! Connection state machine for one destination host
//!
//! `Disconnected -> Connecting -> Connected -> (Transferring -> Connected)* -> Disconnected`
//!
//! Connecting retries transient failures according to the [`RetryPolicy`]. A
//! put that loses the server is retried once on a fresh session; a put that
//! is refused for permissions is reported as a skip.

use std::path::Path;

use tracing::{debug, info, warn};

use super::{join_remote, Connector, RemoteSession, TransportError, TransportResult};
use crate::core::retry::{with_retry, RetryPolicy, Sleeper, ThreadSleeper};

/// Where the connection currently is in its lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
    Transferring,
}

/// Result of a single `put`
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PutOutcome {
    /// File copied to `remote_path`
    Sent { remote_path: String, bytes: u64 },
    /// Destination refused the file; the source must be left in place
    Skipped { reason: String },
}

/// Confirms (and possibly creates) destination folders during resolution
pub trait RemoteDirectories {
    fn confirm_directory(&mut self, path: &str) -> TransportResult<String>;
}

/// Authenticated connection to the destination, owned by one dispatcher
pub struct TransferConnection<C: Connector> {
    connector: C,
    session: Option<C::Session>,
    state: ConnectionState,
    policy: RetryPolicy,
    sleeper: Box<dyn Sleeper>,
    create_missing: bool,
}

impl<C: Connector> TransferConnection<C> {
    pub fn new(connector: C, policy: RetryPolicy) -> Self {
        Self {
            connector,
            session: None,
            state: ConnectionState::Disconnected,
            policy,
            sleeper: Box::new(ThreadSleeper),
            create_missing: false,
        }
    }

    /// Replace the sleeper used between connect attempts
    pub fn with_sleeper(mut self, sleeper: impl Sleeper + 'static) -> Self {
        self.sleeper = Box::new(sleeper);
        self
    }

    /// Create missing folders when confirming destinations during resolution
    pub fn with_create_missing(mut self, create_missing: bool) -> Self {
        self.create_missing = create_missing;
        self
    }

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    pub fn is_connected(&self) -> bool {
        self.session.is_some()
    }

    pub fn connector(&self) -> &C {
        &self.connector
    }

    pub fn endpoint(&self) -> String {
        self.connector.endpoint()
    }

    /// Open a session, retrying transient failures per the policy
    pub fn connect(&mut self) -> TransportResult<()> {
        if self.session.is_some() {
            return Ok(());
        }

        self.state = ConnectionState::Connecting;
        let endpoint = self.connector.endpoint();
        info!("Connecting to {}", endpoint);

        let connector = &mut self.connector;
        match with_retry(&self.policy, self.sleeper.as_ref(), &endpoint, || {
            connector.connect()
        }) {
            Ok(session) => {
                self.session = Some(session);
                self.state = ConnectionState::Connected;
                info!("Connected to {}", endpoint);
                Ok(())
            }
            Err(e) => {
                self.state = ConnectionState::Disconnected;
                Err(e)
            }
        }
    }

    pub fn disconnect(&mut self) {
        if self.session.take().is_some() {
            debug!("Disconnected from {}", self.connector.endpoint());
        }
        self.state = ConnectionState::Disconnected;
    }

    /// Drop the current session and connect again
    pub fn reconnect(&mut self) -> TransportResult<()> {
        info!("Reconnecting to {}", self.connector.endpoint());
        self.disconnect();
        self.connect()
    }

    fn session(&mut self) -> TransportResult<&mut C::Session> {
        if self.session.is_none() {
            self.connect()?;
        }
        self.session.as_mut().ok_or(TransportError::NotConnected)
    }

    /// Expand a leading `~` against the remote login directory
    pub fn expand_home(&mut self, path: &str) -> TransportResult<String> {
        if path != "~" && !path.starts_with("~/") {
            return Ok(path.to_string());
        }
        let home = self.session()?.home_dir()?;
        let rest = path.trim_start_matches('~').trim_start_matches('/');
        if rest.is_empty() {
            Ok(home)
        } else {
            Ok(join_remote(&home, rest))
        }
    }

    /// Confirm `path` is a directory on the destination, creating it when allowed
    ///
    /// Existing directories are returned as-is, so repeated calls are harmless.
    pub fn ensure_directory(
        &mut self,
        path: &str,
        create_if_missing: bool,
    ) -> TransportResult<String> {
        let path = self.expand_home(path)?;
        let session = self.session()?;

        if session.is_dir(&path)? {
            return Ok(path);
        }
        if !create_if_missing {
            return Err(TransportError::RemoteNotFound(path));
        }

        mkdir_p(session, &path)?;
        info!("Created remote folder {}", path);
        Ok(path)
    }

    /// Copy `local` into `remote_dir`
    pub fn put(&mut self, local: &Path, remote_dir: &str) -> TransportResult<PutOutcome> {
        let filename = local
            .file_name()
            .and_then(|n| n.to_str())
            .ok_or_else(|| {
                TransportError::Io(std::io::Error::new(
                    std::io::ErrorKind::InvalidInput,
                    format!("no file name in {}", local.display()),
                ))
            })?;
        let remote_path = join_remote(remote_dir, filename);

        let first = self.put_once(local, &remote_path);
        let result = match first {
            Err(e) if e.is_no_response() => {
                warn!("{}, reconnecting and retrying {} once", e, filename);
                self.reconnect()?;
                self.put_once(local, &remote_path)
            }
            other => other,
        };

        match result {
            Ok(bytes) => {
                info!("Sent {} to {} ({} bytes)", filename, remote_path, bytes);
                Ok(PutOutcome::Sent { remote_path, bytes })
            }
            Err(e) if e.is_permission_denied() => {
                warn!("{}, skipping ...", e);
                Ok(PutOutcome::Skipped {
                    reason: e.to_string(),
                })
            }
            Err(e) => Err(e),
        }
    }

    fn put_once(&mut self, local: &Path, remote_path: &str) -> TransportResult<u64> {
        self.session()?;
        self.state = ConnectionState::Transferring;
        let result = match self.session.as_mut() {
            Some(session) => session.put(local, remote_path),
            None => Err(TransportError::NotConnected),
        };
        self.state = if self.session.is_some() {
            ConnectionState::Connected
        } else {
            ConnectionState::Disconnected
        };
        result
    }
}

impl<C: Connector> RemoteDirectories for TransferConnection<C> {
    fn confirm_directory(&mut self, path: &str) -> TransportResult<String> {
        let create = self.create_missing;
        self.ensure_directory(path, create)
    }
}

/// Create `path` and any missing parents, parents first
fn mkdir_p<S: RemoteSession>(session: &mut S, path: &str) -> TransportResult<()> {
    let trimmed = path.trim_end_matches('/');
    if trimmed.is_empty() || session.is_dir(trimmed)? {
        return Ok(());
    }
    if let Some(idx) = trimmed.rfind('/') {
        let parent = &trimmed[..idx];
        if !parent.is_empty() {
            mkdir_p(session, parent)?;
        }
    }
    session.mkdir(trimmed)
}
