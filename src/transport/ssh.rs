//! SSH transport
//!
//! Files are uploaded with SCP; directory checks, creation and `~` expansion
//! go over an SFTP channel on the same session.

use std::fs::File;
use std::io;
use std::net::{SocketAddr, TcpStream, ToSocketAddrs};
use std::path::{Path, PathBuf};
use std::time::Duration;

use secrecy::{ExposeSecret, SecretString};
use ssh2::{CheckResult, ErrorCode, KnownHostFileKind, Session, Sftp};
use tracing::{debug, warn};

use super::{Connector, RemoteSession, TransportError, TransportResult};

// libssh2 session error codes
const LIBSSH2_ERROR_SOCKET_SEND: i32 = -7;
const LIBSSH2_ERROR_TIMEOUT: i32 = -9;
const LIBSSH2_ERROR_SOCKET_DISCONNECT: i32 = -13;
const LIBSSH2_ERROR_SOCKET_TIMEOUT: i32 = -30;
const LIBSSH2_ERROR_SOCKET_RECV: i32 = -43;

// SFTP status codes
const FX_NO_SUCH_FILE: i32 = 2;
const FX_PERMISSION_DENIED: i32 = 3;

/// SSH authentication method
#[derive(Debug, Clone)]
pub enum SshAuth {
    /// Password authentication
    Password(SecretString),

    /// Public key authentication with private key file
    KeyFile {
        /// Path to private key file
        key_path: PathBuf,
        /// Optional passphrase for the key
        passphrase: Option<SecretString>,
    },

    /// SSH agent authentication
    Agent,
}

/// SSH connection settings
#[derive(Debug, Clone)]
pub struct SshConfig {
    /// Hostname or IP address
    pub host: String,

    /// Port (default: 22)
    pub port: u16,

    /// Username
    pub username: String,

    /// Authentication method
    pub auth: SshAuth,

    /// Per-attempt connection timeout in seconds
    pub timeout_secs: u64,

    /// Compression enabled
    pub compress: bool,

    /// Accept and pin unknown host keys
    pub trusted_host: bool,

    /// known_hosts file consulted before trusting a key
    pub known_hosts: Option<PathBuf>,
}

impl SshConfig {
    /// Create a new SSH configuration
    ///
    /// `localhost` is trusted by default, any other host must be known.
    pub fn new(host: impl Into<String>, username: impl Into<String>, auth: SshAuth) -> Self {
        let host = host.into();
        let trusted_host = host == "localhost";
        Self {
            host,
            port: 22,
            username: username.into(),
            auth,
            timeout_secs: 5,
            compress: false,
            trusted_host,
            known_hosts: dirs::home_dir().map(|h| h.join(".ssh").join("known_hosts")),
        }
    }

    /// Set the port
    pub fn with_port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    /// Set the connection timeout
    pub fn with_timeout(mut self, timeout_secs: u64) -> Self {
        self.timeout_secs = timeout_secs;
        self
    }

    /// Enable compression
    pub fn with_compression(mut self) -> Self {
        self.compress = true;
        self
    }

    /// Set the host key trust policy
    pub fn with_trusted_host(mut self, trusted: bool) -> Self {
        self.trusted_host = trusted;
        self
    }

    /// Use a specific known_hosts file
    pub fn with_known_hosts(mut self, path: impl Into<PathBuf>) -> Self {
        self.known_hosts = Some(path.into());
        self
    }

    /// Parse from URI-style string (e.g., "user@host:port")
    pub fn from_uri(uri: &str, auth: SshAuth) -> TransportResult<Self> {
        let (username, host_port) = uri.split_once('@').ok_or_else(|| {
            TransportError::Session("URI must be in format user@host[:port]".to_string())
        })?;

        let (host, port) = match host_port.split_once(':') {
            Some((host, port)) => {
                let port = port
                    .parse()
                    .map_err(|_| TransportError::Session(format!("Invalid port number '{}'", port)))?;
                (host, port)
            }
            None => (host_port, 22),
        };

        Ok(Self::new(host, username, auth).with_port(port))
    }

    fn endpoint(&self) -> String {
        format!("{}@{}:{}", self.username, self.host, self.port)
    }
}

/// Opens SSH sessions, remembering the accepted host key across reconnects
pub struct SshConnector {
    config: SshConfig,
    pinned_key: Option<Vec<u8>>,
}

impl SshConnector {
    pub fn new(config: SshConfig) -> Self {
        Self {
            config,
            pinned_key: None,
        }
    }

    pub fn config(&self) -> &SshConfig {
        &self.config
    }

    fn resolve(&self) -> TransportResult<SocketAddr> {
        let endpoint = format!("{}:{}", self.config.host, self.config.port);
        let mut addrs = endpoint
            .to_socket_addrs()
            .map_err(|e| TransportError::ConnectionFailed {
                endpoint: endpoint.clone(),
                source: e,
            })?;
        addrs.next().ok_or_else(|| TransportError::ConnectionFailed {
            endpoint: endpoint.clone(),
            source: io::Error::new(io::ErrorKind::NotFound, "no address for host"),
        })
    }

    fn verify_host_key(&mut self, session: &Session) -> TransportResult<()> {
        let host = self.config.host.clone();
        let (key, key_type) = session.host_key().ok_or_else(|| TransportError::HostKey {
            host: host.clone(),
            message: "server sent no host key".to_string(),
        })?;

        if let Some(pinned) = &self.pinned_key {
            if pinned.as_slice() != key {
                return Err(TransportError::HostKey {
                    host,
                    message: "host key changed since it was accepted".to_string(),
                });
            }
            return Ok(());
        }

        let mut known = session.known_hosts().map_err(session_error)?;
        if let Some(path) = &self.config.known_hosts {
            if path.exists() {
                known
                    .read_file(path, KnownHostFileKind::OpenSSH)
                    .map_err(|e| TransportError::HostKey {
                        host: host.clone(),
                        message: format!("cannot read {}: {}", path.display(), e),
                    })?;
            }
        }

        match known.check_port(&host, self.config.port, key) {
            CheckResult::Match => {}
            CheckResult::Mismatch => {
                return Err(TransportError::HostKey {
                    host,
                    message: "host key does not match known_hosts".to_string(),
                });
            }
            CheckResult::NotFound | CheckResult::Failure => {
                if !self.config.trusted_host {
                    return Err(TransportError::HostKey {
                        host,
                        message: "host key is not known".to_string(),
                    });
                }
                warn!("Accepting unknown {:?} host key for {}", key_type, host);
            }
        }

        self.pinned_key = Some(key.to_vec());
        Ok(())
    }

    fn authenticate(&self, session: &Session) -> TransportResult<()> {
        let user = &self.config.username;
        let auth_error = |message: String| TransportError::Authentication {
            user: user.clone(),
            host: self.config.host.clone(),
            message,
        };

        match &self.config.auth {
            SshAuth::Password(password) => {
                session
                    .userauth_password(user, password.expose_secret())
                    .map_err(|e| auth_error(format!("Password authentication failed: {}", e)))?;
            }
            SshAuth::KeyFile {
                key_path,
                passphrase,
            } => {
                let pass: Option<&str> = passphrase.as_ref().map(|p| p.expose_secret());
                session
                    .userauth_pubkey_file(user, None, key_path, pass)
                    .map_err(|e| auth_error(format!("Key file authentication failed: {}", e)))?;
            }
            SshAuth::Agent => {
                session
                    .userauth_agent(user)
                    .map_err(|e| auth_error(format!("Agent authentication failed: {}", e)))?;
            }
        }

        if !session.authenticated() {
            return Err(auth_error("Authentication failed".to_string()));
        }
        Ok(())
    }
}

impl Connector for SshConnector {
    type Session = SshSession;

    fn connect(&mut self) -> TransportResult<SshSession> {
        let endpoint = self.config.endpoint();
        let addr = self.resolve()?;
        let timeout = Duration::from_secs(self.config.timeout_secs);

        let tcp = TcpStream::connect_timeout(&addr, timeout).map_err(|e| {
            if e.kind() == io::ErrorKind::TimedOut {
                TransportError::Timeout {
                    endpoint: endpoint.clone(),
                }
            } else {
                TransportError::ConnectionFailed {
                    endpoint: endpoint.clone(),
                    source: e,
                }
            }
        })?;
        tcp.set_read_timeout(Some(timeout)).ok();
        tcp.set_write_timeout(Some(timeout)).ok();

        let mut session = Session::new().map_err(session_error)?;
        session.set_tcp_stream(tcp);
        session.set_timeout(session_timeout_millis(self.config.timeout_secs));
        session.set_compress(self.config.compress);

        session.handshake().map_err(|e| match e.code() {
            ErrorCode::Session(code) if is_socket_code(code) => TransportError::ConnectionFailed {
                endpoint: endpoint.clone(),
                source: io::Error::new(io::ErrorKind::ConnectionReset, e.to_string()),
            },
            _ => session_error(e),
        })?;

        self.verify_host_key(&session)?;
        self.authenticate(&session)?;

        let sftp = session.sftp().map_err(session_error)?;
        debug!("SSH session open to {}", endpoint);

        Ok(SshSession { session, sftp })
    }

    fn endpoint(&self) -> String {
        self.config.endpoint()
    }
}

/// Authenticated SSH session with an SFTP channel
pub struct SshSession {
    session: Session,
    sftp: Sftp,
}

impl RemoteSession for SshSession {
    fn home_dir(&mut self) -> TransportResult<String> {
        let home = self
            .sftp
            .realpath(Path::new("."))
            .map_err(session_error)?;
        Ok(home.to_string_lossy().into_owned())
    }

    fn is_dir(&mut self, path: &str) -> TransportResult<bool> {
        match self.sftp.stat(Path::new(path)) {
            Ok(stat) => Ok(stat.is_dir()),
            Err(e) if sftp_status(&e) == Some(FX_NO_SUCH_FILE) => Ok(false),
            Err(e) => Err(sftp_error(path, e)),
        }
    }

    fn mkdir(&mut self, path: &str) -> TransportResult<()> {
        match self.sftp.mkdir(Path::new(path), 0o755) {
            Ok(()) => Ok(()),
            Err(e) => {
                // lost a race with another creator
                if self.is_dir(path).unwrap_or(false) {
                    return Ok(());
                }
                Err(sftp_error(path, e))
            }
        }
    }

    fn put(&mut self, local: &Path, remote: &str) -> TransportResult<u64> {
        let meta = std::fs::metadata(local)?;
        let size = meta.len();
        let times = file_times(&meta);

        let mut channel = self
            .session
            .scp_send(Path::new(remote), file_mode(&meta), size, times)
            .map_err(|e| scp_error(remote, e))?;

        let mut file = File::open(local)?;
        io::copy(&mut file, &mut channel).map_err(|e| channel_io_error(remote, e))?;

        channel.send_eof().map_err(|e| scp_error(remote, e))?;
        channel.wait_eof().map_err(|e| scp_error(remote, e))?;
        channel.close().map_err(|e| scp_error(remote, e))?;
        channel.wait_close().map_err(|e| scp_error(remote, e))?;

        Ok(size)
    }
}

impl Drop for SshSession {
    fn drop(&mut self) {
        let _ = self.session.disconnect(None, "Closing connection", None);
    }
}

fn is_socket_code(code: i32) -> bool {
    matches!(
        code,
        LIBSSH2_ERROR_SOCKET_SEND
            | LIBSSH2_ERROR_TIMEOUT
            | LIBSSH2_ERROR_SOCKET_DISCONNECT
            | LIBSSH2_ERROR_SOCKET_TIMEOUT
            | LIBSSH2_ERROR_SOCKET_RECV
    )
}

/// libssh2 takes a millisecond `u32`; larger values saturate
fn session_timeout_millis(secs: u64) -> u32 {
    u32::try_from(secs.saturating_mul(1000)).unwrap_or(u32::MAX)
}

fn session_error(e: ssh2::Error) -> TransportError {
    TransportError::Session(e.to_string())
}

fn sftp_status(e: &ssh2::Error) -> Option<i32> {
    match e.code() {
        ErrorCode::SFTP(status) => Some(status),
        _ => None,
    }
}

fn sftp_error(path: &str, e: ssh2::Error) -> TransportError {
    match sftp_status(&e) {
        Some(FX_PERMISSION_DENIED) => TransportError::PermissionDenied {
            path: path.to_string(),
            message: e.to_string(),
        },
        _ => match e.code() {
            ErrorCode::Session(code) if is_socket_code(code) => {
                TransportError::NoResponse(e.to_string())
            }
            _ => session_error(e),
        },
    }
}

/// Classify an SCP failure into skip / retry-once / fatal
fn scp_error(remote: &str, e: ssh2::Error) -> TransportError {
    let message = e.message();
    if message.contains("Permission denied") {
        return TransportError::PermissionDenied {
            path: remote.to_string(),
            message: message.to_string(),
        };
    }
    match e.code() {
        ErrorCode::Session(code) if is_socket_code(code) => {
            TransportError::NoResponse(message.to_string())
        }
        _ if message.contains("No response") => TransportError::NoResponse(message.to_string()),
        _ => TransportError::Session(format!("scp to {} failed: {}", remote, e)),
    }
}

fn channel_io_error(remote: &str, e: io::Error) -> TransportError {
    use io::ErrorKind::*;
    match e.kind() {
        PermissionDenied => TransportError::PermissionDenied {
            path: remote.to_string(),
            message: e.to_string(),
        },
        TimedOut | BrokenPipe | ConnectionReset | ConnectionAborted | UnexpectedEof => {
            TransportError::NoResponse(e.to_string())
        }
        _ => TransportError::Io(e),
    }
}

#[cfg(unix)]
fn file_mode(meta: &std::fs::Metadata) -> i32 {
    use std::os::unix::fs::PermissionsExt;
    (meta.permissions().mode() & 0o777) as i32
}

#[cfg(not(unix))]
fn file_mode(_meta: &std::fs::Metadata) -> i32 {
    0o644
}

fn file_times(meta: &std::fs::Metadata) -> Option<(u64, u64)> {
    let secs = |t: std::io::Result<std::time::SystemTime>| {
        t.ok()
            .and_then(|t| t.duration_since(std::time::UNIX_EPOCH).ok())
            .map(|d| d.as_secs())
    };
    let mtime = secs(meta.modified())?;
    let atime = secs(meta.accessed()).unwrap_or(mtime);
    Some((mtime, atime))
}
