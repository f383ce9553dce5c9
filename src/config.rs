/*!
 * Configuration types for Parcel
 */

use std::path::{Path, PathBuf};
use std::time::Duration;

use chrono_tz::Tz;
use secrecy::SecretString;
use serde::{Deserialize, Serialize};

use crate::core::classifier::{FileClassifier, PdfTextCheck, DEFAULT_MAX_FILENAME_LENGTH};
use crate::core::dispatch::{DispatchSettings, DEFAULT_FILE_MODE};
use crate::core::resolver::TagRule;
use crate::core::retry::RetryPolicy;
use crate::error::{ParcelError, Result};
use crate::transport::{SshAuth, SshConfig};

/// Dispatcher configuration, usually loaded from a TOML file
#[derive(Debug, Clone, Deserialize)]
pub struct DispatchConfig {
    /// Folder watched for new files
    pub source_dir: PathBuf,

    /// Remote base folder; a leading `~` is the remote login folder
    pub destination_dir: String,

    /// Sent files are moved here; without it they are deleted
    #[serde(default)]
    pub archive_dir: Option<PathBuf>,

    /// SQLite file holding history, folder mappings and uploads
    #[serde(default = "default_database_path")]
    pub database_path: PathBuf,

    /// Allowed sniffed content types
    #[serde(default)]
    pub mime_types: Vec<String>,

    /// Allowed filename globs of the form `*.ext`
    #[serde(default)]
    pub file_patterns: Vec<String>,

    #[serde(default = "default_filename_max_length")]
    pub filename_max_length: usize,

    /// Filename prefix that must also appear in the PDF text
    #[serde(default)]
    pub content_regex: Option<String>,

    /// Create missing local folders
    #[serde(default)]
    pub mkdir_local: bool,

    /// Create missing remote folders
    #[serde(default)]
    pub mkdir_remote: bool,

    /// Refresh mode and mtime of files already waiting at startup
    #[serde(default)]
    pub touch_existing: bool,

    #[serde(default = "default_file_mode")]
    pub file_mode: u32,

    #[serde(default)]
    pub transport: TransportKind,

    #[serde(default)]
    pub remote: RemoteConfig,

    #[serde(default)]
    pub retry: RetryConfig,

    #[serde(default)]
    pub folder_strategy: FolderStrategy,

    /// Tag rules for the lookup strategy, tried in order
    #[serde(default = "default_tag_rules")]
    pub tag_rules: Vec<TagRuleConfig>,

    /// IANA time zone used for file timestamps and day folders
    #[serde(default = "default_time_zone")]
    pub time_zone: String,

    #[serde(default = "default_heartbeat_millis")]
    pub heartbeat_millis: u64,

    #[serde(default)]
    pub log_level: LogLevel,

    /// Log file path (None = stdout)
    #[serde(default)]
    pub log_file: Option<PathBuf>,

    /// Enable verbose logging (shorthand for log_level = debug)
    #[serde(default)]
    pub verbose: bool,
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            source_dir: PathBuf::new(),
            destination_dir: String::new(),
            archive_dir: None,
            database_path: default_database_path(),
            mime_types: Vec::new(),
            file_patterns: Vec::new(),
            filename_max_length: default_filename_max_length(),
            content_regex: None,
            mkdir_local: false,
            mkdir_remote: false,
            touch_existing: false,
            file_mode: default_file_mode(),
            transport: TransportKind::default(),
            remote: RemoteConfig::default(),
            retry: RetryConfig::default(),
            folder_strategy: FolderStrategy::default(),
            tag_rules: default_tag_rules(),
            time_zone: default_time_zone(),
            heartbeat_millis: default_heartbeat_millis(),
            log_level: LogLevel::Info,
            log_file: None,
            verbose: false,
        }
    }
}

/// How files reach the destination
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum TransportKind {
    /// SCP over SSH
    #[default]
    Ssh,
    /// Destination is a folder on this machine
    Local,
}

/// How the destination sub-folder is chosen
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "kebab-case")]
pub enum FolderStrategy {
    /// Tag rules plus the folder mapping table
    #[default]
    Lookup,
    /// Sub-folder per content type
    MimeType,
    /// Sub-folder per day
    Day,
}

/// SSH authentication settings
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(tag = "method", rename_all = "snake_case")]
pub enum AuthConfig {
    #[default]
    Agent,
    KeyFile {
        path: PathBuf,
        #[serde(default)]
        passphrase: Option<SecretString>,
    },
    Password {
        password: SecretString,
    },
}

/// Destination host settings
#[derive(Debug, Clone, Deserialize)]
pub struct RemoteConfig {
    #[serde(default = "default_host")]
    pub host: String,

    #[serde(default = "default_port")]
    pub port: u16,

    /// Remote user (None = the local user)
    #[serde(default)]
    pub user: Option<String>,

    #[serde(default)]
    pub auth: AuthConfig,

    /// Per-attempt connect timeout
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,

    #[serde(default)]
    pub compress: bool,

    /// Accept unknown host keys (None = only for localhost)
    #[serde(default)]
    pub trusted_host: Option<bool>,

    /// known_hosts file (None = ~/.ssh/known_hosts)
    #[serde(default)]
    pub known_hosts: Option<PathBuf>,
}

impl Default for RemoteConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            user: None,
            auth: AuthConfig::default(),
            timeout_secs: default_timeout_secs(),
            compress: false,
            trusted_host: None,
            known_hosts: None,
        }
    }
}

impl RemoteConfig {
    pub fn user(&self) -> String {
        self.user.clone().unwrap_or_else(current_user)
    }

    pub fn is_trusted(&self) -> bool {
        self.trusted_host.unwrap_or(self.host == "localhost")
    }

    pub fn ssh_config(&self) -> SshConfig {
        let auth = match &self.auth {
            AuthConfig::Agent => SshAuth::Agent,
            AuthConfig::KeyFile { path, passphrase } => SshAuth::KeyFile {
                key_path: path.clone(),
                passphrase: passphrase.clone(),
            },
            AuthConfig::Password { password } => SshAuth::Password(password.clone()),
        };
        let mut config = SshConfig::new(self.host.clone(), self.user(), auth)
            .with_port(self.port)
            .with_timeout(self.timeout_secs)
            .with_trusted_host(self.is_trusted());
        if self.compress {
            config = config.with_compression();
        }
        if let Some(known_hosts) = &self.known_hosts {
            config = config.with_known_hosts(known_hosts.clone());
        }
        config
    }
}

/// Connect retry settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryConfig {
    #[serde(default = "default_retry_delay")]
    pub connect_delay_secs: u64,

    /// None = retry forever
    #[serde(default)]
    pub max_connect_retries: Option<u32>,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            connect_delay_secs: default_retry_delay(),
            max_connect_retries: None,
        }
    }
}

impl RetryConfig {
    pub fn policy(&self) -> RetryPolicy {
        let delay = Duration::from_secs(self.connect_delay_secs);
        match self.max_connect_retries {
            Some(max) => RetryPolicy::limited(delay, max),
            None => RetryPolicy::forever(delay),
        }
    }
}

/// One tag extraction rule
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TagRuleConfig {
    pub label: String,
    pub pattern: String,
    pub start: usize,
    pub end: usize,
}

/// Log level for diagnostic output
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Error,
    Warn,
    #[default]
    Info,
    Debug,
    Trace,
}

impl LogLevel {
    /// Convert to tracing::Level
    pub fn to_tracing_level(&self) -> tracing::Level {
        match self {
            LogLevel::Error => tracing::Level::ERROR,
            LogLevel::Warn => tracing::Level::WARN,
            LogLevel::Info => tracing::Level::INFO,
            LogLevel::Debug => tracing::Level::DEBUG,
            LogLevel::Trace => tracing::Level::TRACE,
        }
    }
}

fn default_database_path() -> PathBuf {
    PathBuf::from("parcel.sqlite3")
}

fn default_filename_max_length() -> usize {
    DEFAULT_MAX_FILENAME_LENGTH
}

fn default_file_mode() -> u32 {
    DEFAULT_FILE_MODE
}

fn default_tag_rules() -> Vec<TagRuleConfig> {
    vec![
        TagRuleConfig {
            label: "bhs".to_string(),
            pattern: r"^066\-[0-9]{8}\-[0-9]{1}".to_string(),
            start: 4,
            end: 6,
        },
        TagRuleConfig {
            label: "cdc1".to_string(),
            pattern: r"^[123]{1}[0-9]{2}\-[0-9]{4}".to_string(),
            start: 1,
            end: 3,
        },
    ]
}

fn default_time_zone() -> String {
    "UTC".to_string()
}

fn default_heartbeat_millis() -> u64 {
    1000
}

fn default_host() -> String {
    "localhost".to_string()
}

fn default_port() -> u16 {
    22
}

fn default_timeout_secs() -> u64 {
    5
}

fn default_retry_delay() -> u64 {
    5
}

/// Login name of the user running the process
pub fn current_user() -> String {
    std::env::var("USER")
        .or_else(|_| std::env::var("USERNAME"))
        .unwrap_or_else(|_| "unknown".to_string())
}

impl DispatchConfig {
    /// Load and validate configuration from a TOML file
    pub fn from_file(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path).map_err(|e| {
            ParcelError::Config(format!("Cannot read {}: {}", path.display(), e))
        })?;
        Self::from_toml(&contents)
    }

    /// Parse and validate configuration from TOML text
    pub fn from_toml(contents: &str) -> Result<Self> {
        let config: DispatchConfig = toml::from_str(contents)?;
        config.validate()?;
        Ok(config)
    }

    /// Reject configurations the dispatcher cannot run with
    pub fn validate(&self) -> Result<()> {
        if self.mime_types.is_empty() {
            return Err(ParcelError::Config(
                "No mime_types defined. Nothing to do.".to_string(),
            ));
        }
        if self.file_patterns.is_empty() {
            return Err(ParcelError::Config(
                "No file_patterns defined. Nothing to do.".to_string(),
            ));
        }
        if self.source_dir.as_os_str().is_empty() {
            return Err(ParcelError::Config("source_dir is not set".to_string()));
        }
        if self.destination_dir.is_empty() {
            return Err(ParcelError::Config("destination_dir is not set".to_string()));
        }
        if self.filename_max_length == 0 {
            return Err(ParcelError::Config(
                "filename_max_length must be positive".to_string(),
            ));
        }
        if self.heartbeat_millis == 0 {
            return Err(ParcelError::Config(
                "heartbeat_millis must be positive".to_string(),
            ));
        }
        if self.remote.timeout_secs == 0 {
            return Err(ParcelError::Config(
                "remote.timeout_secs must be positive".to_string(),
            ));
        }
        self.time_zone()?;
        self.tag_rules()?;
        self.classifier()?;
        Ok(())
    }

    pub fn time_zone(&self) -> Result<Tz> {
        self.time_zone
            .parse::<Tz>()
            .map_err(|e| ParcelError::Config(format!("Unknown time zone '{}': {}", self.time_zone, e)))
    }

    pub fn heartbeat(&self) -> Duration {
        Duration::from_millis(self.heartbeat_millis)
    }

    pub fn tag_rules(&self) -> Result<Vec<TagRule>> {
        self.tag_rules
            .iter()
            .map(|r| {
                if r.start >= r.end {
                    return Err(ParcelError::Config(format!(
                        "Tag rule '{}': start must be before end",
                        r.label
                    )));
                }
                TagRule::new(r.label.clone(), &r.pattern, r.start, r.end).map_err(|e| {
                    ParcelError::Config(format!("Tag rule '{}': {}", r.label, e))
                })
            })
            .collect()
    }

    pub fn classifier(&self) -> Result<FileClassifier> {
        let classifier = FileClassifier::new(&self.file_patterns, &self.mime_types)
            .with_max_length(self.filename_max_length);
        Ok(match &self.content_regex {
            Some(pattern) => classifier.with_content_check(PdfTextCheck::new(pattern).map_err(
                |e| ParcelError::Config(format!("content_regex: {}", e)),
            )?),
            None => classifier,
        })
    }

    /// Host name recorded as the transfer destination
    pub fn remote_hostname(&self) -> String {
        match self.transport {
            TransportKind::Ssh => self.remote.host.clone(),
            TransportKind::Local => "localhost".to_string(),
        }
    }

    pub fn dispatch_settings(&self) -> Result<DispatchSettings> {
        let mut settings = DispatchSettings::new(&self.source_dir, self.destination_dir.clone())
            .with_patterns(self.file_patterns.iter().cloned());
        settings.archive_dir = self.archive_dir.clone();
        settings.file_mode = self.file_mode;
        settings.mkdir_local = self.mkdir_local;
        settings.mkdir_remote = self.mkdir_remote;
        settings.time_zone = self.time_zone()?;
        settings.remote_hostname = self.remote_hostname();
        Ok(settings)
    }
}
