/*!
 * Parcel - inbox folder dispatcher
 *
 * Watches a local folder and ships each arriving file to a remote folder:
 * - Content-type sniffing plus filename pattern and length filters
 * - Remote folder resolution by filename tag, content type or day
 * - SCP over SSH with connect retry and a single put retry
 * - Archive-or-delete of sent files with a SQLite transfer history
 * - Upload reconciliation and acknowledgement bookkeeping
 */

pub mod config;
pub mod core;
pub mod error;
pub mod ledger;
pub mod logging;
pub mod transport;

// Re-export commonly used types
pub use config::{DispatchConfig, FolderStrategy, LogLevel, TransportKind};
pub use core::dispatch::{DispatchOutcome, DispatchSettings, Dispatcher};
pub use core::{EventKind, FileEvent, PendingFile};
pub use error::{ParcelError, Result};
pub use ledger::{HistoryLedger, SqliteStore, TransferRecord};
pub use transport::{Connector, LocalConnector, SshConnector, TransferConnection};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
