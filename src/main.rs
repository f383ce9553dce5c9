/*!
 * Parcel CLI - Command Line Interface
 */

use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use chrono::Utc;
use clap::{Parser, Subcommand, ValueEnum};
use parcel::{
    config::{current_user, DispatchConfig, LogLevel, TransportKind},
    core::watch::watch_and_dispatch,
    error::{ParcelError, Result, EXIT_SUCCESS},
    ledger::{load_folder_mappings, HistoryLedger, SqliteStore, TransferRecord},
    logging,
    transport::{Connector, LocalConnector, SshConnector},
    Dispatcher,
};
use tracing::info;

#[derive(Parser)]
#[command(name = "parcel")]
#[command(version, about = "Watch an inbox folder and dispatch arriving files to remote folders", long_about = None)]
struct Cli {
    /// Configuration file (TOML)
    #[arg(short = 'c', long = "config", value_name = "FILE", global = true, default_value = "parcel.toml")]
    config: PathBuf,

    /// Log level
    #[arg(long, value_enum, global = true)]
    log_level: Option<LogLevelArg>,

    /// Verbose logging (same as --log-level debug)
    #[arg(short = 'v', long, global = true)]
    verbose: bool,

    /// Write JSON logs to this file instead of stdout
    #[arg(long = "log", value_name = "FILE", global = true)]
    log: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Send waiting files, then watch the source folder until Ctrl-C
    Watch,

    /// Load remote folder mappings from a CSV file
    LoadFolders {
        /// CSV with columns base_path, folder, folder_tag, label
        #[arg(value_name = "CSV")]
        path: PathBuf,
    },

    /// Show the transfer history of a file
    History {
        filename: String,

        /// Print records as JSON
        #[arg(long)]
        json: bool,
    },

    /// Mark a transfer record acknowledged
    Acknowledge {
        id: i64,

        /// Acknowledging user (defaults to the current user)
        #[arg(long)]
        user: Option<String>,
    },

    /// Revert an acknowledgement
    Unacknowledge { id: i64 },

    /// Backfill sent flags on uploads from the transfer history
    Reconcile,

    /// Mark sent uploads as audited
    Audit {
        /// Auditor name (defaults to the current user)
        #[arg(long)]
        auditor: Option<String>,
    },

    /// List files waiting in the source folder
    Pending,
}

#[derive(Copy, Clone, PartialEq, Eq, PartialOrd, Ord, ValueEnum)]
enum LogLevelArg {
    Error,
    Warn,
    Info,
    Debug,
    Trace,
}

impl From<LogLevelArg> for LogLevel {
    fn from(arg: LogLevelArg) -> Self {
        match arg {
            LogLevelArg::Error => LogLevel::Error,
            LogLevelArg::Warn => LogLevel::Warn,
            LogLevelArg::Info => LogLevel::Info,
            LogLevelArg::Debug => LogLevel::Debug,
            LogLevelArg::Trace => LogLevel::Trace,
        }
    }
}

fn main() {
    let code = match run() {
        Ok(()) => EXIT_SUCCESS,
        Err(e) => {
            eprintln!("Error: {}", e);
            e.exit_code()
        }
    };
    std::process::exit(code);
}

fn run() -> Result<()> {
    let cli = Cli::parse();

    let mut config = DispatchConfig::from_file(&cli.config)?;
    if let Some(level) = cli.log_level {
        config.log_level = level.into();
    }
    if cli.log.is_some() {
        config.log_file = cli.log.clone();
    }
    config.verbose |= cli.verbose;
    logging::init_logging(&config)?;

    let store = SqliteStore::open(&config.database_path)?;

    match cli.command {
        Commands::Watch => watch(&config, store),
        Commands::LoadFolders { path } => {
            let summary = load_folder_mappings(&store, &path)?;
            println!(
                "{} rows read, {} mappings added, {} already present",
                summary.rows, summary.added, summary.existing
            );
            Ok(())
        }
        Commands::History { filename, json } => {
            let records = store.find_by_filename(&filename)?;
            if json {
                let out = serde_json::to_string_pretty(&records)
                    .map_err(|e| ParcelError::Other(format!("JSON encoding failed: {}", e)))?;
                println!("{}", out);
            } else if records.is_empty() {
                println!("{} has not been sent", filename);
            } else {
                for record in &records {
                    print_record(record);
                }
            }
            Ok(())
        }
        Commands::Acknowledge { id, user } => {
            let user = user.unwrap_or_else(current_user);
            let record = store.acknowledge(id, &user, Utc::now())?;
            println!("#{} {} acknowledged by {}", record.id, record.filename, user);
            Ok(())
        }
        Commands::Unacknowledge { id } => {
            let record = store.unacknowledge(id)?;
            println!("#{} {} is {} again", record.id, record.filename, record.status);
            Ok(())
        }
        Commands::Reconcile => {
            let changed = store.reconcile_uploads()?;
            println!("{} upload(s) updated", changed);
            Ok(())
        }
        Commands::Audit { auditor } => {
            let auditor = auditor.unwrap_or_else(current_user);
            let audited = store.audit_uploads(&auditor, Utc::now())?;
            println!("{} upload(s) audited by {}", audited, auditor);
            Ok(())
        }
        Commands::Pending => {
            let settings = config.dispatch_settings()?;
            let pending = parcel::core::dispatch::pending_files(&settings.source_dir, settings.time_zone)?;
            for file in &pending {
                println!(
                    "{:<50} {:>10}  {}",
                    file.filename,
                    file.size,
                    file.modified.format("%Y-%m-%d %H:%M:%S %Z")
                );
            }
            println!("{} file(s) pending", pending.len());
            Ok(())
        }
    }
}

fn watch(config: &DispatchConfig, store: SqliteStore) -> Result<()> {
    let stop = Arc::new(AtomicBool::new(false));
    let flag = stop.clone();
    ctrlc::set_handler(move || flag.store(true, Ordering::SeqCst))
        .map_err(|e| ParcelError::Other(format!("Cannot install Ctrl-C handler: {}", e)))?;

    match config.transport {
        TransportKind::Ssh => {
            let connector = SshConnector::new(config.remote.ssh_config());
            run_watch(config, connector, store, &stop)
        }
        TransportKind::Local => run_watch(config, LocalConnector::new(), store, &stop),
    }
}

fn run_watch<C: Connector>(
    config: &DispatchConfig,
    connector: C,
    store: SqliteStore,
    stop: &AtomicBool,
) -> Result<()> {
    let mut dispatcher = Dispatcher::from_config(config, connector, store)?;
    dispatcher.check_folders()?;
    print_summary(config, &dispatcher);

    watch_and_dispatch(&mut dispatcher, config.touch_existing, stop, config.heartbeat())?;
    dispatcher.connection_mut().disconnect();
    info!("Done.");
    Ok(())
}

fn print_summary<C: Connector>(config: &DispatchConfig, dispatcher: &Dispatcher<C>) {
    let settings = dispatcher.settings();
    println!("parcel {}", parcel::VERSION);
    println!("  Source folder:      {}", settings.source_dir.display());
    println!(
        "  Destination:        {} on {}",
        settings.destination_dir,
        dispatcher.connection().endpoint()
    );
    match &settings.archive_dir {
        Some(dir) => println!("  Archive folder:     {}", dir.display()),
        None => println!("  Archive folder:     (none, sent files are deleted)"),
    }
    println!("  File patterns:      {}", config.file_patterns.join(", "));
    println!("  Content types:      {}", config.mime_types.join(", "));
    println!("  Folder strategy:    {:?}", config.folder_strategy);
    println!("  History database:   {}", config.database_path.display());
    println!("  Time zone:          {}", settings.time_zone);
}

fn print_record(record: &TransferRecord) {
    println!(
        "#{} {} -> {}:{} [{}] sent {} by {}",
        record.id,
        record.filename,
        record.remote_hostname,
        record.remote_path,
        record.status,
        record.sent_at.format("%Y-%m-%d %H:%M:%S"),
        record.operating_user
    );
    if let Some(archive) = &record.archive_path {
        println!("    archived as {}", archive);
    }
    if let (Some(by), Some(at)) = (&record.acknowledged_by, record.acknowledged_at) {
        println!("    acknowledged by {} at {}", by, at.format("%Y-%m-%d %H:%M:%S"));
    }
}
