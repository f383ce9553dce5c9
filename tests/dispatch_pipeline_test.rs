//! End-to-end dispatch through classifier, resolver, connection and ledger

mod common;

use std::fs;
use std::time::Duration;

use common::{text_pdf, Fault, ScriptedConnector, Workspace};
use parcel::config::{DispatchConfig, FolderStrategy, TransportKind};
use parcel::core::classifier::{ContentCheck, FileClassifier, PdfTextCheck};
use parcel::core::resolver::{default_tag_rules, LookupFolderHandler};
use parcel::core::retry::RetryPolicy;
use parcel::ledger::{FolderMapping, HistoryLedger, SqliteStore, TransferStatus};
use parcel::transport::{LocalConnector, TransferConnection, TransportError};
use parcel::{DispatchOutcome, DispatchSettings, Dispatcher, EventKind, FileEvent, ParcelError};
use regex::Regex;

const EXAMPLE: &str = "066-12000001-3.pdf";

fn store_with_digawana() -> SqliteStore {
    let store = SqliteStore::open_in_memory().unwrap();
    store
        .insert_mapping(&FolderMapping {
            base_path: "viral_load".to_string(),
            folder_name: "digawana".to_string(),
            tag: "12".to_string(),
            label: "bhs".to_string(),
        })
        .unwrap();
    store
}

fn dispatcher(
    ws: &Workspace,
    store: &SqliteStore,
    connector: ScriptedConnector,
    archive: bool,
) -> Dispatcher<ScriptedConnector> {
    let mut settings =
        DispatchSettings::new(&ws.source, ws.destination_str()).with_patterns(["*.pdf"]);
    if archive {
        settings = settings.with_archive_dir(&ws.archive);
    }
    let handler = LookupFolderHandler::new(
        default_tag_rules().unwrap(),
        store.clone(),
        ws.destination_str(),
    )
    .unwrap();
    Dispatcher::new(
        settings,
        FileClassifier::new(["*.pdf"], ["application/pdf"]),
        Box::new(handler),
        TransferConnection::new(connector, RetryPolicy::limited(Duration::ZERO, 0)),
        Box::new(store.clone()),
    )
}

fn created(path: &std::path::Path) -> FileEvent {
    FileEvent::new(EventKind::Created, path)
}

#[test]
fn test_example_file_reaches_mapped_folder() {
    let ws = Workspace::new();
    let digawana = ws.remote_folder("digawana");
    let store = store_with_digawana();
    let mut d = dispatcher(&ws, &store, ScriptedConnector::new(), true);

    let source = ws.drop_pdf(EXAMPLE);
    let size = fs::metadata(&source).unwrap().len();
    let outcome = d.handle(&created(&source)).unwrap();

    let archived_to = match outcome {
        DispatchOutcome::Sent {
            archived_to: Some(path),
            ..
        } => path,
        other => panic!("unexpected outcome {:?}", other),
    };
    let archive_name = archived_to.file_name().unwrap().to_str().unwrap();
    assert!(Regex::new(r"^066-12000001-3_[A-Z0-9]{5}\.pdf$")
        .unwrap()
        .is_match(archive_name));
    assert!(archived_to.starts_with(&ws.archive));
    assert!(archived_to.exists());
    assert!(!source.exists());
    assert!(digawana.join(EXAMPLE).exists());

    let history = store.find_by_filename(EXAMPLE).unwrap();
    assert_eq!(history.len(), 1);
    let record = &history[0];
    assert_eq!(record.remote_folder.as_deref(), Some("digawana"));
    assert_eq!(record.remote_folder_tag.as_deref(), Some("12"));
    assert_eq!(record.status, TransferStatus::Sent);
    assert!(!record.acknowledged);
    assert_eq!(record.content_type, "application/pdf");
    assert_eq!(record.filesize, size);
    assert_eq!(
        record.remote_path,
        digawana.join(EXAMPLE).to_str().unwrap()
    );
    assert_eq!(
        record.archive_path.as_deref(),
        Some(archived_to.to_str().unwrap())
    );
}

#[test]
fn test_without_archive_source_is_deleted() {
    let ws = Workspace::new();
    ws.remote_folder("digawana");
    let store = store_with_digawana();
    let mut d = dispatcher(&ws, &store, ScriptedConnector::new(), false);

    let source = ws.drop_pdf(EXAMPLE);
    let outcome = d.handle(&created(&source)).unwrap();

    assert!(matches!(outcome, DispatchOutcome::Sent { archived_to: None, .. }));
    assert!(!source.exists());
    assert!(ws.archived().is_empty());
    assert!(store.most_recent(EXAMPLE).unwrap().unwrap().archive_path.is_none());
}

#[test]
fn test_filename_length_boundary() {
    let ws = Workspace::new();
    ws.remote_folder("digawana");
    let store = store_with_digawana();
    let mut d = dispatcher(&ws, &store, ScriptedConnector::new(), true);

    // 14 + 1 + padding + 4 characters
    let at_limit = format!("066-12000001-3_{}.pdf", "x".repeat(31));
    let over_limit = format!("066-12000001-3_{}.pdf", "x".repeat(32));
    assert_eq!(at_limit.len(), 50);
    assert_eq!(over_limit.len(), 51);

    let ok = ws.drop_pdf(&at_limit);
    assert!(d.handle(&created(&ok)).unwrap().is_sent());

    let long = ws.drop_pdf(&over_limit);
    assert_eq!(d.handle(&created(&long)).unwrap(), DispatchOutcome::Rejected);
    assert!(long.exists());
    assert!(store.find_by_filename(&over_limit).unwrap().is_empty());
}

#[test]
fn test_pattern_and_type_are_both_required() {
    let ws = Workspace::new();
    ws.remote_folder("digawana");
    let store = store_with_digawana();
    let connector = ScriptedConnector::new();
    let mut d = dispatcher(&ws, &store, connector.clone(), true);

    // right name, wrong content
    let text = ws.drop_text(EXAMPLE, "plain text pretending to be a pdf");
    assert_eq!(d.handle(&created(&text)).unwrap(), DispatchOutcome::Rejected);
    assert!(text.exists());

    // right content, wrong name
    let renamed = ws.source.join("066-12000001-3.txt");
    fs::write(&renamed, common::pdf_bytes("txt")).unwrap();
    assert_eq!(d.handle(&created(&renamed)).unwrap(), DispatchOutcome::Rejected);
    assert!(renamed.exists());

    assert_eq!(connector.put_attempts(), 0);
}

#[test]
fn test_unmapped_tag_is_left_in_place() {
    let ws = Workspace::new();
    ws.remote_folder("digawana");
    let store = store_with_digawana();
    let connector = ScriptedConnector::new();
    let mut d = dispatcher(&ws, &store, connector.clone(), true);

    let source = ws.drop_pdf("066-99000001-3.pdf");
    assert_eq!(d.handle(&created(&source)).unwrap(), DispatchOutcome::Unresolved);
    assert!(source.exists());
    assert_eq!(connector.put_attempts(), 0);
}

#[test]
fn test_permission_denied_is_a_skip() {
    let ws = Workspace::new();
    ws.remote_folder("digawana");
    let store = store_with_digawana();
    let connector = ScriptedConnector::new().fail_put(&[Fault::PermissionDenied]);
    let mut d = dispatcher(&ws, &store, connector.clone(), true);

    let source = ws.drop_pdf(EXAMPLE);
    assert_eq!(d.handle(&created(&source)).unwrap(), DispatchOutcome::Skipped);

    assert!(source.exists());
    assert!(ws.archived().is_empty());
    assert!(store.find_by_filename(EXAMPLE).unwrap().is_empty());
    assert_eq!(connector.put_attempts(), 1);

    // next event goes through
    assert!(d.handle(&created(&source)).unwrap().is_sent());
}

#[test]
fn test_no_response_is_retried_once() {
    let ws = Workspace::new();
    ws.remote_folder("digawana");
    let store = store_with_digawana();
    let connector = ScriptedConnector::new().fail_put(&[Fault::NoResponse]);
    let mut d = dispatcher(&ws, &store, connector.clone(), true);

    let source = ws.drop_pdf(EXAMPLE);
    assert!(d.handle(&created(&source)).unwrap().is_sent());

    assert_eq!(connector.put_attempts(), 2);
    assert_eq!(connector.connect_attempts(), 2);
    assert_eq!(store.find_by_filename(EXAMPLE).unwrap().len(), 1);
}

#[test]
fn test_second_no_response_propagates() {
    let ws = Workspace::new();
    ws.remote_folder("digawana");
    let store = store_with_digawana();
    let connector = ScriptedConnector::new().fail_put(&[Fault::NoResponse, Fault::NoResponse]);
    let mut d = dispatcher(&ws, &store, connector.clone(), true);

    let source = ws.drop_pdf(EXAMPLE);
    let err = d.handle(&created(&source)).unwrap_err();

    assert!(matches!(
        err,
        ParcelError::Transport(TransportError::NoResponse(_))
    ));
    assert_eq!(connector.put_attempts(), 2);
    assert!(source.exists());
    assert!(store.find_by_filename(EXAMPLE).unwrap().is_empty());
}

#[test]
fn test_modify_of_vanished_file_is_ignored() {
    let ws = Workspace::new();
    let store = store_with_digawana();
    let mut d = dispatcher(&ws, &store, ScriptedConnector::new(), true);

    let gone = ws.source.join(EXAMPLE);
    let outcome = d
        .handle(&FileEvent::new(EventKind::Modified, &gone))
        .unwrap();
    assert_eq!(outcome, DispatchOutcome::Missing);
}

#[test]
fn test_catch_up_sends_in_name_order() {
    let ws = Workspace::new();
    ws.remote_folder("digawana");
    let store = store_with_digawana();
    let mut d = dispatcher(&ws, &store, ScriptedConnector::new(), true);

    let names = ["066-12000003-3.pdf", "066-12000001-3.pdf", "066-12000002-3.pdf"];
    for name in names {
        ws.drop_pdf(name);
    }
    ws.drop_text("notes.txt", "not a result");

    assert_eq!(d.process_existing_files().unwrap(), 3);
    assert!(ws.source.join("notes.txt").exists());

    let ids: Vec<i64> = ["066-12000001-3.pdf", "066-12000002-3.pdf", "066-12000003-3.pdf"]
        .iter()
        .map(|name| store.most_recent(name).unwrap().unwrap().id)
        .collect();
    assert!(ids.windows(2).all(|w| w[0] < w[1]), "{:?}", ids);
    assert_eq!(ws.archived().len(), 3);
}

#[test]
fn test_touch_existing_does_not_send() {
    let ws = Workspace::new();
    ws.remote_folder("digawana");
    let store = store_with_digawana();
    let connector = ScriptedConnector::new();
    let d = dispatcher(&ws, &store, connector.clone(), true);

    let source = ws.drop_pdf(EXAMPLE);
    let old = filetime::FileTime::from_unix_time(1_000_000_000, 0);
    filetime::set_file_mtime(&source, old).unwrap();
    ws.drop_text("notes.txt", "skip me");

    assert_eq!(d.touch_existing().unwrap(), 1);

    let meta = fs::metadata(&source).unwrap();
    assert!(filetime::FileTime::from_last_modification_time(&meta) > old);
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        assert_eq!(meta.permissions().mode() & 0o777, 0o644);
    }
    assert_eq!(connector.put_attempts(), 0);
    assert!(source.exists());
}

#[test]
fn test_check_folders_missing_destination() {
    let ws = Workspace::new();
    let store = store_with_digawana();
    let mut d = dispatcher(&ws, &store, ScriptedConnector::new(), true);
    fs::remove_dir(&ws.destination).unwrap();

    assert!(matches!(
        d.check_folders(),
        Err(ParcelError::FolderNotFound(_))
    ));
}

#[test]
fn test_authentication_failure_is_fatal_at_startup() {
    let ws = Workspace::new();
    let store = store_with_digawana();
    let connector = ScriptedConnector::new().fail_connect(&[Fault::Authentication]);
    let mut d = dispatcher(&ws, &store, connector.clone(), true);

    let err = d.check_folders().unwrap_err();
    assert!(err.is_fatal());
    assert_eq!(err.exit_code(), parcel::error::EXIT_FATAL);
    assert_eq!(connector.connect_attempts(), 1);
}

#[test]
fn test_day_strategy_from_config() {
    let ws = Workspace::new();
    let store = SqliteStore::open_in_memory().unwrap();
    let config = DispatchConfig {
        source_dir: ws.source.clone(),
        destination_dir: ws.destination_str().to_string(),
        archive_dir: Some(ws.archive.clone()),
        mime_types: vec!["application/pdf".to_string()],
        file_patterns: vec!["*.pdf".to_string()],
        mkdir_remote: true,
        transport: TransportKind::Local,
        folder_strategy: FolderStrategy::Day,
        ..Default::default()
    };
    config.validate().unwrap();

    let mut d = Dispatcher::from_config(&config, LocalConnector::new(), store.clone()).unwrap();
    d.check_folders().unwrap();

    let source = ws.drop_pdf("anything.pdf");
    assert!(d.handle(&created(&source)).unwrap().is_sent());

    let record = store.most_recent("anything.pdf").unwrap().unwrap();
    let folder = record.remote_folder.unwrap();
    assert_eq!(folder.len(), 8);
    assert!(folder.chars().all(|c| c.is_ascii_digit()));
    assert!(ws.destination.join(&folder).join("anything.pdf").exists());
    let weekday: u32 = record.remote_folder_tag.unwrap().parse().unwrap();
    assert!(weekday < 7);
    assert_eq!(record.remote_hostname, "localhost");
}

const SPECIMEN_PREFIX: &str = r"\d{3}-\d{8}-\d";

#[test]
fn test_pdf_text_check_accepts_matching_report() {
    let ws = Workspace::new();
    let check = PdfTextCheck::new(SPECIMEN_PREFIX).unwrap();

    let report = ws.drop_bytes(EXAMPLE, &text_pdf("Specimen 066-12000001-3 HIV-1 RNA not detected"));
    assert!(check.check(&report, EXAMPLE, "application/pdf"));

    let swapped = ws.drop_bytes(
        "066-12000002-1.pdf",
        &text_pdf("Specimen 066-12000001-3 HIV-1 RNA not detected"),
    );
    assert!(!check.check(&swapped, "066-12000002-1.pdf", "application/pdf"));
}

#[test]
fn test_content_check_gates_dispatch() {
    let ws = Workspace::new();
    let digawana = ws.remote_folder("digawana");
    let store = store_with_digawana();
    let handler = LookupFolderHandler::new(
        default_tag_rules().unwrap(),
        store.clone(),
        ws.destination_str(),
    )
    .unwrap();
    let classifier = FileClassifier::new(["*.pdf"], ["application/pdf"])
        .with_content_check(PdfTextCheck::new(SPECIMEN_PREFIX).unwrap());
    let mut d = Dispatcher::new(
        DispatchSettings::new(&ws.source, ws.destination_str()).with_patterns(["*.pdf"]),
        classifier,
        Box::new(handler),
        TransferConnection::new(ScriptedConnector::new(), RetryPolicy::limited(Duration::ZERO, 0)),
        Box::new(store.clone()),
    );

    let mismatched = "066-12000009-5.pdf";
    let wrong = ws.drop_bytes(mismatched, &text_pdf("Specimen 066-12000001-3 viral load"));
    assert!(matches!(
        d.handle(&created(&wrong)).unwrap(),
        DispatchOutcome::Rejected
    ));
    assert!(wrong.exists());
    assert!(store.most_recent(mismatched).unwrap().is_none());

    let report = ws.drop_bytes(EXAMPLE, &text_pdf("Specimen 066-12000001-3 viral load"));
    assert!(d.handle(&created(&report)).unwrap().is_sent());
    assert!(digawana.join(EXAMPLE).exists());
    assert!(!report.exists());
}
