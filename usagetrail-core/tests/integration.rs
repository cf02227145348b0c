//! Integration tests for the usagetrail extraction pipeline
//!
//! Evidence databases are built on the fly. WAL fixtures are captured while a
//! writer still holds the database open, so committed rows live only in the
//! `-wal` sidecar the way they do on an acquired device image.

use rusqlite::Connection;
use std::io::{Read, Write};
use std::net::TcpListener;
use std::path::{Path, PathBuf};
use std::thread::JoinHandle;
use tempfile::TempDir;
use usagetrail_core::config::{
    CatalogConfig, LookupConfig, LookupKind, ReaderConfig, ReportConfig,
};
use usagetrail_core::reader::wal_path;
use usagetrail_core::{Config, EventReader, Extractor, RunOutcome};

const EVENT_SCHEMA: &str = "CREATE TABLE ZAMDAPPEVENT (
    Z_PK INTEGER PRIMARY KEY,
    Z_ENT INTEGER,
    ZADAMID INTEGER,
    ZTIME INTEGER,
    ZFOREGROUNDDURATION REAL,
    ZEVENTSUBTYPE INTEGER,
    ZTYPE INTEGER,
    ZAPPVERSION VARCHAR
);";

const EVENT_ROWS: &str = "
INSERT INTO ZAMDAPPEVENT (ZADAMID, ZTIME, ZFOREGROUNDDURATION, ZEVENTSUBTYPE, ZTYPE, ZAPPVERSION)
VALUES (12345, 1700000000000, 60, 3, 1, '2.0');
INSERT INTO ZAMDAPPEVENT (ZADAMID, ZTIME, ZFOREGROUNDDURATION, ZEVENTSUBTYPE, ZTYPE, ZAPPVERSION)
VALUES (678, 1700000500000, 12.5, 1, 2, '4.1');";

/// Create a rollback-journal evidence database.
fn create_evidence(dir: &Path) -> PathBuf {
    let path = dir.join("StoreUser.db");
    let conn = Connection::open(&path).unwrap();
    conn.execute_batch(EVENT_SCHEMA).unwrap();
    conn.execute_batch(EVENT_ROWS).unwrap();
    path
}

/// Create a WAL-mode evidence database whose rows are only in the sidecar.
///
/// The schema is committed before switching to WAL; rows are written with
/// auto-checkpointing disabled and the database file and its `-wal` are
/// copied out before the writer closes.
fn create_wal_evidence(dir: &Path) -> PathBuf {
    let live_dir = dir.join("live");
    std::fs::create_dir_all(&live_dir).unwrap();
    let live = live_dir.join("StoreUser.db");

    let writer = Connection::open(&live).unwrap();
    writer.execute_batch(EVENT_SCHEMA).unwrap();
    writer
        .execute_batch(
            "PRAGMA journal_mode = WAL;
             PRAGMA wal_autocheckpoint = 0;",
        )
        .unwrap();
    writer.execute_batch(EVENT_ROWS).unwrap();

    let evidence_dir = dir.join("evidence");
    std::fs::create_dir_all(&evidence_dir).unwrap();
    let evidence = evidence_dir.join("StoreUser.db");
    std::fs::copy(&live, &evidence).unwrap();
    std::fs::copy(wal_path(&live), wal_path(&evidence)).unwrap();
    drop(writer);

    assert!(std::fs::metadata(wal_path(&evidence)).unwrap().len() > 0);
    evidence
}

fn write_mapping(dir: &Path) -> PathBuf {
    let path = dir.join("apps.txt");
    std::fs::write(
        &path,
        "com.example.app,12345,Example App\nnot a mapping line\ncom.apple.Maps,678,Maps\n",
    )
    .unwrap();
    path
}

fn config_with(dir: &Path, lookup: LookupConfig) -> Config {
    Config {
        lookup,
        report: ReportConfig {
            output_dir: Some(dir.join("reports")),
            ..Default::default()
        },
        ..Default::default()
    }
}

fn completed(outcome: RunOutcome) -> usagetrail_core::RunSummary {
    match outcome {
        RunOutcome::Completed(summary) => summary,
        RunOutcome::Skipped { reason, .. } => panic!("run was skipped: {reason}"),
    }
}

/// Serve one JSON response and hand back the raw request.
fn serve_once(body: &'static str) -> (String, JoinHandle<String>) {
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let url = format!("http://{}/lookup", listener.local_addr().unwrap());

    let handle = std::thread::spawn(move || {
        let (mut stream, _) = listener.accept().unwrap();
        let mut data = Vec::new();
        let mut buf = [0u8; 1024];
        loop {
            let n = stream.read(&mut buf).unwrap();
            if n == 0 {
                break;
            }
            data.extend_from_slice(&buf[..n]);
            let text = String::from_utf8_lossy(&data);
            if let Some(end) = text.find("\r\n\r\n") {
                let length = text[..end]
                    .lines()
                    .find_map(|line| {
                        line.to_ascii_lowercase()
                            .strip_prefix("content-length:")
                            .and_then(|v| v.trim().parse::<usize>().ok())
                    })
                    .unwrap_or(0);
                if data.len() >= end + 4 + length {
                    break;
                }
            }
        }

        let response = format!(
            "HTTP/1.1 200 OK\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
            body.len(),
            body
        );
        stream.write_all(response.as_bytes()).unwrap();
        String::from_utf8_lossy(&data).into_owned()
    });

    (url, handle)
}

fn read_report(path: &Path) -> Vec<csv::StringRecord> {
    csv::Reader::from_path(path)
        .unwrap()
        .records()
        .map(|r| r.unwrap())
        .collect()
}

// ============================================
// WAL Handling Tests
// ============================================

#[test]
fn test_rows_only_in_wal_are_visible() {
    usagetrail_core::logging::init_test();
    let dir = TempDir::new().unwrap();
    let evidence = create_wal_evidence(dir.path());

    let result = EventReader::new(ReaderConfig::default())
        .read(&evidence)
        .expect("read should succeed");

    assert_eq!(result.journal_mode, "wal");
    assert_eq!(result.events.len(), 2);
    assert_eq!(result.events[0].identifier, "12345");
    assert_eq!(result.events[1].identifier, "678");

    let checkpoint = result.checkpoint.expect("checkpoint should run");
    assert!(checkpoint.log_frames > 0);
}

#[test]
fn test_working_copy_leaves_evidence_untouched() {
    let dir = TempDir::new().unwrap();
    let evidence = create_wal_evidence(dir.path());
    let db_before = std::fs::read(&evidence).unwrap();
    let wal_before = std::fs::read(wal_path(&evidence)).unwrap();

    let working_dir = dir.path().join("work");
    let reader = EventReader::new(ReaderConfig {
        always_copy: true,
        keep_working_copy: true,
        working_dir: Some(working_dir.clone()),
        ..Default::default()
    });
    let result = reader.read(&evidence).expect("read should succeed");

    assert_eq!(result.events.len(), 2);
    assert_eq!(
        result.working_copy.as_deref(),
        Some(working_dir.join("StoreUser_backup.db").as_path())
    );
    assert!(working_dir.join("StoreUser_backup.db").exists());

    assert_eq!(std::fs::read(&evidence).unwrap(), db_before);
    assert_eq!(std::fs::read(wal_path(&evidence)).unwrap(), wal_before);
}

#[test]
fn test_working_copy_is_removed_unless_kept() {
    let dir = TempDir::new().unwrap();
    let evidence = create_wal_evidence(dir.path());

    let working_dir = dir.path().join("work");
    let reader = EventReader::new(ReaderConfig {
        always_copy: true,
        working_dir: Some(working_dir.clone()),
        ..Default::default()
    });
    let result = reader.read(&evidence).expect("read should succeed");

    assert!(result.used_working_copy());
    assert!(result.working_copy.is_none());
    assert_eq!(result.events.len(), 2);
    assert!(!working_dir.join("StoreUser_backup.db").exists());
    assert!(!working_dir.join("StoreUser_backup.db-wal").exists());
}

#[test]
fn test_in_place_failure_falls_back_to_working_copy() {
    usagetrail_core::logging::init_test();
    let dir = TempDir::new().unwrap();
    let evidence = create_wal_evidence(dir.path());

    // A directory where the shared-memory index belongs makes the in-place
    // WAL open fail; the copy gets no -shm and reads normally.
    let shm = evidence.with_file_name("StoreUser.db-shm");
    std::fs::create_dir(&shm).unwrap();

    let db_before = std::fs::read(&evidence).unwrap();
    let wal_before = std::fs::read(wal_path(&evidence)).unwrap();

    let working_dir = dir.path().join("work");
    let reader = EventReader::new(ReaderConfig {
        working_dir: Some(working_dir.clone()),
        ..Default::default()
    });
    let result = reader.read(&evidence).expect("fallback read should succeed");

    assert!(result.used_working_copy());
    assert!(result.working_copy.is_none());
    assert_eq!(result.journal_mode, "wal");
    assert_eq!(result.events.len(), 2);
    assert_eq!(result.events[0].identifier, "12345");
    assert_eq!(result.events[1].identifier, "678");
    assert!(result.checkpoint.is_some());

    assert_eq!(std::fs::read(&evidence).unwrap(), db_before);
    assert_eq!(std::fs::read(wal_path(&evidence)).unwrap(), wal_before);
    assert!(shm.is_dir());
    assert!(!working_dir.join("StoreUser_backup.db").exists());
}

// ============================================
// End-to-End Tests
// ============================================

#[test]
fn test_end_to_end_with_mapping_file() {
    usagetrail_core::logging::init_test();
    let dir = TempDir::new().unwrap();
    let evidence = create_evidence(dir.path());
    let config = config_with(
        dir.path(),
        LookupConfig {
            path: Some(write_mapping(dir.path())),
            ..Default::default()
        },
    );

    let extractor = Extractor::from_config(&config).unwrap();
    let summary = completed(extractor.run(&evidence, "CASE-42").unwrap());

    assert_eq!(summary.lookup, Some(LookupKind::File));
    assert!(summary.unresolved.is_empty());
    assert_eq!(
        summary.output.file_name().unwrap(),
        "CASE-42-StoreUser.db-parsed.csv"
    );

    let rows = read_report(&summary.output);
    assert_eq!(rows.len(), 4);

    assert_eq!(&rows[0][0], "11/14/2023 22:13:20");
    assert_eq!(&rows[0][1], "App in Foreground");
    assert_eq!(
        &rows[0][2],
        "Example App (Bundle ID: com.example.app, AdamID: 12345) v2.0\nType: 1, Subtype: 3 (Install)\nDuration: 60 seconds"
    );
    assert_eq!(&rows[1][0], "11/14/2023 22:14:20");
    assert_eq!(&rows[1][1], "App moved to background");

    assert_eq!(
        &rows[2][2],
        "Maps (Bundle ID: com.apple.Maps, AdamID: 678) v4.1\nType: 2, Subtype: 1 \nDuration: 12.5 seconds"
    );
}

#[test]
fn test_end_to_end_missing_mapping_file_uses_sentinels() {
    let dir = TempDir::new().unwrap();
    let evidence = create_evidence(dir.path());
    let config = config_with(
        dir.path(),
        LookupConfig {
            kind: Some(LookupKind::File),
            path: Some(dir.path().join("absent.txt")),
            ..Default::default()
        },
    );

    let summary = completed(
        Extractor::from_config(&config)
            .unwrap()
            .run(&evidence, "CASE-43")
            .unwrap(),
    );

    assert!(summary.lookup_error.is_some());
    let rows = read_report(&summary.output);
    assert_eq!(rows.len(), 4);
    assert!(rows
        .iter()
        .all(|row| row[2].contains("Unknown App (Bundle ID: Unknown Bundle ID")));
}

#[test]
fn test_end_to_end_with_store_database() {
    let dir = TempDir::new().unwrap();
    let evidence = create_wal_evidence(dir.path());

    let store = dir.path().join("storeitems.sqlite");
    Connection::open(&store)
        .unwrap()
        .execute_batch(
            "CREATE TABLE store_items (store_item_id TEXT, title TEXT, bundle_id TEXT);
             INSERT INTO store_items VALUES ('12345', 'Example App', 'com.example.app');",
        )
        .unwrap();

    let config = config_with(
        dir.path(),
        LookupConfig {
            path: Some(store),
            ..Default::default()
        },
    );
    let summary = completed(
        Extractor::from_config(&config)
            .unwrap()
            .run(&evidence, "CASE-44")
            .unwrap(),
    );

    assert_eq!(summary.lookup, Some(LookupKind::StoreDb));
    assert_eq!(summary.journal_mode, "wal");
    assert_eq!(summary.unresolved, vec!["678".to_string()]);

    let rows = read_report(&summary.output);
    assert!(rows[0][2].starts_with("Example App (Bundle ID: com.example.app, AdamID: 12345)"));
    assert!(rows[2][2].starts_with("Unknown App (Bundle ID: Unknown Bundle ID, AdamID: 678)"));
}

#[test]
fn test_end_to_end_with_catalog_bridged_by_mapping_file() {
    let dir = TempDir::new().unwrap();
    let evidence = create_evidence(dir.path());
    let (url, server) = serve_once(r#"{"com.example.app": "Example App (Catalog)"}"#);

    let mut config = config_with(
        dir.path(),
        LookupConfig {
            kind: Some(LookupKind::Catalog),
            path: Some(write_mapping(dir.path())),
            ..Default::default()
        },
    );
    config.catalog = CatalogConfig {
        endpoint: Some(url),
        timeout_secs: 5,
        ..Default::default()
    };

    let summary = completed(
        Extractor::from_config(&config)
            .unwrap()
            .run(&evidence, "CASE-47")
            .unwrap(),
    );
    let request = server.join().unwrap();

    // Bundle ids from the mapping are sent, never the AdamIDs
    let (_, body) = request.split_once("\r\n\r\n").unwrap();
    assert_eq!(body, r#"{"bundle_ids":["com.apple.Maps","com.example.app"]}"#);

    assert_eq!(summary.lookup, Some(LookupKind::Catalog));
    assert!(summary.lookup_error.is_none());
    assert!(summary.unresolved.is_empty());

    let rows = read_report(&summary.output);
    assert!(rows[0][2]
        .starts_with("Example App (Catalog) (Bundle ID: com.example.app, AdamID: 12345) v2.0"));
    assert!(rows[2][2].starts_with("Maps (Bundle ID: com.apple.Maps, AdamID: 678) v4.1"));
}

#[test]
fn test_end_to_end_with_catalog_and_no_mapping_degrades() {
    let dir = TempDir::new().unwrap();
    let evidence = create_evidence(dir.path());

    // Nothing listens here; the run must not reach it
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let url = format!("http://{}/lookup", listener.local_addr().unwrap());
    drop(listener);

    let mut config = config_with(
        dir.path(),
        LookupConfig {
            kind: Some(LookupKind::Catalog),
            ..Default::default()
        },
    );
    config.catalog.endpoint = Some(url);

    let summary = completed(
        Extractor::from_config(&config)
            .unwrap()
            .run(&evidence, "CASE-48")
            .unwrap(),
    );

    let error = summary.lookup_error.expect("catalog without a mapping degrades");
    assert!(error.contains("bundle id"), "error: {error}");
    assert_eq!(summary.unresolved.len(), 2);

    let rows = read_report(&summary.output);
    assert!(rows
        .iter()
        .all(|row| row[2].starts_with("Unknown App (Bundle ID: Unknown Bundle ID")));
}

#[test]
fn test_json_report() {
    let dir = TempDir::new().unwrap();
    let evidence = create_evidence(dir.path());
    let mut config = config_with(dir.path(), LookupConfig::default());
    config.report.format = usagetrail_core::config::ReportFormat::Json;

    let summary = completed(
        Extractor::from_config(&config)
            .unwrap()
            .run(&evidence, "CASE-45")
            .unwrap(),
    );
    assert_eq!(summary.output.extension().unwrap(), "json");

    let value: serde_json::Value =
        serde_json::from_str(&std::fs::read_to_string(&summary.output).unwrap()).unwrap();
    assert_eq!(value.as_array().unwrap().len(), 4);
    assert_eq!(value[3]["Foreground"], "App moved to background");
}

#[test]
fn test_wrong_database_is_skipped() {
    let dir = TempDir::new().unwrap();
    let other = dir.path().join("Photos.sqlite");
    Connection::open(&other)
        .unwrap()
        .execute_batch("CREATE TABLE ZASSET (Z_PK INTEGER PRIMARY KEY);")
        .unwrap();

    let config = config_with(dir.path(), LookupConfig::default());
    let outcome = Extractor::from_config(&config)
        .unwrap()
        .run(&other, "CASE-46")
        .unwrap();

    assert!(matches!(outcome, RunOutcome::Skipped { .. }));
}
