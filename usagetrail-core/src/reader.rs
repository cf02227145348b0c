//! Forensic event reader
//!
//! Reads the app event table (`ZAMDAPPEVENT`) out of an iOS store database.
//!
//! ## WAL handling
//!
//! Evidence databases are usually acquired in WAL mode with a `-wal` sidecar
//! holding committed pages that were never merged. Before querying, the reader
//! applies a passive checkpoint so those rows are visible. When that cannot be
//! done in place (read-only media, locked file), it copies the database and its
//! sidecar into a working directory and checkpoints the copy instead. The
//! original file is never modified through the fallback path.
//!
//! ```text
//!  evidence.db ──open──► journal_mode? ──wal──► wal_checkpoint(PASSIVE)
//!       │                                            │ fails
//!       │                                            ▼
//!       └────────────── copy db + -wal ──► working copy ──► checkpoint
//! ```

use crate::config::{Config, ReaderConfig};
use crate::error::{Error, Result};
use crate::types::{CellValue, UsageEvent};
use rusqlite::{Connection, OpenFlags};
use std::collections::BTreeSet;
use std::path::{Path, PathBuf};

/// Columns read from the event table, in row order.
const EVENT_COLUMNS: &str =
    "ZADAMID, ZTIME, ZFOREGROUNDDURATION, ZEVENTSUBTYPE, ZTYPE, ZAPPVERSION";

/// Outcome of `PRAGMA wal_checkpoint(PASSIVE)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CheckpointOutcome {
    /// Another connection prevented a complete checkpoint
    pub busy: bool,
    /// Frames in the WAL
    pub log_frames: i64,
    /// Frames moved into the database file
    pub checkpointed_frames: i64,
}

/// Everything read from one forensic database.
#[derive(Debug, Default)]
pub struct ReadResult {
    /// Usage events in source row order
    pub events: Vec<UsageEvent>,
    /// Journal mode reported by the database (`wal`, `delete`, ...)
    pub journal_mode: String,
    /// All tables found in the database
    pub tables: Vec<String>,
    /// Event table name as stored in the schema
    pub table: String,
    /// Checkpoint applied before reading, if any
    pub checkpoint: Option<CheckpointOutcome>,
    /// Rows came from a working copy rather than the original
    pub copied: bool,
    /// Working copy left on disk; `None` once a temporary copy is removed
    pub working_copy: Option<PathBuf>,
    /// Rows skipped while reading (non-fatal)
    pub warnings: Vec<String>,
}

impl ReadResult {
    /// Distinct identifiers referenced by the events.
    pub fn identifiers(&self) -> BTreeSet<String> {
        self.events.iter().map(|e| e.identifier.clone()).collect()
    }

    pub fn used_working_copy(&self) -> bool {
        self.copied
    }
}

/// A connection plus what was learned while preparing it.
struct PreparedDb {
    conn: Connection,
    journal_mode: String,
    checkpoint: Option<CheckpointOutcome>,
}

/// Reads usage events from forensic databases.
pub struct EventReader {
    config: ReaderConfig,
}

impl EventReader {
    pub fn new(config: ReaderConfig) -> Self {
        Self { config }
    }

    /// Read every row of the event table.
    ///
    /// Returns [`Error::SourceNotFound`] when the event table is missing; the
    /// caller decides whether that ends the run.
    pub fn read(&self, path: &Path) -> Result<ReadResult> {
        if !path.is_file() {
            return Err(Error::Io(std::io::Error::new(
                std::io::ErrorKind::NotFound,
                format!("database not found: {}", path.display()),
            )));
        }

        tracing::info!(path = %path.display(), "Opening forensic database");

        let mut copy = None;
        let prepared = if self.config.always_copy {
            let working = self.make_working_copy(path)?;
            let prepared = prepare_working_copy(&working.db_path)?;
            copy = Some(working);
            prepared
        } else {
            match prepare_in_place(path) {
                Ok(prepared) => prepared,
                Err(e) => {
                    tracing::warn!(
                        path = %path.display(),
                        error = %e,
                        "Unable to checkpoint in place, falling back to a working copy"
                    );
                    let working = self.make_working_copy(path)?;
                    let prepared = prepare_working_copy(&working.db_path)?;
                    copy = Some(working);
                    prepared
                }
            }
        };

        let result = self.extract(prepared, path);

        let copied = copy.is_some();
        let working_copy = match copy {
            Some(working) => working.finish(self.config.keep_working_copy)?,
            None => None,
        };

        let mut result = result?;
        result.copied = copied;
        result.working_copy = working_copy;
        Ok(result)
    }

    /// Check the schema, fetch rows and close the connection.
    fn extract(&self, prepared: PreparedDb, original: &Path) -> Result<ReadResult> {
        let PreparedDb {
            conn,
            journal_mode,
            checkpoint,
        } = prepared;

        let tables = list_tables(&conn)?;
        tracing::debug!(tables = ?tables, "Tables in database");

        let table = match tables
            .iter()
            .find(|t| t.eq_ignore_ascii_case(&self.config.table))
        {
            Some(t) => t.clone(),
            None => {
                tracing::warn!(
                    table = %self.config.table,
                    path = %original.display(),
                    "Event table not found; check that the correct database was supplied"
                );
                close(conn)?;
                return Err(Error::SourceNotFound {
                    table: self.config.table.clone(),
                    path: original.to_path_buf(),
                });
            }
        };

        let (events, warnings) = fetch_events(&conn, &table)?;
        close(conn)?;

        tracing::info!(
            table = %table,
            rows = events.len(),
            skipped = warnings.len(),
            "Fetched usage events"
        );

        Ok(ReadResult {
            events,
            journal_mode,
            tables,
            table,
            checkpoint,
            copied: false,
            working_copy: None,
            warnings,
        })
    }

    /// Copy the database and its WAL sidecar into the working directory.
    fn make_working_copy(&self, path: &Path) -> Result<WorkingCopy> {
        let (dir, temp) = match (&self.config.working_dir, self.config.keep_working_copy) {
            (Some(dir), _) => (dir.clone(), None),
            (None, true) => (Config::state_dir().join("working-copies"), None),
            (None, false) => {
                let temp = tempfile::Builder::new().prefix("usagetrail-").tempdir()?;
                (temp.path().to_path_buf(), Some(temp))
            }
        };
        std::fs::create_dir_all(&dir)?;

        let db_path = dir.join(backup_file_name(path));
        std::fs::copy(path, &db_path)?;

        let wal = wal_path(path);
        let wal_copy = if wal.is_file() {
            let target = wal_path(&db_path);
            std::fs::copy(&wal, &target)?;
            Some(target)
        } else {
            None
        };

        tracing::info!(
            source = %path.display(),
            copy = %db_path.display(),
            with_wal = wal_copy.is_some(),
            "Created working copy"
        );

        Ok(WorkingCopy {
            db_path,
            wal_path: wal_copy,
            temp,
        })
    }
}

/// Working copy of an evidence database.
struct WorkingCopy {
    db_path: PathBuf,
    wal_path: Option<PathBuf>,
    // Removes the directory on drop when no working dir was configured
    temp: Option<tempfile::TempDir>,
}

impl WorkingCopy {
    /// Remove the copy unless asked to keep it. Returns the kept path.
    fn finish(self, keep: bool) -> Result<Option<PathBuf>> {
        if keep {
            return Ok(Some(self.db_path));
        }

        if self.temp.is_none() {
            let sidecars = [
                Some(self.db_path.clone()),
                self.wal_path.clone(),
                Some(shm_path(&self.db_path)),
            ];
            for file in sidecars.into_iter().flatten() {
                if file.exists() {
                    std::fs::remove_file(&file)?;
                }
            }
        }

        tracing::debug!(copy = %self.db_path.display(), "Removed working copy");
        Ok(None)
    }
}

/// Open the evidence itself.
///
/// Without a WAL sidecar there is nothing to merge, so the file is opened
/// read-only. With one, a read-write handle is needed for the checkpoint.
fn prepare_in_place(path: &Path) -> Result<PreparedDb> {
    let has_wal = wal_path(path).is_file();
    let flags = if has_wal {
        OpenFlags::SQLITE_OPEN_READ_WRITE | OpenFlags::SQLITE_OPEN_NO_MUTEX
    } else {
        OpenFlags::SQLITE_OPEN_READ_ONLY | OpenFlags::SQLITE_OPEN_NO_MUTEX
    };

    let conn = Connection::open_with_flags(path, flags)?;
    prepare(conn, has_wal)
}

/// Open a working copy; it is ours to write.
fn prepare_working_copy(path: &Path) -> Result<PreparedDb> {
    let has_wal = wal_path(path).is_file();
    let conn = Connection::open_with_flags(
        path,
        OpenFlags::SQLITE_OPEN_READ_WRITE | OpenFlags::SQLITE_OPEN_NO_MUTEX,
    )?;
    prepare(conn, has_wal)
}

fn prepare(conn: Connection, has_wal: bool) -> Result<PreparedDb> {
    let journal_mode: String =
        conn.pragma_query_value(None, "journal_mode", |row| row.get(0))?;
    let journal_mode = journal_mode.to_lowercase();
    tracing::debug!(journal_mode = %journal_mode, has_wal, "Journal mode");

    let checkpoint = if journal_mode == "wal" && has_wal {
        let outcome = passive_checkpoint(&conn)?;
        if outcome.busy {
            tracing::warn!(
                log_frames = outcome.log_frames,
                checkpointed_frames = outcome.checkpointed_frames,
                "Passive checkpoint could not merge every frame"
            );
        } else {
            tracing::info!(
                checkpointed_frames = outcome.checkpointed_frames,
                "Applied passive WAL checkpoint"
            );
        }
        Some(outcome)
    } else {
        None
    };

    conn.pragma_update(None, "query_only", true)?;

    Ok(PreparedDb {
        conn,
        journal_mode,
        checkpoint,
    })
}

fn passive_checkpoint(conn: &Connection) -> Result<CheckpointOutcome> {
    let outcome = conn.query_row("PRAGMA wal_checkpoint(PASSIVE)", [], |row| {
        Ok(CheckpointOutcome {
            busy: row.get::<_, i64>(0)? != 0,
            log_frames: row.get(1)?,
            checkpointed_frames: row.get(2)?,
        })
    })?;

    // SQLite reports -1 frames when the checkpoint could not run at all.
    if outcome.log_frames < 0 {
        return Err(Error::Database(rusqlite::Error::SqliteFailure(
            rusqlite::ffi::Error::new(rusqlite::ffi::SQLITE_READONLY),
            Some("WAL checkpoint could not be applied".to_string()),
        )));
    }

    Ok(outcome)
}

fn list_tables(conn: &Connection) -> Result<Vec<String>> {
    let mut stmt =
        conn.prepare("SELECT name FROM sqlite_master WHERE type = 'table' ORDER BY name")?;
    let tables = stmt
        .query_map([], |row| row.get::<_, String>(0))?
        .collect::<std::result::Result<Vec<_>, _>>()?;
    Ok(tables)
}

fn fetch_events(conn: &Connection, table: &str) -> Result<(Vec<UsageEvent>, Vec<String>)> {
    let sql = format!(
        "SELECT {} FROM \"{}\"",
        EVENT_COLUMNS,
        table.replace('"', "\"\"")
    );
    let mut stmt = conn.prepare(&sql)?;
    let mut rows = stmt.query([])?;

    let mut events = Vec::new();
    let mut warnings = Vec::new();
    let mut index = 0usize;

    while let Some(row) = rows.next()? {
        index += 1;
        let cells = (0..6)
            .map(|i| row.get::<_, rusqlite::types::Value>(i).map(CellValue::from))
            .collect::<std::result::Result<Vec<_>, _>>()?;

        match event_from_cells(cells) {
            Some(event) => events.push(event),
            None => {
                let msg = format!("row {}: missing or non-numeric ZTIME, skipped", index);
                tracing::warn!("{}", msg);
                warnings.push(msg);
            }
        }
    }

    Ok((events, warnings))
}

fn event_from_cells(cells: Vec<CellValue>) -> Option<UsageEvent> {
    let mut cells = cells.into_iter();
    let identifier = cells.next()?;
    let time = cells.next()?;
    let duration = cells.next()?;
    let event_subtype = cells.next()?;
    let event_type = cells.next()?;
    let app_version = cells.next()?;

    let time_ms = time.as_f64().filter(|t| t.is_finite())?.round() as i64;

    Some(UsageEvent {
        identifier: identifier.to_string().trim().to_string(),
        adam_id: identifier,
        time_ms,
        foreground_duration_s: duration.as_f64().filter(|d| d.is_finite()),
        foreground_duration: duration,
        event_subtype,
        event_type,
        app_version,
    })
}

fn close(conn: Connection) -> Result<()> {
    conn.close().map_err(|(_, e)| Error::Database(e))
}

fn sidecar(path: &Path, suffix: &str) -> PathBuf {
    let mut name = path.as_os_str().to_os_string();
    name.push(suffix);
    PathBuf::from(name)
}

/// `<db>-wal`
pub fn wal_path(path: &Path) -> PathBuf {
    sidecar(path, "-wal")
}

fn shm_path(path: &Path) -> PathBuf {
    sidecar(path, "-shm")
}

/// `StoreUser.db` → `StoreUser_backup.db`
fn backup_file_name(path: &Path) -> String {
    let stem = path
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| "database".to_string());
    match path.extension() {
        Some(ext) => format!("{}_backup.{}", stem, ext.to_string_lossy()),
        None => format!("{}_backup", stem),
    }
}
