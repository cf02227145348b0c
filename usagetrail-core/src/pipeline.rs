//! Extraction pipeline
//!
//! ```text
//! ┌──────────────┐  events   ┌──────────────────┐ identities ┌──────────┐ entries ┌──────────────┐
//! │ EventReader  │ ────────► │ IdentityResolver │ ─────────► │ timeline │ ──────► │ ReportWriter │
//! └──────────────┘  ids      └──────────────────┘            └──────────┘         └──────────────┘
//! ```
//!
//! The database connection is closed before identities are resolved. A
//! missing event table skips the database; any other reader or writer error
//! aborts the run.

use crate::config::{Config, LookupKind};
use crate::error::Result;
use crate::reader::EventReader;
use crate::report::ReportWriter;
use crate::resolve::IdentityResolver;
use crate::timeline;
use std::path::{Path, PathBuf};

/// Summary of a completed extraction.
#[derive(Debug, Default)]
pub struct RunSummary {
    /// Forensic database that was read
    pub database: PathBuf,
    /// Report file written
    pub output: PathBuf,
    /// Journal mode of the database
    pub journal_mode: String,
    /// Rows were read from a working copy instead of the original
    pub copied: bool,
    /// Working copy still on disk, set only when it was kept
    pub working_copy: Option<PathBuf>,
    /// Usage events read
    pub events: usize,
    /// Timeline entries written
    pub entries: usize,
    /// Distinct identifiers seen
    pub identifiers: usize,
    /// Identifiers that resolved to the unknown sentinel
    pub unresolved: Vec<String>,
    /// Lookup backend used
    pub lookup: Option<LookupKind>,
    /// Backend failure, when enrichment degraded to unknown identities
    pub lookup_error: Option<String>,
    /// Rows skipped while reading
    pub warnings: Vec<String>,
}

/// Result of running the pipeline on one database.
#[derive(Debug)]
pub enum RunOutcome {
    /// Report written
    Completed(RunSummary),
    /// Event table missing; nothing written
    Skipped { database: PathBuf, reason: String },
}

/// Runs read → resolve → build → write for forensic databases.
pub struct Extractor {
    reader: EventReader,
    resolver: IdentityResolver,
    writer: ReportWriter,
}

impl Extractor {
    pub fn new(reader: EventReader, resolver: IdentityResolver, writer: ReportWriter) -> Self {
        Self {
            reader,
            resolver,
            writer,
        }
    }

    /// Build every stage from configuration.
    pub fn from_config(config: &Config) -> Result<Self> {
        Ok(Self::new(
            EventReader::new(config.reader.clone()),
            IdentityResolver::from_config(config)?,
            ReportWriter::new(&config.report),
        ))
    }

    /// Extract the timeline from `database` and write the report.
    pub fn run(&self, database: &Path, case_id: &str) -> Result<RunOutcome> {
        let read = match self.reader.read(database) {
            Ok(read) => read,
            Err(e) if e.is_skippable() => {
                tracing::warn!(database = %database.display(), error = %e, "Skipping database");
                return Ok(RunOutcome::Skipped {
                    database: database.to_path_buf(),
                    reason: e.to_string(),
                });
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to read forensic database");
                return Err(e);
            }
        };

        let identifiers = read.identifiers();
        let resolution = self.resolver.resolve(&identifiers);
        let unresolved = resolution.identities.unresolved(&identifiers);

        let entries = timeline::build(&read.events, &resolution.identities);

        let output = self.writer.output_path(database, case_id);
        if let Err(e) = self.writer.write(&entries, &output) {
            tracing::error!(error = %e, path = %output.display(), "Failed to write report");
            return Err(e);
        }

        tracing::info!(
            database = %database.display(),
            events = read.events.len(),
            entries = entries.len(),
            unresolved = unresolved.len(),
            "Extraction complete"
        );

        Ok(RunOutcome::Completed(RunSummary {
            database: database.to_path_buf(),
            output,
            journal_mode: read.journal_mode,
            copied: read.copied,
            working_copy: read.working_copy,
            events: read.events.len(),
            entries: entries.len(),
            identifiers: identifiers.len(),
            unresolved,
            lookup: resolution.kind,
            lookup_error: resolution.error,
            warnings: read.warnings,
        }))
    }
}
