//! Report output
//!
//! Writes timeline entries as `Timestamp, Foreground, Details` rows. Output is
//! written next to the final path and renamed into place, so a failed run never
//! leaves a report that looks complete.

use crate::config::{ReportConfig, ReportFormat};
use crate::error::Result;
use crate::types::TimelineEntry;
use serde::Serialize;
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

/// Column headers, in order.
pub const HEADERS: [&str; 3] = ["Timestamp", "Foreground", "Details"];

/// One serialized report row.
#[derive(Debug, Serialize)]
struct ReportRow<'a> {
    #[serde(rename = "Timestamp")]
    timestamp: String,
    #[serde(rename = "Foreground")]
    foreground: &'static str,
    #[serde(rename = "Details")]
    details: &'a str,
}

impl<'a> From<&'a TimelineEntry> for ReportRow<'a> {
    fn from(entry: &'a TimelineEntry) -> Self {
        Self {
            timestamp: entry.timestamp_display(),
            foreground: entry.phase.label(),
            details: &entry.details,
        }
    }
}

/// Serializes timelines to disk.
#[derive(Debug, Clone, Default)]
pub struct ReportWriter {
    format: ReportFormat,
    output_dir: Option<PathBuf>,
}

impl ReportWriter {
    pub fn new(config: &ReportConfig) -> Self {
        Self {
            format: config.format,
            output_dir: config.output_dir.clone(),
        }
    }

    /// `{case}-{database file name}-parsed.{ext}` in the output directory,
    /// or beside the database when none is configured.
    pub fn output_path(&self, database: &Path, case_id: &str) -> PathBuf {
        let dir = match &self.output_dir {
            Some(dir) => dir.clone(),
            None => database
                .parent()
                .filter(|p| !p.as_os_str().is_empty())
                .map(Path::to_path_buf)
                .unwrap_or_else(|| PathBuf::from(".")),
        };

        let db_name = database
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "database".to_string());
        let case_id = sanitize_case_id(case_id);

        let file_name = if case_id.is_empty() {
            format!("{}-parsed.{}", db_name, self.format.extension())
        } else {
            format!("{}-{}-parsed.{}", case_id, db_name, self.format.extension())
        };

        dir.join(file_name)
    }

    /// Write `entries` to `path`, replacing any existing file.
    pub fn write(&self, entries: &[TimelineEntry], path: &Path) -> Result<()> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }

        let mut partial = path.as_os_str().to_os_string();
        partial.push(".partial");
        let partial = PathBuf::from(partial);

        let written = match self.format {
            ReportFormat::Csv => write_csv(entries, &partial),
            ReportFormat::Json => write_json(entries, &partial),
        };

        if let Err(e) = written {
            let _ = std::fs::remove_file(&partial);
            return Err(e);
        }

        std::fs::rename(&partial, path)?;
        tracing::info!(
            path = %path.display(),
            rows = entries.len(),
            format = self.format.extension(),
            "Report written"
        );
        Ok(())
    }
}

fn write_csv(entries: &[TimelineEntry], path: &Path) -> Result<()> {
    // Header written explicitly so empty timelines still get one.
    let mut writer = csv::WriterBuilder::new()
        .has_headers(false)
        .from_path(path)?;
    writer.write_record(HEADERS)?;
    for entry in entries {
        writer.serialize(ReportRow::from(entry))?;
    }
    writer.flush()?;
    Ok(())
}

fn write_json(entries: &[TimelineEntry], path: &Path) -> Result<()> {
    let rows: Vec<ReportRow<'_>> = entries.iter().map(ReportRow::from).collect();
    let mut out = BufWriter::new(File::create(path)?);
    serde_json::to_writer_pretty(&mut out, &rows)?;
    out.flush()?;
    Ok(())
}

/// Keep case ids usable as a file name prefix.
fn sanitize_case_id(case_id: &str) -> String {
    case_id
        .trim()
        .chars()
        .map(|c| match c {
            '/' | '\\' | ':' | '\0' => '_',
            c => c,
        })
        .collect()
}
