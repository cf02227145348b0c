//! Error types for usagetrail-core

use std::path::PathBuf;
use thiserror::Error;

/// Main error type for the usagetrail-core library
#[derive(Error, Debug)]
pub enum Error {
    /// Database error
    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// CSV report error
    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    /// Configuration error
    #[error("configuration error: {0}")]
    Config(String),

    /// The event table is absent from the forensic database
    #[error("table {table} not found in {}", path.display())]
    SourceNotFound { table: String, path: PathBuf },

    /// An identity lookup backend could not be used
    #[error("lookup backend unavailable: {0}")]
    Lookup(String),

    /// Remote catalog error
    #[error("catalog error: {0}")]
    Catalog(String),
}

impl Error {
    /// Whether this error ends extraction for one database without failing the run.
    pub fn is_skippable(&self) -> bool {
        matches!(self, Error::SourceNotFound { .. })
    }
}

/// Result type alias for usagetrail-core
pub type Result<T> = std::result::Result<T, Error>;
