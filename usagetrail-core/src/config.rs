//! Configuration loading and management
//!
//! Configuration is loaded from `~/.config/usagetrail/config.toml`
//!
//! This module follows the XDG Base Directory Specification:
//! - Config: `$XDG_CONFIG_HOME/usagetrail/` (~/.config/usagetrail/)
//! - State/Logs: `$XDG_STATE_HOME/usagetrail/` (~/.local/state/usagetrail/)
//!
//! Every section is optional. Command-line flags override what is loaded here.

use crate::error::{Error, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};

/// Returns a best-effort home directory path.
fn home_dir() -> PathBuf {
    std::env::var_os("HOME")
        .map(PathBuf::from)
        .or_else(dirs::home_dir)
        .unwrap_or_else(|| PathBuf::from("."))
}

/// Returns XDG_CONFIG_HOME or ~/.config
fn xdg_config_home() -> PathBuf {
    std::env::var("XDG_CONFIG_HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| home_dir().join(".config"))
}

/// Returns XDG_STATE_HOME or ~/.local/state
fn xdg_state_home() -> PathBuf {
    std::env::var("XDG_STATE_HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| home_dir().join(".local/state"))
}

/// Main configuration struct
#[derive(Debug, Deserialize, Default, Clone)]
pub struct Config {
    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,

    /// Identity lookup source
    #[serde(default)]
    pub lookup: LookupConfig,

    /// Remote catalog settings (used when the lookup kind is `catalog`)
    #[serde(default)]
    pub catalog: CatalogConfig,

    /// Forensic database reader settings
    #[serde(default)]
    pub reader: ReaderConfig,

    /// Report output settings
    #[serde(default)]
    pub report: ReportConfig,
}

/// Logging configuration
#[derive(Debug, Deserialize, Clone)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Maximum number of log files to keep
    #[serde(default = "default_max_log_files")]
    pub max_files: usize,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            max_files: default_max_log_files(),
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_max_log_files() -> usize {
    5
}

/// Which backend resolves identifiers to app identities
#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum LookupKind {
    /// `bundle_id,identifier,display_name` text file
    File,
    /// Companion SQLite database with store item metadata
    StoreDb,
    /// Remote bundle id catalog
    Catalog,
}

impl LookupKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            LookupKind::File => "file",
            LookupKind::StoreDb => "store_db",
            LookupKind::Catalog => "catalog",
        }
    }
}

impl std::fmt::Display for LookupKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for LookupKind {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "file" => Ok(LookupKind::File),
            "store_db" | "store-db" => Ok(LookupKind::StoreDb),
            "catalog" => Ok(LookupKind::Catalog),
            _ => Err(format!("unknown lookup kind: {}", s)),
        }
    }
}

/// Identity lookup configuration
#[derive(Debug, Deserialize, Clone)]
pub struct LookupConfig {
    /// Explicit backend; inferred from `path` / `catalog.endpoint` when unset
    #[serde(default)]
    pub kind: Option<LookupKind>,

    /// Mapping file or companion database path. With the catalog backend it
    /// supplies the AdamID to bundle id translation.
    #[serde(default)]
    pub path: Option<PathBuf>,

    /// Table holding `(store_item_id, title, bundle_id)` in the companion database
    #[serde(default = "default_store_table")]
    pub store_table: String,
}

impl Default for LookupConfig {
    fn default() -> Self {
        Self {
            kind: None,
            path: None,
            store_table: default_store_table(),
        }
    }
}

fn default_store_table() -> String {
    "store_items".to_string()
}

impl LookupConfig {
    /// Backend to use, if any source is configured.
    ///
    /// An explicit `kind` wins. Otherwise a path with a SQLite extension selects
    /// the companion database, any other path selects the mapping file, and a
    /// configured catalog endpoint is used only when no path is given.
    pub fn effective_kind(&self, catalog: &CatalogConfig) -> Option<LookupKind> {
        if let Some(kind) = self.kind {
            return Some(kind);
        }

        match self.local_kind() {
            Some(kind) => Some(kind),
            None if catalog.endpoint.is_some() => Some(LookupKind::Catalog),
            None => None,
        }
    }

    /// Local backend `path` points at, judged by its extension.
    pub fn local_kind(&self) -> Option<LookupKind> {
        match &self.path {
            Some(path) if is_sqlite_path(path) => Some(LookupKind::StoreDb),
            Some(_) => Some(LookupKind::File),
            None => None,
        }
    }
}

fn is_sqlite_path(path: &Path) -> bool {
    matches!(
        path.extension().and_then(|e| e.to_str()),
        Some("db" | "sqlite" | "sqlite3" | "sqlitedb")
    )
}

/// Remote catalog configuration
#[derive(Debug, Deserialize, Clone)]
pub struct CatalogConfig {
    /// Lookup endpoint; receives a POST with the bundle ids to resolve
    pub endpoint: Option<String>,

    /// Bearer token (optional)
    pub api_key: Option<String>,

    /// HTTP request timeout in seconds
    #[serde(default = "default_catalog_timeout")]
    pub timeout_secs: u64,
}

impl Default for CatalogConfig {
    fn default() -> Self {
        Self {
            endpoint: None,
            api_key: None,
            timeout_secs: default_catalog_timeout(),
        }
    }
}

fn default_catalog_timeout() -> u64 {
    30
}

impl CatalogConfig {
    /// Validate configuration, returning error message if invalid
    pub fn validate(&self) -> Result<()> {
        match self.endpoint.as_deref() {
            None => Err(Error::Config(
                "catalog.endpoint is required for catalog lookups".to_string(),
            )),
            Some(url) if !(url.starts_with("http://") || url.starts_with("https://")) => Err(
                Error::Config(format!("catalog.endpoint must be an http(s) URL: {}", url)),
            ),
            Some(_) if self.timeout_secs == 0 => Err(Error::Config(
                "catalog.timeout_secs must be greater than zero".to_string(),
            )),
            Some(_) => Ok(()),
        }
    }
}

/// Forensic database reader configuration
#[derive(Debug, Deserialize, Clone)]
pub struct ReaderConfig {
    /// Event table name (matched case-insensitively)
    #[serde(default = "default_event_table")]
    pub table: String,

    /// Where working copies are created when the evidence cannot be
    /// checkpointed in place. Defaults to a fresh temporary directory.
    #[serde(default)]
    pub working_dir: Option<PathBuf>,

    /// Keep the working copy after extraction instead of removing it
    #[serde(default)]
    pub keep_working_copy: bool,

    /// Always read from a working copy, even when the evidence is writable
    #[serde(default)]
    pub always_copy: bool,
}

impl Default for ReaderConfig {
    fn default() -> Self {
        Self {
            table: default_event_table(),
            working_dir: None,
            keep_working_copy: false,
            always_copy: false,
        }
    }
}

fn default_event_table() -> String {
    "ZAMDAPPEVENT".to_string()
}

/// Report output format
#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum ReportFormat {
    #[default]
    Csv,
    Json,
}

impl ReportFormat {
    pub fn extension(&self) -> &'static str {
        match self {
            ReportFormat::Csv => "csv",
            ReportFormat::Json => "json",
        }
    }
}

impl std::str::FromStr for ReportFormat {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "csv" => Ok(ReportFormat::Csv),
            "json" => Ok(ReportFormat::Json),
            _ => Err(format!("unknown report format: {}", s)),
        }
    }
}

/// Report configuration
#[derive(Debug, Deserialize, Clone, Default)]
pub struct ReportConfig {
    /// Output format
    #[serde(default)]
    pub format: ReportFormat,

    /// Output directory; defaults to the directory of the forensic database
    #[serde(default)]
    pub output_dir: Option<PathBuf>,
}

impl Config {
    /// Load configuration from the default path
    pub fn load() -> Result<Self> {
        let config_path = Self::config_path();

        if !config_path.exists() {
            tracing::info!("No config file found at {:?}, using defaults", config_path);
            return Ok(Config::default());
        }

        Self::load_from(&config_path)
    }

    /// Load configuration from a specific path
    pub fn load_from(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| Error::Config(format!("failed to read config file {:?}: {}", path, e)))?;

        let config: Config = toml::from_str(&content)
            .map_err(|e| Error::Config(format!("failed to parse config: {}", e)))?;

        Ok(config)
    }

    /// Returns the default config file path
    ///
    /// `$XDG_CONFIG_HOME/usagetrail/config.toml` (~/.config/usagetrail/config.toml)
    pub fn config_path() -> PathBuf {
        xdg_config_home().join("usagetrail").join("config.toml")
    }

    /// Returns the state directory path (for logs)
    ///
    /// `$XDG_STATE_HOME/usagetrail/` (~/.local/state/usagetrail/)
    pub fn state_dir() -> PathBuf {
        xdg_state_home().join("usagetrail")
    }

    /// Returns the log file path
    pub fn log_path() -> PathBuf {
        Self::state_dir().join("usagetrail.log")
    }
}
