//! # usagetrail-core
//!
//! Core library for usagetrail - an app usage timeline extractor for iOS
//! forensic databases.
//!
//! This library provides:
//! - A reader for the `ZAMDAPPEVENT` table that copes with WAL-mode evidence
//! - Identity resolution from a mapping file, a companion database or a remote catalog
//! - Timeline reconstruction and CSV/JSON report output
//! - Configuration management
//! - Logging infrastructure
//!
//! ## Example
//!
//! ```rust,no_run
//! use std::path::Path;
//! use usagetrail_core::{Config, Extractor, RunOutcome};
//!
//! let config = Config::load().expect("failed to load config");
//! let extractor = Extractor::from_config(&config).expect("invalid lookup configuration");
//!
//! match extractor.run(Path::new("StoreUser.db"), "CASE-1").expect("extraction failed") {
//!     RunOutcome::Completed(summary) => println!("wrote {}", summary.output.display()),
//!     RunOutcome::Skipped { reason, .. } => println!("skipped: {}", reason),
//! }
//! ```

// Re-export commonly used items at the crate root
pub use config::Config;
pub use error::{Error, Result};
pub use pipeline::{Extractor, RunOutcome, RunSummary};
pub use reader::{EventReader, ReadResult};
pub use report::ReportWriter;
pub use resolve::{IdentityMap, IdentityResolver, IdentitySource, Resolution};
pub use types::*;

// Public modules
pub mod config;
pub mod error;
pub mod logging;
pub mod pipeline;
pub mod reader;
pub mod report;
pub mod resolve;
pub mod timeline;
pub mod types;
