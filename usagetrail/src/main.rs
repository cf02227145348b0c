//! usagetrail - build an app usage timeline from an iOS forensic database
//!
//! Reads the `ZAMDAPPEVENT` table, resolves App Store identifiers to app
//! names and writes a Timestamp / Foreground / Details report.
//!
//! Uses XDG Base Directory specification for file locations:
//! - Logs: $XDG_STATE_HOME/usagetrail/usagetrail.log (~/.local/state/usagetrail/usagetrail.log)
//! - Config: $XDG_CONFIG_HOME/usagetrail/config.toml (~/.config/usagetrail/config.toml)

mod case_prompt;

use anyhow::{Context, Result};
use clap::{ArgAction, Parser};
use std::path::PathBuf;
use usagetrail_core::config::{LookupKind, ReportFormat};
use usagetrail_core::{Config, Extractor, RunOutcome, RunSummary};

#[derive(Parser)]
#[command(name = "usagetrail")]
#[command(about = "Build an app usage timeline from an iOS ZAMDAPPEVENT database")]
#[command(version)]
struct Args {
    /// Forensic database containing the ZAMDAPPEVENT table
    database: PathBuf,

    /// Lookup source: a `bundle_id,adam_id,name` file or a companion database.
    /// With `--lookup-kind catalog` it maps AdamIDs to the bundle ids sent to the catalog.
    lookup: Option<PathBuf>,

    /// Lookup backend (file, store_db, catalog); inferred when omitted
    #[arg(long, value_name = "KIND")]
    lookup_kind: Option<LookupKind>,

    /// Catalog endpoint for bundle id lookups
    #[arg(long, value_name = "URL")]
    catalog_url: Option<String>,

    /// Case number prefixed to the report name; prompted for when omitted
    #[arg(long)]
    case: Option<String>,

    /// Directory for the report (defaults to the database's directory)
    #[arg(short, long, value_name = "DIR")]
    output_dir: Option<PathBuf>,

    /// Report format (csv, json)
    #[arg(long)]
    format: Option<ReportFormat>,

    /// Keep the working copy made when the database cannot be checkpointed in place
    #[arg(long)]
    keep_working_copy: bool,

    /// Always read from a working copy, never opening the evidence for writing
    #[arg(long)]
    always_copy: bool,

    /// Verbose output (-v unresolved ids and skipped rows, -vv debug logging)
    #[arg(short, long, action = ArgAction::Count)]
    verbose: u8,
}

impl Args {
    /// Fold command-line flags over the loaded configuration.
    fn apply(&self, config: &mut Config) {
        if let Some(path) = &self.lookup {
            config.lookup.path = Some(path.clone());
            config.lookup.kind = None;
        }
        if let Some(kind) = self.lookup_kind {
            config.lookup.kind = Some(kind);
        }
        if let Some(url) = &self.catalog_url {
            config.catalog.endpoint = Some(url.clone());
        }
        if let Some(dir) = &self.output_dir {
            config.report.output_dir = Some(dir.clone());
        }
        if let Some(format) = self.format {
            config.report.format = format;
        }
        if self.keep_working_copy {
            config.reader.keep_working_copy = true;
        }
        if self.always_copy {
            config.reader.always_copy = true;
        }
        if self.verbose >= 2 {
            config.logging.level = "debug".to_string();
        }
    }
}

fn main() -> Result<()> {
    let args = Args::parse();

    // Load configuration
    let mut config = Config::load().context("failed to load configuration")?;
    args.apply(&mut config);

    // Initialize logging
    let _log_guard =
        usagetrail_core::logging::init(&config.logging).context("failed to initialize logging")?;

    tracing::info!(database = %args.database.display(), "usagetrail starting");

    let extractor = Extractor::from_config(&config).context("invalid lookup configuration")?;

    let case_id = match &args.case {
        Some(case) => case.trim().to_string(),
        None => case_prompt::prompt_case_id().context("failed to read case number")?,
    };

    println!("Database: {}", args.database.display());

    let outcome = extractor
        .run(&args.database, &case_id)
        .with_context(|| format!("failed to extract {}", args.database.display()))?;

    match outcome {
        RunOutcome::Completed(summary) => print_summary(&summary, args.verbose),
        RunOutcome::Skipped { reason, .. } => {
            println!("Skipped: {}", reason);
            println!("Check that the correct database was supplied.");
        }
    }

    tracing::info!("usagetrail finished");
    Ok(())
}

fn print_summary(summary: &RunSummary, verbose: u8) {
    println!("Journal mode: {}", summary.journal_mode);
    match &summary.working_copy {
        Some(copy) => println!("Working copy kept: {}", copy.display()),
        None if summary.copied => println!("Read from a temporary working copy (removed)"),
        None => {}
    }

    match (&summary.lookup, &summary.lookup_error) {
        (None, _) => println!("Lookup: none configured"),
        (Some(kind), None) => println!("Lookup: {}", kind),
        (Some(kind), Some(error)) => println!("Lookup: {} unavailable ({})", kind, error),
    }

    println!();
    println!("Extraction complete:");
    println!("  Events: {}", summary.events);
    println!("  Timeline entries: {}", summary.entries);
    println!(
        "  Apps: {} ({} unresolved)",
        summary.identifiers,
        summary.unresolved.len()
    );
    if !summary.warnings.is_empty() {
        println!("  Rows skipped: {}", summary.warnings.len());
    }

    if verbose > 0 {
        for id in &summary.unresolved {
            println!("    unresolved: {}", id);
        }
        for warning in &summary.warnings {
            println!("    {}", warning);
        }
    }

    println!();
    println!("Report: {}", summary.output.display());
}
