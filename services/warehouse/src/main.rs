//! Warehouse Service - Builds the retail sales star schema
//!
//! Responsibilities:
//! - Read the raw invoice-line export (CSV or Excel)
//! - Clean rows, dropping invalid ones with per-rule counts
//! - Build customer/product/country/date dimensions with surrogate keys
//! - Resolve fact rows and rebuild the SQLite warehouse from scratch
//! - Export every table as CSV
//!
//! Usage:
//!   cargo run --bin warehouse -- --input data/online_retail_II.csv
//!   cargo run --bin warehouse -- --input data/online_retail_II.xlsx --dry-run

use anyhow::{Context, Result};
use clap::Parser;
use std::path::PathBuf;
use warehouse::logging::{init_logging, LogConfig, LogFormat};
use warehouse::Config;

#[derive(Parser, Debug)]
#[command(name = "warehouse", about = "Builds the retail sales star schema")]
struct Args {
    /// Raw export to load (CSV, XLSX, XLS, ODS)
    #[arg(long)]
    input: Option<PathBuf>,

    /// SQLite database URL, e.g. sqlite://online_retail.db
    #[arg(long)]
    database: Option<String>,

    /// Directory for the per-table CSV exports
    #[arg(long)]
    export_dir: Option<PathBuf>,

    /// Text encoding of a CSV input (auto-detected when omitted)
    #[arg(long)]
    encoding: Option<String>,

    /// Only read this workbook sheet
    #[arg(long)]
    sheet: Option<String>,

    /// Dry run - clean and resolve, but don't write the warehouse
    #[arg(long, default_value = "false")]
    dry_run: bool,

    /// Skip the CSV export
    #[arg(long, default_value = "false")]
    no_export: bool,

    /// Write the run summary as JSON to this path
    #[arg(long)]
    summary: Option<PathBuf>,

    #[arg(long, value_enum, default_value = "pretty")]
    log_format: LogFormat,

    /// More output (-v debug, -vv trace)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,
}

impl Args {
    fn apply(self, mut config: Config) -> Config {
        if let Some(input) = self.input {
            config.input_path = input;
        }
        if let Some(database) = self.database {
            config.database_url = database;
        }
        if let Some(dir) = self.export_dir {
            config.export_dir = dir;
        }
        if self.encoding.is_some() {
            config.input_encoding = self.encoding;
        }
        if self.sheet.is_some() {
            config.sheet = self.sheet;
        }
        config.dry_run |= self.dry_run;
        config.export = !self.no_export;
        config
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    let args = Args::parse();
    init_logging(&LogConfig::from_verbosity(args.verbose).with_format(args.log_format));

    let summary_path = args.summary.clone();
    let config = args.apply(Config::from_env()?);

    let summary = warehouse::run(&config).await?;

    if let Some(path) = summary_path {
        let json = serde_json::to_string_pretty(&summary).context("Failed to serialize run summary")?;
        std::fs::write(&path, json)
            .with_context(|| format!("Failed to write run summary to {}", path.display()))?;
        tracing::info!(path = %path.display(), "wrote run summary");
    }

    if !config.dry_run {
        tracing::info!(database = %config.database_url, "warehouse ready");
    }
    Ok(())
}
