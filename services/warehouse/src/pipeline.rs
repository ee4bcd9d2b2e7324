//! Pipeline entry point - input -> clean -> dimensions -> facts -> store -> exports
//!
//! Stages run strictly in sequence, each consuming the previous stage's
//! output. Bad rows never fail the run; input, store and export errors do.

use crate::cleaner::{clean_records, CleaningStats};
use crate::config::Config;
use crate::dimensions::{DimensionCounts, Dimensions};
use crate::export::export_tables;
use crate::input::read_input;
use crate::loader::{LoadReport, Warehouse};
use crate::resolver::{resolve_facts, FactRow, UnresolvedCounts};
use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::Serialize;
use std::path::PathBuf;
use tracing::Instrument;
use uuid::Uuid;

/// Everything an operator needs to judge a run
#[derive(Debug, Clone, Serialize)]
pub struct RunSummary {
    pub run_id: Uuid,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub input_path: PathBuf,
    pub input_hash: String,
    pub dry_run: bool,
    pub raw_rows: usize,
    pub unreadable_rows: usize,
    pub cleaning: CleaningStats,
    pub dimensions: DimensionCounts,
    pub fact_rows: usize,
    pub return_rows: usize,
    pub sale_rows: usize,
    /// Absent when the sum leaves the decimal range
    pub total_revenue: Option<Decimal>,
    pub unresolved: UnresolvedCounts,
    /// Counts read back from the store; absent on dry runs
    pub load: Option<LoadReport>,
    pub exports: Vec<PathBuf>,
}

/// Run the whole build against the store named in `config`
pub async fn run(config: &Config) -> Result<RunSummary> {
    let run_id = Uuid::new_v4();
    let span = tracing::info_span!("warehouse_run", %run_id);
    run_inner(config, run_id).instrument(span).await
}

async fn run_inner(config: &Config, run_id: Uuid) -> Result<RunSummary> {
    let started_at = Utc::now();
    tracing::info!(
        input = %config.input_path.display(),
        mode = if config.dry_run { "dry-run" } else { "live" },
        "starting warehouse build"
    );

    let raw = read_input(
        &config.input_path,
        config.input_encoding.as_deref(),
        config.sheet.as_deref(),
    )
    .with_context(|| format!("Failed to load input {}", config.input_path.display()))?;
    let raw_rows = raw.records.len();
    tracing::info!(rows = raw_rows, unreadable = raw.unreadable, "loaded raw records");

    let cleaned = clean_records(raw.records);
    let dims = Dimensions::build(&cleaned.records);
    let resolution = resolve_facts(cleaned.records, &dims);

    let facts = &resolution.facts;
    let return_rows = facts.iter().filter(|f| f.is_return).count();
    let total_revenue = revenue_total(facts);
    if total_revenue.is_none() {
        tracing::warn!(
            fact_rows = facts.len(),
            "total revenue exceeds the decimal range, reporting it as unavailable"
        );
    }

    let mut summary = RunSummary {
        run_id,
        started_at,
        finished_at: started_at,
        input_path: config.input_path.clone(),
        input_hash: raw.content_hash,
        dry_run: config.dry_run,
        raw_rows,
        unreadable_rows: raw.unreadable,
        cleaning: cleaned.stats,
        dimensions: dims.counts(),
        fact_rows: facts.len(),
        return_rows,
        sale_rows: facts.len() - return_rows,
        total_revenue,
        unresolved: resolution.unresolved,
        load: None,
        exports: Vec::new(),
    };

    if config.dry_run {
        tracing::info!("dry run - nothing written to the warehouse");
    } else {
        let warehouse = Warehouse::connect(&config.database_url)
            .await
            .with_context(|| format!("Failed to open warehouse {}", config.database_url))?;

        warehouse
            .rebuild(&dims, facts)
            .await
            .context("Failed to rebuild warehouse")?;

        let report = warehouse.load_report().await.context("Failed to read back load counts")?;
        tracing::info!(
            fact_rows = report.fact_rows,
            return_rows = report.return_rows,
            sale_rows = report.sale_rows,
            "warehouse loaded"
        );
        summary.load = Some(report);

        if config.export {
            summary.exports = export_tables(&warehouse, &config.export_dir)
                .await
                .with_context(|| format!("Failed to export tables to {}", config.export_dir.display()))?;
        }
        warehouse.close().await;
    }

    summary.finished_at = Utc::now();
    log_summary(&summary);
    Ok(summary)
}

/// Exact revenue across all facts; `None` on overflow
fn revenue_total(facts: &[FactRow]) -> Option<Decimal> {
    facts
        .iter()
        .try_fold(Decimal::ZERO, |acc, fact| acc.checked_add(fact.revenue))
}

fn log_summary(summary: &RunSummary) {
    tracing::info!(
        raw_rows = summary.raw_rows,
        dropped = summary.cleaning.dropped(),
        fact_rows = summary.fact_rows,
        return_rows = summary.return_rows,
        sale_rows = summary.sale_rows,
        total_revenue = ?summary.total_revenue,
        customers = summary.dimensions.customers,
        products = summary.dimensions.products,
        countries = summary.dimensions.countries,
        dates = summary.dimensions.dates,
        "build complete"
    );
    if summary.unresolved.total() > 0 {
        tracing::warn!(
            date = summary.unresolved.date,
            customer = summary.unresolved.customer,
            product = summary.unresolved.product,
            country = summary.unresolved.country,
            "fact rows loaded with missing dimension keys"
        );
    }
}
