//! Export of refresh runs: a JSON report with schema versioning and a CSV
//! with one row per item outcome.

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::path::Path;

use quotebatch_core::{BatchRecord, RunStatistics, Sourced};

use crate::quotes::Quote;

/// Version of the JSON report layout.
pub const SCHEMA_VERSION: u32 = 1;

pub type RefreshRecord = BatchRecord<String, Sourced<Quote>>;

#[derive(Debug, Serialize)]
pub struct RefreshReport<'a> {
    pub schema_version: u32,
    pub run_name: &'a str,
    pub generated_at: DateTime<Utc>,
    pub smart: bool,
    pub statistics: &'a RunStatistics,
    pub batches: &'a [RefreshRecord],
}

impl<'a> RefreshReport<'a> {
    pub fn new(
        run_name: &'a str,
        smart: bool,
        statistics: &'a RunStatistics,
        batches: &'a [RefreshRecord],
    ) -> Self {
        Self {
            schema_version: SCHEMA_VERSION,
            run_name,
            generated_at: Utc::now(),
            smart,
            statistics,
            batches,
        }
    }
}

pub fn export_json(report: &RefreshReport<'_>) -> Result<String> {
    serde_json::to_string_pretty(report).context("failed to serialize refresh report to JSON")
}

/// Columns: batch_id, batch_status, index, symbol, status, attempts,
/// elapsed_ms, origin, price, error
pub fn export_outcomes_csv(records: &[RefreshRecord]) -> Result<String> {
    let mut wtr = csv::Writer::from_writer(vec![]);
    wtr.write_record([
        "batch_id",
        "batch_status",
        "index",
        "symbol",
        "status",
        "attempts",
        "elapsed_ms",
        "origin",
        "price",
        "error",
    ])?;

    for record in records {
        for o in &record.outcomes {
            let price = o
                .value
                .as_ref()
                .map(|q| format!("{:.2}", q.value.price))
                .unwrap_or_default();
            wtr.write_record([
                record.batch_id.as_str(),
                &format!("{:?}", record.status),
                &o.index.to_string(),
                &o.item,
                &format!("{:?}", o.status),
                &o.attempts.to_string(),
                &format!("{:.3}", o.elapsed.as_secs_f64() * 1000.0),
                &format!("{:?}", o.origin),
                &price,
                o.error.as_deref().unwrap_or(""),
            ])?;
        }
    }

    let data = wtr.into_inner().context("failed to flush CSV writer")?;
    String::from_utf8(data).context("CSV output is not valid UTF-8")
}

pub fn write_file(path: &Path, contents: &str) -> Result<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("failed to create directory: {}", parent.display()))?;
    }
    std::fs::write(path, contents).with_context(|| format!("failed to write {}", path.display()))
}
