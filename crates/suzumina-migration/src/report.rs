//! Dry-run reporting.
//!
//! Collects a per-document entry log, derives recommendations from it, and
//! renders the text report and the shorter console summary.

use std::collections::BTreeMap;
use std::fmt::Write as _;
use std::path::Path;

use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use suzumina_firestore::value::record_to_json;
use tracing::info;

use crate::MigrationError;
use crate::types::{CollectionStats, MigrationOutcome, MigrationReport, TargetCollection};

/// Width of the text report banners.
const BANNER_WIDTH: usize = 80;

/// Number of error entries listed in the text report.
const MAX_LISTED_ERRORS: usize = 100;

/// Error rate (percent) above which the report warns.
const HIGH_ERROR_RATE: f64 = 10.0;

/// Recommendation emitted when no rule fired.
pub const ALL_CLEAR: &str = "Migration looks good. No issues detected.";

/// Status of one document in a dry run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DryRunStatus {
    Success,
    Skip,
    Error,
}

/// One document's dry-run outcome.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DryRunEntry {
    pub document_id: String,
    pub collection: TargetCollection,
    pub status: DryRunStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub changes: Option<Value>,
}

impl DryRunEntry {
    /// Describe a transformer outcome as an entry.
    pub fn from_outcome(
        collection: TargetCollection,
        document_id: impl Into<String>,
        outcome: &MigrationOutcome,
    ) -> Self {
        let (status, reason, changes) = match outcome {
            MigrationOutcome::Migrated { data } => {
                (DryRunStatus::Success, None, Some(record_to_json(data)))
            }
            MigrationOutcome::Skipped { reason } => (DryRunStatus::Skip, Some(reason.clone()), None),
            MigrationOutcome::Failed { error } => (DryRunStatus::Error, Some(error.clone()), None),
        };
        Self {
            document_id: document_id.into(),
            collection,
            status,
            reason,
            changes,
        }
    }
}

/// A generated dry-run report.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DryRunReport {
    pub timestamp: DateTime<Utc>,
    pub summary: MigrationReport,
    pub entries: Vec<DryRunEntry>,
    pub recommendations: Vec<String>,
}

/// Accumulates dry-run entries and turns them into reports.
#[derive(Debug, Default)]
pub struct DryRunReportGenerator {
    entries: Vec<DryRunEntry>,
}

impl DryRunReportGenerator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append an entry to the log.
    pub fn add_entry(&mut self, entry: DryRunEntry) {
        self.entries.push(entry);
    }

    pub fn entries(&self) -> &[DryRunEntry] {
        &self.entries
    }

    /// Build a report over `summary` and the entries collected so far.
    pub fn generate_report(&self, summary: &MigrationReport) -> DryRunReport {
        DryRunReport {
            timestamp: Utc::now(),
            summary: summary.clone(),
            entries: self.entries.clone(),
            recommendations: generate_recommendations(&self.entries),
        }
    }

    /// Render `report` and write it to `path`.
    pub async fn save_report(report: &DryRunReport, path: &Path) -> Result<(), MigrationError> {
        tokio::fs::write(path, render_text(report)).await?;
        info!(path = %path.display(), "saved dry-run report");
        Ok(())
    }
}

/// Derive recommendations from an entry log.
pub fn generate_recommendations(entries: &[DryRunEntry]) -> Vec<String> {
    let mut recommendations = Vec::new();

    let errors: Vec<&DryRunEntry> = entries
        .iter()
        .filter(|e| e.status == DryRunStatus::Error)
        .collect();

    let mut by_reason: BTreeMap<&str, usize> = BTreeMap::new();
    for entry in &errors {
        *by_reason
            .entry(entry.reason.as_deref().unwrap_or("Unknown error"))
            .or_default() += 1;
    }

    for (reason, count) in &by_reason {
        if reason.contains("validation") {
            recommendations.push(format!(
                "{} documents failed validation. Review and fix data before migration.",
                count
            ));
        }
        if reason.contains("missing") {
            recommendations.push(format!(
                "{} documents have missing required fields. Consider data cleanup before migration.",
                count
            ));
        }
    }

    if !entries.is_empty() {
        let error_rate = errors.len() as f64 / entries.len() as f64 * 100.0;
        if error_rate > HIGH_ERROR_RATE {
            recommendations.push(format!(
                "High error rate ({:.1}%). Investigate root causes before proceeding.",
                error_rate
            ));
        }
    }

    if entries.iter().any(|e| e.status == DryRunStatus::Skip) {
        recommendations.push(
            "Some documents were skipped (already migrated). This is expected for partial migrations."
                .to_string(),
        );
    }

    if recommendations.is_empty() {
        recommendations.push(ALL_CLEAR.to_string());
    }

    recommendations
}

/// Format the time between two instants as `1h 2m 3s`, `2m 3s` or `3s`.
pub fn format_duration(start: DateTime<Utc>, end: DateTime<Utc>) -> String {
    let total = (end - start).num_seconds().max(0);
    let hours = total / 3600;
    let minutes = (total % 3600) / 60;
    let seconds = total % 60;

    if hours > 0 {
        format!("{}h {}m {}s", hours, minutes, seconds)
    } else if minutes > 0 {
        format!("{}m {}s", minutes, seconds)
    } else {
        format!("{}s", seconds)
    }
}

fn iso(ts: DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Millis, true)
}

fn heading(out: &mut String, title: &str) {
    let _ = writeln!(out, "{}", title);
    let _ = writeln!(out, "{}", "-".repeat(title.chars().count()));
}

fn write_stats(out: &mut String, title: &str, stats: &CollectionStats) {
    let unique_errors = stats.errors.iter().collect::<std::collections::BTreeSet<_>>().len();
    heading(out, title);
    let _ = writeln!(out, "Total:         {}", stats.total);
    let _ = writeln!(out, "Migrated:      {}", stats.migrated);
    let _ = writeln!(out, "Skipped:       {}", stats.skipped);
    let _ = writeln!(out, "Failed:        {}", stats.failed);
    let _ = writeln!(out, "Unique errors: {}", unique_errors);
    out.push('\n');
}

/// Render the full text report.
pub fn render_text(report: &DryRunReport) -> String {
    let banner = "=".repeat(BANNER_WIDTH);
    let summary = &report.summary;
    let mut out = String::new();

    let _ = writeln!(out, "{}", banner);
    let _ = writeln!(out, "Entity V2 Migration Dry-Run Report");
    let _ = writeln!(out, "{}", banner);
    out.push('\n');

    heading(&mut out, "SUMMARY");
    let _ = writeln!(out, "Start Time: {}", iso(summary.start_time));
    let _ = writeln!(out, "End Time:   {}", iso(summary.end_time));
    let _ = writeln!(
        out,
        "Duration:   {}",
        format_duration(summary.start_time, summary.end_time)
    );
    let _ = writeln!(
        out,
        "Mode:       {}",
        if summary.dry_run { "DRY RUN" } else { "LIVE" }
    );
    out.push('\n');

    for collection in TargetCollection::ALL {
        write_stats(
            &mut out,
            &collection.label().to_uppercase(),
            summary.stats(collection),
        );
    }

    heading(&mut out, "RECOMMENDATIONS");
    for recommendation in &report.recommendations {
        let _ = writeln!(out, "• {}", recommendation);
    }
    out.push('\n');

    let errors: Vec<&DryRunEntry> = report
        .entries
        .iter()
        .filter(|e| e.status == DryRunStatus::Error)
        .collect();
    if !errors.is_empty() {
        heading(
            &mut out,
            &format!("ERRORS ({} total, showing up to {})", errors.len(), MAX_LISTED_ERRORS),
        );
        for entry in errors.iter().take(MAX_LISTED_ERRORS) {
            let _ = writeln!(
                out,
                "{}/{}: {}",
                entry.collection,
                entry.document_id,
                entry.reason.as_deref().unwrap_or("Unknown error")
            );
        }
        out.push('\n');
    }

    let _ = writeln!(out, "{}", banner);
    let _ = writeln!(out, "Generated at: {}", iso(report.timestamp));
    let _ = writeln!(out, "{}", banner);

    out
}

/// Render the short console summary of a run.
pub fn format_console_report(report: &MigrationReport) -> String {
    let mut out = String::new();

    let _ = writeln!(
        out,
        "📊 Migration Report ({})",
        if report.dry_run { "DRY RUN" } else { "LIVE" }
    );
    let _ = writeln!(
        out,
        "Duration: {}",
        format_duration(report.start_time, report.end_time)
    );
    out.push('\n');

    for collection in TargetCollection::ALL {
        let stats = report.stats(collection);
        let _ = writeln!(out, "{}:", collection.label());
        let _ = writeln!(out, "  Total:   {}", stats.total);
        let _ = writeln!(out, "  Migrate: {}", stats.migrated);
        let _ = writeln!(out, "  Skip:    {}", stats.skipped);
        let _ = writeln!(out, "  Error:   {}", stats.failed);
        out.push('\n');
    }

    let failed = report.total_failed();
    if failed == 0 {
        let _ = writeln!(out, "✅ All documents processed without errors.");
    } else {
        let _ = writeln!(
            out,
            "⚠️  {} documents failed. Review errors before running the migration.",
            failed
        );
    }

    out
}
