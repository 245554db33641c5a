//! Stats file written at the end of every run
//!
//! ```text
//! Loaded products.csv on 2026-10-16T09:12:44.120Z
//!
//! OK: 41
//!
//! Failed: 1
//!
//! Errors:
//! Record 7 (Blue Mug): API error 400: Invalid field 'tags'
//! ```
//!
//! Rows rejected by the input schema follow under `Invalid rows:`. A run that
//! failed before applying anything reports zero counts and the fatal error.

use crate::models::InvalidRow;
use crate::services::import_pipeline::ImportReport;
use chrono::{DateTime, SecondsFormat, Utc};
use std::fmt::Write as _;
use std::path::{Path, PathBuf};
use tracing::info;

#[derive(Debug, Clone, PartialEq)]
pub struct StatsReport {
    pub data: PathBuf,
    pub loaded_at: DateTime<Utc>,
    pub success_count: usize,
    pub failure_count: usize,
    pub errors: Vec<String>,
    pub invalid_rows: Vec<String>,
    /// Set when the run stopped before the last resource
    pub resume_from: Option<usize>,
}

impl StatsReport {
    pub fn from_import(data: &Path, report: &ImportReport) -> Self {
        let ledger = &report.ledger;
        Self {
            data: data.to_path_buf(),
            loaded_at: Utc::now(),
            success_count: ledger.success_count,
            failure_count: ledger.failure_count,
            errors: ledger.failure_messages.clone(),
            invalid_rows: report.invalid_rows.iter().map(InvalidRow::summary).collect(),
            resume_from: ledger.cancelled.then_some(ledger.next_index),
        }
    }

    /// Report for a run aborted by a setup error
    pub fn fatal(data: &Path, message: impl Into<String>) -> Self {
        Self {
            data: data.to_path_buf(),
            loaded_at: Utc::now(),
            success_count: 0,
            failure_count: 0,
            errors: vec![message.into()],
            invalid_rows: Vec::new(),
            resume_from: None,
        }
    }

    pub fn render(&self) -> String {
        let mut out = format!(
            "Loaded {} on {}\n",
            self.data.display(),
            self.loaded_at.to_rfc3339_opts(SecondsFormat::Millis, true)
        );
        let _ = write!(
            out,
            "\nOK: {}\n\nFailed: {}\n",
            self.success_count, self.failure_count
        );

        if !self.errors.is_empty() {
            out.push_str("\nErrors:");
            for error in &self.errors {
                out.push('\n');
                out.push_str(error);
            }
            out.push('\n');
        }

        if !self.invalid_rows.is_empty() {
            out.push_str("\nInvalid rows:");
            for row in &self.invalid_rows {
                out.push('\n');
                out.push_str(row);
            }
            out.push('\n');
        }

        if let Some(index) = self.resume_from {
            let _ = write!(out, "\nStopped early. Resume from index {}\n", index);
        }

        out
    }

    pub fn write(&self, path: &Path) -> std::io::Result<()> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(path, self.render())?;
        info!(path = %path.display(), "Stats written");
        Ok(())
    }
}
