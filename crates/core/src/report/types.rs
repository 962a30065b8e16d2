//! Shard summary and failure report.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::io::Write;
use std::path::{Path, PathBuf};
use thiserror::Error;

use crate::retry::{ErrorKind, JobOutcome, JobResult};
use crate::segment::RejectedRow;

/// Error type for report writing.
#[derive(Debug, Error)]
pub enum ReportError {
    #[error("Failed to write report {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to serialize report: {0}")]
    Serialize(#[from] serde_json::Error),
}

/// One terminal failure in a shard.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FailureRecord {
    /// Segment key, or `line:<n>` for rows that never became a segment.
    pub key: String,
    pub error_kind: ErrorKind,
    pub attempts: u32,
    pub message: String,
}

impl FailureRecord {
    /// Builds a record from a failed job outcome.
    pub fn from_outcome(outcome: &JobOutcome) -> Option<Self> {
        match &outcome.result {
            JobResult::Failed { kind, message } => Some(Self {
                key: outcome.job.key.to_string(),
                error_kind: *kind,
                attempts: outcome.job.attempt_count,
                message: message.clone(),
            }),
            _ => None,
        }
    }

    pub fn rejected_row(row: &RejectedRow) -> Self {
        Self {
            key: format!("line:{}", row.line),
            error_kind: ErrorKind::CatalogFormat,
            attempts: 0,
            message: row.reason.clone(),
        }
    }
}

/// Counts for one shard run.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunSummary {
    /// Rows in the shard, rejected rows included.
    pub total: usize,
    pub succeeded: usize,
    pub terminal_failed: usize,
    pub skipped_complete: usize,
    pub cancelled: usize,
    pub not_started: usize,
    pub rejected_rows: usize,
    pub aborted_early: bool,
    pub non_resumable: bool,
}

impl RunSummary {
    /// True when every job reached a final outcome.
    pub fn is_complete(&self) -> bool {
        self.cancelled == 0 && self.not_started == 0 && !self.aborted_early
    }

    /// Adds another shard's counts into this one.
    pub fn merge(&mut self, other: &RunSummary) {
        self.total += other.total;
        self.succeeded += other.succeeded;
        self.terminal_failed += other.terminal_failed;
        self.skipped_complete += other.skipped_complete;
        self.cancelled += other.cancelled;
        self.not_started += other.not_started;
        self.rejected_rows += other.rejected_rows;
        self.aborted_early |= other.aborted_early;
        self.non_resumable |= other.non_resumable;
    }
}

/// Terminal failures of one shard, in the order they happened.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FailureReport {
    pub failures: Vec<FailureRecord>,
}

impl FailureReport {
    pub fn len(&self) -> usize {
        self.failures.len()
    }

    pub fn is_empty(&self) -> bool {
        self.failures.is_empty()
    }

    /// `key<TAB>error_kind<TAB>attempts` per line, with a header.
    pub fn to_tsv(&self) -> String {
        let mut out = String::from("key\terror_kind\tattempts\n");
        for record in &self.failures {
            out.push_str(&format!(
                "{}\t{}\t{}\n",
                record.key, record.error_kind, record.attempts
            ));
        }
        out
    }
}

/// Everything produced by one shard run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ShardReport {
    /// Shard file name.
    pub shard: String,
    pub subset: String,
    pub generated_at: DateTime<Utc>,
    pub summary: RunSummary,
    pub failures: FailureReport,
}

impl ShardReport {
    /// Writes `<shard>.failures.json` and `<shard>.failures.tsv` into `dir`.
    pub fn write_to_dir(&self, dir: &Path) -> Result<(PathBuf, PathBuf), ReportError> {
        let json_path = dir.join(format!("{}.failures.json", self.shard));
        let tsv_path = dir.join(format!("{}.failures.tsv", self.shard));

        let json = serde_json::to_vec_pretty(self)?;
        write_atomic(&json_path, &json).map_err(|source| ReportError::Io {
            path: json_path.clone(),
            source,
        })?;
        write_atomic(&tsv_path, self.failures.to_tsv().as_bytes()).map_err(|source| {
            ReportError::Io {
                path: tsv_path.clone(),
                source,
            }
        })?;

        Ok((json_path, tsv_path))
    }
}

/// Writes `contents` to a sibling temp file, then renames it over `path`.
pub fn write_atomic(path: &Path, contents: &[u8]) -> std::io::Result<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)?;
    }
    let file_name = path
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_default();
    let temp = path.with_file_name(format!(".{}.tmp", file_name));

    let mut file = std::fs::File::create(&temp)?;
    file.write_all(contents)?;
    file.sync_all()?;
    drop(file);

    std::fs::rename(&temp, path)
}
