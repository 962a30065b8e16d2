//! Ledger entry types and store trait.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use thiserror::Error;

use crate::retry::ErrorKind;
use crate::segment::SegmentKey;

/// Error type for ledger operations.
#[derive(Debug, Error)]
pub enum LedgerError {
    #[error("Ledger database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("Ledger I/O error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Ledger lock poisoned")]
    LockPoisoned,

    #[error("Corrupt ledger row for {key}: {reason}")]
    CorruptRow { key: String, reason: String },
}

/// Final outcome recorded for a segment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Outcome {
    Success,
    TerminalFailure,
}

impl Outcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            Outcome::Success => "success",
            Outcome::TerminalFailure => "terminal_failure",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "success" => Some(Outcome::Success),
            "terminal_failure" => Some(Outcome::TerminalFailure),
            _ => None,
        }
    }
}

/// One append-only ledger row.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LedgerEntry {
    /// Display form of the segment key (`<subset>/<basename>`).
    pub key: String,
    pub outcome: Outcome,
    pub error_kind: Option<ErrorKind>,
    pub attempts: u32,
    pub recorded_at: DateTime<Utc>,
}

impl LedgerEntry {
    pub fn success(key: &SegmentKey, attempts: u32) -> Self {
        Self {
            key: key.to_string(),
            outcome: Outcome::Success,
            error_kind: None,
            attempts,
            recorded_at: Utc::now(),
        }
    }

    pub fn terminal_failure(key: &SegmentKey, kind: ErrorKind, attempts: u32) -> Self {
        Self {
            key: key.to_string(),
            outcome: Outcome::TerminalFailure,
            error_kind: Some(kind),
            attempts,
            recorded_at: Utc::now(),
        }
    }
}

/// Durable per-shard completion record.
///
/// Rows are append-only; the latest row for a key is authoritative.
pub trait Ledger: Send + Sync {
    /// Whether the latest row for `key` is a success. Read errors count as
    /// not complete.
    fn is_complete(&self, key: &SegmentKey) -> bool;

    /// Appends a row. Calls are serialized.
    fn record(&self, entry: &LedgerEntry) -> Result<(), LedgerError>;

    /// Latest row for `key`.
    fn latest(&self, key: &SegmentKey) -> Result<Option<LedgerEntry>, LedgerError>;

    /// Latest row for every key, oldest first.
    fn entries(&self) -> Result<Vec<LedgerEntry>, LedgerError>;

    /// False when state will not survive the process.
    fn is_resumable(&self) -> bool {
        true
    }
}
