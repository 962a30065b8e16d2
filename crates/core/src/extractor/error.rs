//! Error types for the extractor module.

use std::path::PathBuf;
use thiserror::Error;

use crate::process::ProcessError;
use crate::retry::ErrorKind;

/// Errors that can occur while cutting and transcoding a segment.
#[derive(Debug, Error)]
pub enum ExtractError {
    /// The requested window is not covered by the source media.
    #[error("Requested window {start:.3}-{end:.3}s exceeds source duration {available:.3}s")]
    Range {
        start: f64,
        end: f64,
        available: f64,
    },

    /// The requested window is empty or inverted.
    #[error("Invalid window {start:.3}-{end:.3}s")]
    InvalidWindow { start: f64, end: f64 },

    /// Transcoder exited non-zero.
    #[error("Transcoding failed: {reason}")]
    TranscodeFailed {
        reason: String,
        exit_code: Option<i32>,
        stderr: Option<String>,
    },

    /// Transcoder did not finish in time.
    #[error("Transcoding timed out after {timeout_secs} seconds")]
    Timeout { timeout_secs: u64 },

    /// Output exists but did not pass validation.
    #[error("Output {path} failed validation: {reason}")]
    Validation { path: PathBuf, reason: String },

    /// The handle does not carry a stream the plan needs.
    #[error("Stream handle has no {0} source")]
    MissingStream(String),

    /// Transcoder or probe binary could not be started.
    #[error("Failed to run transcoder: {0}")]
    Process(String),

    /// Moving the finished file into place failed.
    #[error("Failed to publish {path}: {source}")]
    Publish {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl ExtractError {
    /// Creates a transcode failure with exit code and stderr excerpt.
    pub fn transcode_failed(
        reason: impl Into<String>,
        exit_code: Option<i32>,
        stderr: Option<String>,
    ) -> Self {
        Self::TranscodeFailed {
            reason: reason.into(),
            exit_code,
            stderr,
        }
    }

    pub fn validation(path: impl Into<PathBuf>, reason: impl Into<String>) -> Self {
        Self::Validation {
            path: path.into(),
            reason: reason.into(),
        }
    }

    pub(crate) fn from_process(err: ProcessError) -> Self {
        match err {
            ProcessError::TimedOut { timeout_secs, .. } => Self::Timeout { timeout_secs },
            other => Self::Process(other.to_string()),
        }
    }

    /// Taxonomy kind of this error.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Range { .. } | Self::InvalidWindow { .. } => ErrorKind::Range,
            _ => ErrorKind::Transcode,
        }
    }
}
