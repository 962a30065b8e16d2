//! Job state machine and failure taxonomy.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::segment::{OutputArtifact, SegmentDescriptor, SegmentKey};

/// Classified error kind for a segment job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// Row could not be parsed or its interval is inverted.
    CatalogFormat,
    /// Video removed, private or region-blocked.
    NotFound,
    /// Source asked us to slow down.
    RateLimited,
    /// Timeout, connection reset or unrecognised fetch failure.
    Network,
    /// Requested window not covered by the source media.
    Range,
    /// Transcoder failed or produced unreadable output.
    Transcode,
    /// A retryable failure outlived the retry budget.
    RetriesExhausted,
    /// Run was cancelled while the job was still pending.
    Cancelled,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::CatalogFormat => "catalog_format",
            ErrorKind::NotFound => "not_found",
            ErrorKind::RateLimited => "rate_limited",
            ErrorKind::Network => "network",
            ErrorKind::Range => "range",
            ErrorKind::Transcode => "transcode",
            ErrorKind::RetriesExhausted => "retries_exhausted",
            ErrorKind::Cancelled => "cancelled",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        let kind = match s {
            "catalog_format" => ErrorKind::CatalogFormat,
            "not_found" => ErrorKind::NotFound,
            "rate_limited" => ErrorKind::RateLimited,
            "network" => ErrorKind::Network,
            "range" => ErrorKind::Range,
            "transcode" => ErrorKind::Transcode,
            "retries_exhausted" => ErrorKind::RetriesExhausted,
            "cancelled" => ErrorKind::Cancelled,
            _ => return None,
        };
        Some(kind)
    }

    /// Kinds that never succeed on a later attempt.
    pub fn is_always_terminal(&self) -> bool {
        matches!(
            self,
            ErrorKind::CatalogFormat
                | ErrorKind::NotFound
                | ErrorKind::Range
                | ErrorKind::RetriesExhausted
        )
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Whether a failed attempt may be retried.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureClass {
    Retryable,
    Terminal,
}

/// State of a download job.
///
/// ```text
/// Pending -> Fetching -> Extracting -> Succeeded
///               |            |
///               v            v
///         FailedRetryable -> Pending (after backoff)
///         FailedTerminal  -> Aborted
///
/// Pending and FailedRetryable can also move to Cancelled.
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobState {
    Pending,
    Fetching,
    Extracting,
    Succeeded,
    FailedRetryable,
    FailedTerminal,
    Aborted,
    Cancelled,
}

impl JobState {
    /// Returns true if no further transitions are possible.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            JobState::Succeeded | JobState::Aborted | JobState::Cancelled
        )
    }

    pub fn can_transition_to(&self, to: JobState) -> bool {
        use JobState::*;
        matches!(
            (self, to),
            (Pending, Fetching)
                | (Pending, FailedTerminal)
                | (Pending, Cancelled)
                | (Fetching, Extracting)
                | (Fetching, FailedRetryable)
                | (Fetching, FailedTerminal)
                | (Extracting, Succeeded)
                | (Extracting, FailedRetryable)
                | (Extracting, FailedTerminal)
                | (FailedRetryable, Pending)
                | (FailedRetryable, Cancelled)
                | (FailedTerminal, Aborted)
        )
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            JobState::Pending => "pending",
            JobState::Fetching => "fetching",
            JobState::Extracting => "extracting",
            JobState::Succeeded => "succeeded",
            JobState::FailedRetryable => "failed_retryable",
            JobState::FailedTerminal => "failed_terminal",
            JobState::Aborted => "aborted",
            JobState::Cancelled => "cancelled",
        }
    }
}

impl fmt::Display for JobState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Rejected state change.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("Invalid job transition {from} -> {to}")]
pub struct InvalidTransition {
    pub from: JobState,
    pub to: JobState,
}

/// A segment descriptor plus its mutable run state.
#[derive(Debug, Clone)]
pub struct DownloadJob {
    pub id: u64,
    pub descriptor: SegmentDescriptor,
    pub key: SegmentKey,
    pub artifact: OutputArtifact,
    /// Number of attempts started (fetch entered).
    pub attempt_count: u32,
    pub transcode_failures: u32,
    pub last_error_kind: Option<ErrorKind>,
    pub state: JobState,
    /// Every state the job has been in, in order.
    pub history: Vec<JobState>,
}

impl DownloadJob {
    pub fn new(id: u64, descriptor: SegmentDescriptor, artifact: OutputArtifact) -> Self {
        let key = descriptor.key();
        Self {
            id,
            descriptor,
            key,
            artifact,
            attempt_count: 0,
            transcode_failures: 0,
            last_error_kind: None,
            state: JobState::Pending,
            history: vec![JobState::Pending],
        }
    }

    /// Moves the job to `to` if the state machine allows it.
    pub fn transition(&mut self, to: JobState) -> Result<(), InvalidTransition> {
        if !self.state.can_transition_to(to) {
            return Err(InvalidTransition {
                from: self.state,
                to,
            });
        }
        self.state = to;
        self.history.push(to);
        if to == JobState::Fetching {
            self.attempt_count += 1;
        }
        Ok(())
    }
}

/// How a job ended.
#[derive(Debug, Clone, PartialEq)]
pub enum JobResult {
    Succeeded,
    Failed { kind: ErrorKind, message: String },
    Cancelled,
}

/// Final report for one job, handed to the aggregator.
#[derive(Debug, Clone)]
pub struct JobOutcome {
    pub job: DownloadJob,
    pub result: JobResult,
}

impl JobOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self.result, JobResult::Succeeded)
    }

    pub fn error_kind(&self) -> Option<ErrorKind> {
        match &self.result {
            JobResult::Failed { kind, .. } => Some(*kind),
            JobResult::Cancelled => Some(ErrorKind::Cancelled),
            JobResult::Succeeded => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::segment::Subset;
    use std::path::PathBuf;

    fn job() -> DownloadJob {
        let descriptor = SegmentDescriptor {
            video_id: "abc".to_string(),
            start_seconds: 0.0,
            end_seconds: 10.0,
            subset: Subset::Eval,
            labels: vec![],
            line: 1,
        };
        let artifact = OutputArtifact {
            basename: "abc_0_10000".to_string(),
            audio_path: Some(PathBuf::from("/out/eval/audio/abc_0_10000.flac")),
            video_path: None,
        };
        DownloadJob::new(1, descriptor, artifact)
    }

    #[test]
    fn test_happy_path_transitions() {
        let mut job = job();
        job.transition(JobState::Fetching).unwrap();
        job.transition(JobState::Extracting).unwrap();
        job.transition(JobState::Succeeded).unwrap();

        assert_eq!(job.attempt_count, 1);
        assert!(job.state.is_terminal());
        assert_eq!(
            job.history,
            vec![
                JobState::Pending,
                JobState::Fetching,
                JobState::Extracting,
                JobState::Succeeded
            ]
        );
    }

    #[test]
    fn test_retry_loop_counts_attempts() {
        let mut job = job();
        job.transition(JobState::Fetching).unwrap();
        job.transition(JobState::FailedRetryable).unwrap();
        job.transition(JobState::Pending).unwrap();
        job.transition(JobState::Fetching).unwrap();
        assert_eq!(job.attempt_count, 2);
    }

    #[test]
    fn test_invalid_transitions_rejected() {
        let mut job = job();
        let err = job.transition(JobState::Extracting).unwrap_err();
        assert_eq!(err.from, JobState::Pending);
        assert_eq!(err.to, JobState::Extracting);
        assert_eq!(job.state, JobState::Pending);

        job.transition(JobState::FailedTerminal).unwrap();
        job.transition(JobState::Aborted).unwrap();
        assert!(job.transition(JobState::Pending).is_err());
        assert!(job.transition(JobState::Fetching).is_err());
    }

    #[test]
    fn test_terminal_states_have_no_exits() {
        use JobState::*;
        let all = [
            Pending,
            Fetching,
            Extracting,
            Succeeded,
            FailedRetryable,
            FailedTerminal,
            Aborted,
            Cancelled,
        ];
        for from in all.iter().filter(|s| s.is_terminal()) {
            for to in all {
                assert!(!from.can_transition_to(to), "{} -> {}", from, to);
            }
        }
    }

    #[test]
    fn test_error_kind_roundtrip_names() {
        for kind in [
            ErrorKind::CatalogFormat,
            ErrorKind::NotFound,
            ErrorKind::RateLimited,
            ErrorKind::Network,
            ErrorKind::Range,
            ErrorKind::Transcode,
            ErrorKind::RetriesExhausted,
            ErrorKind::Cancelled,
        ] {
            assert_eq!(ErrorKind::parse(kind.as_str()), Some(kind));
        }
        assert_eq!(ErrorKind::parse("bogus"), None);
    }
}
