//! Single-writer collector of job outcomes.

use std::sync::Arc;

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use super::types::{FailureRecord, FailureReport};
use crate::ledger::{Ledger, LedgerEntry};
use crate::metrics;
use crate::retry::{JobOutcome, JobResult};

/// Handle workers use to report outcomes. Cheap to clone.
#[derive(Clone)]
pub struct AggregatorHandle {
    tx: mpsc::Sender<JobOutcome>,
}

impl AggregatorHandle {
    /// Hands an outcome to the aggregator. Waits if the buffer is full.
    pub async fn submit(&self, outcome: JobOutcome) {
        if let Err(e) = self.tx.send(outcome).await {
            error!(key = %e.0.job.key, "Aggregator gone, outcome dropped");
        }
    }
}

/// What the aggregator saw by the time every handle was dropped.
#[derive(Debug, Clone, Default)]
pub struct AggregateResult {
    pub succeeded: usize,
    pub terminal_failed: usize,
    pub cancelled: usize,
    pub failures: FailureReport,
    pub ledger_write_failures: usize,
    /// The terminal failure limit was reached.
    pub aborted_early: bool,
}

/// Background task that owns every ledger write for a shard.
pub struct ResultAggregator {
    rx: mpsc::Receiver<JobOutcome>,
    ledger: Arc<dyn Ledger>,
    max_terminal_failures: Option<usize>,
    abort: CancellationToken,
}

impl ResultAggregator {
    /// Cancels `abort` once `max_terminal_failures` terminal failures
    /// have been recorded.
    pub fn with_failure_limit(mut self, limit: Option<usize>, abort: CancellationToken) -> Self {
        self.max_terminal_failures = limit;
        self.abort = abort;
        self
    }

    /// Consumes outcomes until every handle is dropped.
    pub async fn run(mut self) -> AggregateResult {
        let mut result = AggregateResult::default();

        while let Some(outcome) = self.rx.recv().await {
            let entry = match &outcome.result {
                JobResult::Succeeded => {
                    result.succeeded += 1;
                    metrics::SEGMENTS_TOTAL
                        .with_label_values(&["succeeded"])
                        .inc();
                    Some(LedgerEntry::success(
                        &outcome.job.key,
                        outcome.job.attempt_count,
                    ))
                }
                JobResult::Failed { kind, .. } => {
                    result.terminal_failed += 1;
                    metrics::SEGMENTS_TOTAL
                        .with_label_values(&["terminal_failed"])
                        .inc();
                    if let Some(record) = FailureRecord::from_outcome(&outcome) {
                        result.failures.failures.push(record);
                    }
                    Some(LedgerEntry::terminal_failure(
                        &outcome.job.key,
                        *kind,
                        outcome.job.attempt_count,
                    ))
                }
                JobResult::Cancelled => {
                    result.cancelled += 1;
                    metrics::SEGMENTS_TOTAL
                        .with_label_values(&["cancelled"])
                        .inc();
                    None
                }
            };

            if let Some(entry) = entry {
                if let Err(e) = self.ledger.record(&entry) {
                    result.ledger_write_failures += 1;
                    metrics::LEDGER_WRITE_FAILURES.inc();
                    error!(key = %entry.key, error = %e, "Failed to write ledger entry");
                }
            }

            if let Some(limit) = self.max_terminal_failures {
                if !result.aborted_early && result.terminal_failed >= limit {
                    warn!(
                        terminal_failed = result.terminal_failed,
                        limit, "Terminal failure limit reached, stopping shard"
                    );
                    result.aborted_early = true;
                    self.abort.cancel();
                }
            }
        }

        info!(
            succeeded = result.succeeded,
            terminal_failed = result.terminal_failed,
            cancelled = result.cancelled,
            "Aggregator finished"
        );
        result
    }
}

/// Creates a connected handle and aggregator.
///
/// Spawn the aggregator with `tokio::spawn(aggregator.run())` and drop
/// every handle to let it finish.
pub fn create_aggregator(
    ledger: Arc<dyn Ledger>,
    buffer_size: usize,
) -> (AggregatorHandle, ResultAggregator) {
    let (tx, rx) = mpsc::channel(buffer_size.max(1));
    let aggregator = ResultAggregator {
        rx,
        ledger,
        max_terminal_failures: None,
        abort: CancellationToken::new(),
    };
    (AggregatorHandle { tx }, aggregator)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::EncodingConfig;
    use crate::ledger::{Outcome, SqliteLedger};
    use crate::retry::{DownloadJob, ErrorKind, JobState};
    use crate::segment::{OutputArtifact, SegmentDescriptor, Subset, VideoMode};
    use std::path::Path;

    fn outcome(video_id: &str, result: JobResult) -> JobOutcome {
        let descriptor = SegmentDescriptor {
            video_id: video_id.to_string(),
            start_seconds: 0.0,
            end_seconds: 10.0,
            subset: Subset::Eval,
            labels: vec![],
            line: 1,
        };
        let artifact = OutputArtifact::for_key(
            Path::new("/out"),
            &descriptor.key(),
            &VideoMode::BestAudio.plan(),
            &EncodingConfig::default(),
        );
        let mut job = DownloadJob::new(1, descriptor, artifact);
        job.attempt_count = 2;
        job.state = match result {
            JobResult::Succeeded => JobState::Succeeded,
            JobResult::Failed { .. } => JobState::Aborted,
            JobResult::Cancelled => JobState::Cancelled,
        };
        JobOutcome { job, result }
    }

    fn failed(kind: ErrorKind) -> JobResult {
        JobResult::Failed {
            kind,
            message: "boom".to_string(),
        }
    }

    #[tokio::test]
    async fn test_records_terminal_outcomes_only() {
        let ledger = Arc::new(SqliteLedger::in_memory().unwrap());
        let (handle, aggregator) = create_aggregator(ledger.clone(), 8);
        let task = tokio::spawn(aggregator.run());

        handle.submit(outcome("a", JobResult::Succeeded)).await;
        handle.submit(outcome("b", failed(ErrorKind::NotFound))).await;
        handle.submit(outcome("c", JobResult::Cancelled)).await;
        drop(handle);

        let result = task.await.unwrap();
        assert_eq!(result.succeeded, 1);
        assert_eq!(result.terminal_failed, 1);
        assert_eq!(result.cancelled, 1);
        assert_eq!(result.failures.len(), 1);
        assert_eq!(result.failures.failures[0].error_kind, ErrorKind::NotFound);
        assert_eq!(result.failures.failures[0].attempts, 2);

        let entries = ledger.entries().unwrap();
        assert_eq!(entries.len(), 2);
        assert!(entries.iter().any(|e| e.outcome == Outcome::TerminalFailure));
        assert!(!entries.iter().any(|e| e.key.contains("/c_")));
    }

    #[tokio::test]
    async fn test_failure_limit_cancels() {
        let ledger = Arc::new(SqliteLedger::in_memory().unwrap());
        let abort = CancellationToken::new();
        let (handle, aggregator) = create_aggregator(ledger, 8);
        let task = tokio::spawn(
            aggregator
                .with_failure_limit(Some(2), abort.clone())
                .run(),
        );

        handle.submit(outcome("a", failed(ErrorKind::NotFound))).await;
        handle.submit(outcome("b", JobResult::Succeeded)).await;
        assert!(!abort.is_cancelled());
        handle.submit(outcome("c", failed(ErrorKind::Range))).await;
        drop(handle);

        let result = task.await.unwrap();
        assert!(result.aborted_early);
        assert!(abort.is_cancelled());
    }
}
