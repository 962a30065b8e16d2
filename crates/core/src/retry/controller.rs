//! Drives a single job through fetch and extract with bounded retries.

use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::backoff::RetryPolicy;
use super::types::{DownloadJob, ErrorKind, FailureClass, JobOutcome, JobResult, JobState};
use crate::config::{Config, EncodingConfig};
use crate::extractor::{ExtractError, ExtractionRequest, Extractor};
use crate::fetcher::{FetchError, Fetcher};
use crate::metrics;
use crate::segment::StreamPlan;

/// Why a single attempt (or the job before its first attempt) failed.
#[derive(Debug, Error)]
pub enum JobError {
    #[error("Invalid interval: end {end:.3}s is not after start {start:.3}s")]
    InvalidInterval { start: f64, end: f64 },

    #[error(transparent)]
    Fetch(#[from] FetchError),

    #[error(transparent)]
    Extract(#[from] ExtractError),

    #[error("Fetch did not finish within {}s", .0.as_secs())]
    FetchTimeout(Duration),

    #[error("Extraction did not finish within {}s", .0.as_secs())]
    ExtractTimeout(Duration),
}

impl JobError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            JobError::InvalidInterval { .. } => ErrorKind::CatalogFormat,
            JobError::Fetch(e) => e.kind(),
            JobError::Extract(e) => e.kind(),
            JobError::FetchTimeout(_) => ErrorKind::Network,
            JobError::ExtractTimeout(_) => ErrorKind::Transcode,
        }
    }
}

/// Decides whether a failed attempt may be retried.
///
/// `job.transcode_failures` must already include the failure being
/// classified: the first transcode failure is retryable, later ones are not.
pub fn classify(kind: ErrorKind, job: &DownloadJob) -> FailureClass {
    match kind {
        ErrorKind::RateLimited | ErrorKind::Network => FailureClass::Retryable,
        ErrorKind::Transcode if job.transcode_failures <= 1 => FailureClass::Retryable,
        _ => FailureClass::Terminal,
    }
}

/// Upper bounds on one fetch and one extraction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct JobTimeouts {
    pub fetch: Duration,
    pub extract: Duration,
}

impl JobTimeouts {
    /// Derives per-job bounds from the per-process timeouts.
    pub fn from_config(config: &Config, plan: &StreamPlan) -> Self {
        let streams = plan.required_streams().len().max(1) as u64;
        let outputs = (plan.produces_audio() as u64 + plan.produces_video() as u64).max(1);
        let probe_secs = if config.extractor.validate_output { 60 } else { 0 };

        Self {
            fetch: Duration::from_secs(config.fetcher.timeout_secs * streams + 30),
            extract: Duration::from_secs(
                (config.extractor.timeout_secs + probe_secs) * outputs + 30,
            ),
        }
    }
}

impl Default for JobTimeouts {
    fn default() -> Self {
        Self {
            fetch: Duration::from_secs(300),
            extract: Duration::from_secs(900),
        }
    }
}

/// Runs jobs through the retry state machine.
pub struct RetryController<F: Fetcher, E: Extractor> {
    fetcher: Arc<F>,
    extractor: Arc<E>,
    policy: RetryPolicy,
    plan: StreamPlan,
    encoding: EncodingConfig,
    timeouts: JobTimeouts,
}

impl<F: Fetcher, E: Extractor> RetryController<F, E> {
    pub fn new(
        fetcher: Arc<F>,
        extractor: Arc<E>,
        policy: RetryPolicy,
        plan: StreamPlan,
        encoding: EncodingConfig,
    ) -> Self {
        Self {
            fetcher,
            extractor,
            policy,
            plan,
            encoding,
            timeouts: JobTimeouts::default(),
        }
    }

    pub fn with_timeouts(mut self, timeouts: JobTimeouts) -> Self {
        self.timeouts = timeouts;
        self
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    /// Runs `job` to a final state.
    ///
    /// An attempt that has started always runs to completion; `cancel` is
    /// only observed while waiting out a backoff.
    pub async fn run(&self, mut job: DownloadJob, cancel: &CancellationToken) -> JobOutcome {
        if !job.descriptor.has_valid_interval() {
            let err = JobError::InvalidInterval {
                start: job.descriptor.start_seconds,
                end: job.descriptor.end_seconds,
            };
            job.last_error_kind = Some(err.kind());
            return self.abort(job, err.kind(), err.to_string());
        }

        let mut previous_delay = Duration::ZERO;

        loop {
            advance(&mut job, JobState::Fetching);
            debug!(key = %job.key, attempt = job.attempt_count, "Starting attempt");

            let err = match self.attempt(&mut job).await {
                Ok(()) => {
                    advance(&mut job, JobState::Succeeded);
                    info!(key = %job.key, attempts = job.attempt_count, "Segment completed");
                    return JobOutcome {
                        job,
                        result: JobResult::Succeeded,
                    };
                }
                Err(err) => err,
            };

            let kind = err.kind();
            job.last_error_kind = Some(kind);
            if kind == ErrorKind::Transcode {
                job.transcode_failures += 1;
            }
            metrics::ATTEMPT_FAILURES
                .with_label_values(&[kind.as_str()])
                .inc();

            if classify(kind, &job) == FailureClass::Terminal {
                warn!(key = %job.key, error_kind = %kind, error = %err, "Terminal failure");
                return self.abort(job, kind, err.to_string());
            }

            if job.attempt_count > self.policy.num_retries {
                warn!(
                    key = %job.key,
                    attempts = job.attempt_count,
                    error_kind = %kind,
                    error = %err,
                    "Retries exhausted"
                );
                let message = format!(
                    "{} attempts, last error ({}): {}",
                    job.attempt_count, kind, err
                );
                return self.abort(job, ErrorKind::RetriesExhausted, message);
            }

            advance(&mut job, JobState::FailedRetryable);
            let delay = self
                .policy
                .delay_for(job.attempt_count, kind == ErrorKind::RateLimited)
                .max(previous_delay);
            previous_delay = delay;

            warn!(
                key = %job.key,
                attempt = job.attempt_count,
                max_attempts = self.policy.max_attempts(),
                error_kind = %kind,
                delay_ms = delay.as_millis() as u64,
                error = %err,
                "Attempt failed, retrying"
            );

            tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    advance(&mut job, JobState::Cancelled);
                    info!(key = %job.key, "Job cancelled during backoff");
                    return JobOutcome {
                        job,
                        result: JobResult::Cancelled,
                    };
                }
                _ = tokio::time::sleep(delay) => {}
            }

            advance(&mut job, JobState::Pending);
        }
    }

    /// One fetch followed by one extraction.
    async fn attempt(&self, job: &mut DownloadJob) -> Result<(), JobError> {
        let handle = tokio::time::timeout(
            self.timeouts.fetch,
            self.fetcher.fetch(&job.descriptor.video_id, &self.plan),
        )
        .await
        .map_err(|_| JobError::FetchTimeout(self.timeouts.fetch))??;

        advance(job, JobState::Extracting);

        let request = ExtractionRequest {
            start_seconds: job.descriptor.start_seconds,
            end_seconds: job.descriptor.end_seconds,
            encoding: self.encoding.clone(),
            plan: self.plan,
            artifact: job.artifact.clone(),
        };

        let result = tokio::time::timeout(
            self.timeouts.extract,
            self.extractor.extract(&handle, &request),
        )
        .await;
        handle.release().await;

        match result {
            Ok(Ok(_)) => Ok(()),
            Ok(Err(e)) => Err(e.into()),
            Err(_) => Err(JobError::ExtractTimeout(self.timeouts.extract)),
        }
    }

    fn abort(&self, mut job: DownloadJob, kind: ErrorKind, message: String) -> JobOutcome {
        advance(&mut job, JobState::FailedTerminal);
        advance(&mut job, JobState::Aborted);
        JobOutcome {
            job,
            result: JobResult::Failed { kind, message },
        }
    }
}

fn advance(job: &mut DownloadJob, to: JobState) {
    if let Err(e) = job.transition(to) {
        error!(job_id = job.id, error = %e, "Job state machine violation");
        debug_assert!(false, "{}", e);
    }
}
