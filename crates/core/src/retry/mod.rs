//! Failure classification and bounded retries for segment jobs.

mod backoff;
mod controller;
mod types;

pub use backoff::{BackoffPolicy, RetryPolicy};
pub use controller::{classify, JobError, JobTimeouts, RetryController};
pub use types::{
    DownloadJob, ErrorKind, FailureClass, InvalidTransition, JobOutcome, JobResult, JobState,
};
