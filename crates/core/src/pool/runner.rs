//! Shard runner: a fixed pool of workers over a pre-filled job queue.

use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use chrono::Utc;
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::error::ShardError;
use super::types::{PoolStats, PoolStatus, RunContext};
use crate::extractor::Extractor;
use crate::fetcher::Fetcher;
use crate::ledger::Ledger;
use crate::metrics;
use crate::report::{create_aggregator, FailureRecord, RunSummary, ShardReport};
use crate::retry::{DownloadJob, RetryController};
use crate::segment::{LoadedShard, OutputArtifact};

/// Runs every job of a shard through a bounded set of workers.
pub struct ShardRunner<F: Fetcher, E: Extractor> {
    context: RunContext,
    controller: Arc<RetryController<F, E>>,
    stats: Arc<PoolStats>,
}

impl<F: Fetcher + 'static, E: Extractor + 'static> ShardRunner<F, E> {
    pub fn new(context: RunContext, fetcher: Arc<F>, extractor: Arc<E>) -> Self {
        let controller = RetryController::new(
            fetcher,
            extractor,
            context.retry.clone(),
            context.plan,
            context.encoding.clone(),
        )
        .with_timeouts(context.timeouts);

        Self {
            context,
            controller: Arc::new(controller),
            stats: Arc::new(PoolStats::default()),
        }
    }

    pub fn context(&self) -> &RunContext {
        &self.context
    }

    /// Current pool counters.
    pub fn status(&self) -> PoolStatus {
        self.stats.to_status(self.context.num_workers)
    }

    /// Builds jobs for the shard, dropping those the ledger already has.
    ///
    /// A ledger success only counts when every artifact is still on disk.
    pub fn plan_jobs(
        &self,
        shard: &LoadedShard,
        ledger: &dyn Ledger,
    ) -> (Vec<DownloadJob>, usize) {
        let mut jobs = Vec::with_capacity(shard.descriptors.len());
        let mut skipped = 0;

        for (idx, descriptor) in shard.descriptors.iter().enumerate() {
            let key = descriptor.key();
            let artifact = OutputArtifact::for_key(
                &self.context.output_root,
                &key,
                &self.context.plan,
                &self.context.encoding,
            );

            if ledger.is_complete(&key) {
                if artifact.is_present() {
                    skipped += 1;
                    continue;
                }
                debug!(key = %key, "Ledger success without artifacts, re-running");
            }

            jobs.push(DownloadJob::new(idx as u64 + 1, descriptor.clone(), artifact));
        }

        (jobs, skipped)
    }

    /// Runs the shard to completion or until `cancel` fires.
    ///
    /// Per-job failures never surface as errors; they end up in the report.
    pub async fn run(
        &self,
        shard: &LoadedShard,
        ledger: Arc<dyn Ledger>,
        cancel: CancellationToken,
    ) -> Result<ShardReport, ShardError> {
        let shard_name = shard.name();
        let (jobs, skipped_complete) = self.plan_jobs(shard, ledger.as_ref());
        metrics::SEGMENTS_SKIPPED.inc_by(skipped_complete as u64);
        metrics::SEGMENTS_TOTAL
            .with_label_values(&["rejected"])
            .inc_by(shard.rejected.len() as u64);

        info!(
            shard = %shard_name,
            subset = shard.subset.as_str(),
            jobs = jobs.len(),
            skipped_complete,
            rejected = shard.rejected.len(),
            workers = self.context.num_workers,
            "Starting shard"
        );

        // The queue holds the whole shard, so seeding never waits.
        let (job_tx, job_rx) = mpsc::channel(jobs.len().max(1));
        for job in jobs {
            if job_tx.try_send(job).is_err() {
                return Err(ShardError::Aggregator("job queue rejected a job".to_string()));
            }
            self.stats.queued.fetch_add(1, Ordering::Relaxed);
        }
        drop(job_tx);
        let job_rx = Arc::new(Mutex::new(job_rx));

        // Cancelled by the caller or by the failure limit.
        let run_cancel = cancel.child_token();
        let (handle, aggregator) = create_aggregator(ledger.clone(), self.context.num_workers * 2);
        let aggregator = aggregator
            .with_failure_limit(self.context.max_terminal_failures, run_cancel.clone());
        let aggregator_task = tokio::spawn(aggregator.run());

        // Jobs taken off the queue after cancellation, handed back untouched
        let unstarted = Arc::new(AtomicUsize::new(0));
        let mut workers = JoinSet::new();
        for worker_id in 0..self.context.num_workers {
            let job_rx = Arc::clone(&job_rx);
            let controller = Arc::clone(&self.controller);
            let stats = Arc::clone(&self.stats);
            let handle = handle.clone();
            let cancel = run_cancel.clone();
            let unstarted = Arc::clone(&unstarted);

            workers.spawn(async move {
                loop {
                    if cancel.is_cancelled() {
                        debug!(worker_id, "Worker stopping on cancellation");
                        break;
                    }
                    let job = match job_rx.lock().await.recv().await {
                        Some(job) => job,
                        None => break,
                    };
                    if cancel.is_cancelled() {
                        debug!(worker_id, job_id = job.id, "Worker stopping on cancellation");
                        unstarted.fetch_add(1, Ordering::Relaxed);
                        break;
                    }

                    stats.queued.fetch_sub(1, Ordering::Relaxed);
                    stats.active.fetch_add(1, Ordering::Relaxed);
                    metrics::ACTIVE_WORKERS.inc();

                    let outcome = controller.run(job, &cancel).await;

                    metrics::ACTIVE_WORKERS.dec();
                    stats.active.fetch_sub(1, Ordering::Relaxed);
                    stats.total_processed.fetch_add(1, Ordering::Relaxed);
                    if !outcome.is_success() {
                        stats.total_failed.fetch_add(1, Ordering::Relaxed);
                    }

                    handle.submit(outcome).await;
                }
            });
        }
        drop(handle);

        // A worker only panics while it owns a job, and that job never
        // reaches the aggregator.
        let mut lost_jobs = 0;
        while let Some(joined) = workers.join_next().await {
            if let Err(e) = joined {
                if e.is_panic() {
                    lost_jobs += 1;
                }
                error!(shard = %shard_name, error = %e, "Worker task failed");
            }
        }

        let aggregate = aggregator_task
            .await
            .map_err(|e| ShardError::Aggregator(e.to_string()))?;

        let not_started = {
            let mut rx = job_rx.lock().await;
            let mut remaining = 0;
            while rx.try_recv().is_ok() {
                remaining += 1;
            }
            remaining + unstarted.load(Ordering::Relaxed)
        };
        self.stats.queued.store(0, Ordering::Relaxed);

        let mut failures = aggregate.failures;
        failures
            .failures
            .extend(shard.rejected.iter().map(FailureRecord::rejected_row));

        let summary = RunSummary {
            total: shard.descriptors.len() + shard.rejected.len(),
            succeeded: aggregate.succeeded,
            terminal_failed: aggregate.terminal_failed + shard.rejected.len(),
            skipped_complete,
            cancelled: aggregate.cancelled + lost_jobs,
            not_started,
            rejected_rows: shard.rejected.len(),
            aborted_early: aggregate.aborted_early,
            non_resumable: !ledger.is_resumable() || aggregate.ledger_write_failures > 0,
        };

        if summary.is_complete() {
            info!(
                shard = %shard_name,
                succeeded = summary.succeeded,
                terminal_failed = summary.terminal_failed,
                skipped_complete = summary.skipped_complete,
                "Shard complete"
            );
        } else {
            warn!(
                shard = %shard_name,
                succeeded = summary.succeeded,
                terminal_failed = summary.terminal_failed,
                cancelled = summary.cancelled,
                not_started = summary.not_started,
                aborted_early = summary.aborted_early,
                "Shard stopped before completion"
            );
        }

        Ok(ShardReport {
            shard: shard_name,
            subset: shard.subset.as_str().to_string(),
            generated_at: Utc::now(),
            summary,
            failures,
        })
    }
}

/// Creates `dir` and proves it is writable with a probe file.
pub async fn ensure_writable_dir(dir: &Path) -> Result<(), ShardError> {
    let err = |source| ShardError::OutputRoot {
        path: dir.to_path_buf(),
        source,
    };
    tokio::fs::create_dir_all(dir).await.map_err(err)?;

    let marker = dir.join(format!(".write-check-{}", uuid::Uuid::new_v4()));
    tokio::fs::write(&marker, b"ok").await.map_err(err)?;
    tokio::fs::remove_file(&marker).await.map_err(err)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ledger::{LedgerEntry, SqliteLedger};
    use crate::segment::{parse_shard, MalformedRowPolicy, Subset};
    use crate::testing::{fixtures, ExtractBehavior, MockExtractor, MockFetcher};
    use tempfile::TempDir;

    fn runner(root: &Path) -> ShardRunner<MockFetcher, MockExtractor> {
        let config = fixtures::test_config(root);
        ShardRunner::new(
            RunContext::from_config(&config),
            Arc::new(MockFetcher::new(config.scratch_dir())),
            Arc::new(MockExtractor::new()),
        )
    }

    fn shard(rows: &[(&str, f64, f64)]) -> LoadedShard {
        parse_shard(
            Path::new("eval_segments.csv"),
            &fixtures::shard_csv(rows),
            Subset::Eval,
            MalformedRowPolicy::Reject,
            0,
        )
        .unwrap()
    }

    #[test]
    fn test_plan_jobs_skips_only_present_successes() {
        let dir = TempDir::new().unwrap();
        let runner = runner(dir.path());
        let shard = shard(&[("done", 0.0, 10.0), ("lost", 0.0, 10.0), ("new", 0.0, 10.0)]);
        let ledger = SqliteLedger::in_memory().unwrap();

        for descriptor in &shard.descriptors[..2] {
            ledger
                .record(&LedgerEntry::success(&descriptor.key(), 1))
                .unwrap();
        }
        // Only "done" still has its files
        let (jobs, _) = runner.plan_jobs(&shard, &ledger);
        let done = jobs.iter().find(|j| j.descriptor.video_id == "done").unwrap();
        for path in done.artifact.paths() {
            std::fs::create_dir_all(path.parent().unwrap()).unwrap();
            std::fs::write(path, b"media").unwrap();
        }

        let (jobs, skipped) = runner.plan_jobs(&shard, &ledger);
        assert_eq!(skipped, 1);
        let ids: Vec<&str> = jobs.iter().map(|j| j.descriptor.video_id.as_str()).collect();
        assert_eq!(ids, vec!["lost", "new"]);
    }

    #[tokio::test]
    async fn test_status_after_run() {
        let dir = TempDir::new().unwrap();
        let runner = runner(dir.path());
        assert_eq!(runner.status().workers, 2);

        let shard = shard(&[("a", 0.0, 10.0), ("b", 0.0, 10.0), ("c", 5.0, 1.0)]);
        let ledger = Arc::new(SqliteLedger::in_memory().unwrap());
        let report = runner
            .run(&shard, ledger, CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(report.summary.succeeded, 2);
        assert!(report.summary.non_resumable);
        let status = runner.status();
        assert_eq!(status.active_jobs, 0);
        assert_eq!(status.queued_jobs, 0);
        assert_eq!(status.total_processed, 3);
        assert_eq!(status.total_failed, 1);
    }

    #[tokio::test]
    async fn test_cancelled_before_start_runs_nothing() {
        let dir = TempDir::new().unwrap();
        let config = fixtures::test_config(dir.path());
        let fetcher = Arc::new(MockFetcher::new(config.scratch_dir()));
        let runner = ShardRunner::new(
            RunContext::from_config(&config),
            Arc::clone(&fetcher),
            Arc::new(MockExtractor::new()),
        );
        let shard = shard(&[("a", 0.0, 10.0), ("b", 0.0, 10.0), ("c", 0.0, 10.0)]);

        let cancel = CancellationToken::new();
        cancel.cancel();
        let report = runner
            .run(&shard, Arc::new(SqliteLedger::in_memory().unwrap()), cancel)
            .await
            .unwrap();

        assert_eq!(fetcher.total_fetches().await, 0);
        assert_eq!(report.summary.not_started, 3);
        assert_eq!(report.summary.cancelled, 0);
        assert_eq!(runner.status().total_processed, 0);
    }

    #[tokio::test]
    async fn test_panicked_worker_job_is_counted() {
        let dir = TempDir::new().unwrap();
        let config = fixtures::test_config(dir.path());
        let extractor = MockExtractor::new();
        extractor.script("boom", vec![ExtractBehavior::Panic]).await;
        let runner = ShardRunner::new(
            RunContext::from_config(&config),
            Arc::new(MockFetcher::new(config.scratch_dir())),
            Arc::new(extractor),
        );
        let shard = shard(&[("a", 0.0, 10.0), ("boom", 0.0, 10.0), ("b", 0.0, 10.0)]);

        let report = runner
            .run(
                &shard,
                Arc::new(SqliteLedger::in_memory().unwrap()),
                CancellationToken::new(),
            )
            .await
            .unwrap();

        let summary = &report.summary;
        assert_eq!(summary.succeeded, 2);
        assert_eq!(summary.cancelled, 1);
        assert_eq!(
            summary.succeeded + summary.terminal_failed + summary.cancelled + summary.not_started,
            summary.total
        );
        assert!(!summary.is_complete());
    }

    #[tokio::test]
    async fn test_empty_shard_completes() {
        let dir = TempDir::new().unwrap();
        let runner = runner(dir.path());
        let report = runner
            .run(
                &shard(&[]),
                Arc::new(SqliteLedger::in_memory().unwrap()),
                CancellationToken::new(),
            )
            .await
            .unwrap();

        assert_eq!(report.summary.total, 0);
        assert!(report.summary.is_complete());
        assert!(report.failures.is_empty());
    }

    #[tokio::test]
    async fn test_ensure_writable_dir() {
        let dir = TempDir::new().unwrap();
        let target = dir.path().join("nested/out");
        ensure_writable_dir(&target).await.unwrap();
        assert!(target.is_dir());
        assert_eq!(std::fs::read_dir(&target).unwrap().count(), 0);

        let file = dir.path().join("plain-file");
        std::fs::write(&file, b"x").unwrap();
        assert!(matches!(
            ensure_writable_dir(&file.join("sub")).await,
            Err(ShardError::OutputRoot { .. })
        ));
    }
}
