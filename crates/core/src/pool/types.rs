//! Types for the worker pool.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};

use crate::config::{Config, EncodingConfig};
use crate::retry::{JobTimeouts, RetryPolicy};
use crate::segment::StreamPlan;

/// Everything a shard run needs, resolved once from the configuration.
#[derive(Debug, Clone)]
pub struct RunContext {
    pub plan: StreamPlan,
    pub encoding: EncodingConfig,
    pub retry: RetryPolicy,
    pub timeouts: JobTimeouts,
    pub output_root: PathBuf,
    pub num_workers: usize,
    pub max_terminal_failures: Option<usize>,
}

impl RunContext {
    pub fn from_config(config: &Config) -> Self {
        let plan = config.video_mode.plan();
        Self {
            plan,
            encoding: config.encoding.clone(),
            retry: RetryPolicy::from_config(config.num_retries, &config.retry),
            timeouts: JobTimeouts::from_config(config, &plan),
            output_root: config.output_root_dir.clone(),
            num_workers: config.num_workers.max(1),
            max_terminal_failures: config.max_terminal_failures,
        }
    }
}

/// Snapshot of the pool.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PoolStatus {
    pub workers: usize,
    pub active_jobs: usize,
    pub queued_jobs: usize,
    pub total_processed: u64,
    pub total_failed: u64,
}

/// Live counters behind [`PoolStatus`].
#[derive(Debug, Default)]
pub(crate) struct PoolStats {
    pub active: AtomicU64,
    pub queued: AtomicU64,
    pub total_processed: AtomicU64,
    pub total_failed: AtomicU64,
}

impl PoolStats {
    pub fn to_status(&self, workers: usize) -> PoolStatus {
        PoolStatus {
            workers,
            active_jobs: self.active.load(Ordering::Relaxed) as usize,
            queued_jobs: self.queued.load(Ordering::Relaxed) as usize,
            total_processed: self.total_processed.load(Ordering::Relaxed),
            total_failed: self.total_failed.load(Ordering::Relaxed),
        }
    }
}
