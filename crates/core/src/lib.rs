//! Per-shard AudioSet segment acquisition.
//!
//! A shard file is loaded into segment descriptors, segments already in the
//! completion ledger are skipped, and the rest run through a fixed pool of
//! workers: fetch the source streams, cut and transcode the annotated window,
//! retry transient failures with backoff. Every final outcome lands in the
//! ledger and terminal failures in a per-shard report.

pub mod config;
pub mod extractor;
pub mod fetcher;
pub mod ledger;
pub mod metrics;
pub mod pool;
pub mod process;
pub mod report;
pub mod retry;
pub mod segment;
pub mod testing;

pub use config::{
    load_config, load_config_from_str, validate_config, BackoffKind, Config, ConfigError,
};
pub use extractor::{ExtractError, Extractor, FfmpegExtractor};
pub use fetcher::{FetchError, Fetcher, StreamHandle, YtDlpFetcher};
pub use ledger::{Ledger, LedgerEntry, LedgerError, Outcome, SqliteLedger};
pub use pool::{ensure_writable_dir, PoolStatus, RunContext, ShardError, ShardRunner};
pub use report::{FailureRecord, FailureReport, RunSummary, ShardReport};
pub use retry::{
    DownloadJob, ErrorKind, JobOutcome, JobResult, JobState, RetryController, RetryPolicy,
};
pub use segment::{
    load_shard, CatalogError, LoadedShard, MalformedRowPolicy, OutputArtifact,
    SegmentDescriptor, SegmentKey, Subset, VideoMode,
};
