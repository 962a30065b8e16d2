//! Per-shard outcome aggregation and failure reports.

mod aggregator;
mod types;

pub use aggregator::{create_aggregator, AggregateResult, AggregatorHandle, ResultAggregator};
pub use types::{
    write_atomic, FailureRecord, FailureReport, ReportError, RunSummary, ShardReport,
};
