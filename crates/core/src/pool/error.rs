//! Fatal errors for a shard run.

use std::path::PathBuf;
use thiserror::Error;

use crate::extractor::ExtractError;
use crate::fetcher::FetchError;
use crate::ledger::LedgerError;
use crate::segment::CatalogError;

/// Errors that stop a run before (or instead of) scheduling work.
///
/// Messages leave the cause to [`std::error::Error::source`], so a `{:#}`
/// chain prints each cause once.
#[derive(Debug, Error)]
pub enum ShardError {
    #[error(transparent)]
    Catalog(#[from] CatalogError),

    #[error("Ledger unavailable")]
    Ledger(#[from] LedgerError),

    #[error("Output directory {path} is not writable")]
    OutputRoot {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Fetcher unavailable")]
    Fetcher(#[source] FetchError),

    #[error("Extractor unavailable")]
    Extractor(#[source] ExtractError),

    #[error("Result aggregator failed: {0}")]
    Aggregator(String),
}
