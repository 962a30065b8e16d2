//! Completion ledger: which segments already have a final outcome.

mod sqlite;
mod types;

pub use sqlite::SqliteLedger;
pub use types::{Ledger, LedgerEntry, LedgerError, Outcome};
