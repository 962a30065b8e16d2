//! Worker pool that runs a shard's jobs concurrently.

mod error;
mod runner;
mod types;

pub use error::ShardError;
pub use runner::{ensure_writable_dir, ShardRunner};
pub use types::{PoolStatus, RunContext};
