//! Testing utilities and mock implementations.
//!
//! Mocks stand in for the external fetcher and transcoder so the full shard
//! pipeline can run without network access or codec binaries.
//!
//! # Example
//!
//! ```rust,ignore
//! use audiosetdl_core::testing::{FetchBehavior, MockExtractor, MockFetcher};
//!
//! let fetcher = MockFetcher::new(root.join(".tmp"));
//! fetcher.script("gone", vec![FetchBehavior::NotFound]).await;
//! let extractor = MockExtractor::new();
//! ```

mod mock_extractor;
mod mock_fetcher;

pub use mock_extractor::{ExtractBehavior, MockExtractor};
pub use mock_fetcher::{FetchBehavior, MockFetcher};

/// Test fixtures and helper functions.
pub mod fixtures {
    use std::path::{Path, PathBuf};

    use crate::config::{Config, RetryConfig, ShardsConfig};
    use crate::segment::{SegmentDescriptor, Subset};

    /// A descriptor in the eval subset.
    pub fn descriptor(video_id: &str, start: f64, end: f64) -> SegmentDescriptor {
        SegmentDescriptor {
            video_id: video_id.to_string(),
            start_seconds: start,
            end_seconds: end,
            subset: Subset::Eval,
            labels: vec!["/m/09x0r".to_string()],
            line: 1,
        }
    }

    /// Shard file contents in the AudioSet layout, header comments included.
    pub fn shard_csv(rows: &[(&str, f64, f64)]) -> String {
        let mut out = String::from(
            "# Segments csv created Sun Mar  5 10:54:31 2017\n\
             # num_ytids=3, num_segs=3, num_unique_labels=1, num_positive_labels=3\n\
             # YTID, start_seconds, end_seconds, positive_labels\n",
        );
        for (id, start, end) in rows {
            out.push_str(&format!("{}, {:.3}, {:.3}, \"/m/09x0r\"\n", id, start, end));
        }
        out
    }

    /// Writes `contents` to `dir/name` and returns the path.
    pub fn write_shard(dir: &Path, name: &str, contents: &str) -> PathBuf {
        let path = dir.join(name);
        std::fs::write(&path, contents).expect("write shard fixture");
        path
    }

    /// Configuration rooted at `root` with instant retries.
    pub fn test_config(root: &Path) -> Config {
        Config {
            output_root_dir: root.to_path_buf(),
            num_workers: 2,
            num_retries: 2,
            video_mode: Default::default(),
            logging_enabled: false,
            verbose: false,
            max_terminal_failures: None,
            shards: ShardsConfig::default(),
            encoding: Default::default(),
            extractor: Default::default(),
            fetcher: Default::default(),
            retry: RetryConfig {
                initial_delay_ms: 0,
                max_delay_ms: 0,
                jitter: false,
                ..Default::default()
            },
            catalog: Default::default(),
            ledger: Default::default(),
            report: Default::default(),
        }
    }
}
