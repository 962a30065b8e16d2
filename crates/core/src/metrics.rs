//! Prometheus metrics for the acquisition pipeline.
//!
//! Batch runs have no scrape endpoint, so the registry is rendered to the
//! text exposition format and written to a file after each shard
//! (node-exporter textfile collector style).

use once_cell::sync::Lazy;
use prometheus::{
    Encoder, Histogram, HistogramOpts, IntCounter, IntCounterVec, IntGauge, Opts, Registry,
    TextEncoder,
};
use std::path::Path;

/// Global metrics registry.
pub static REGISTRY: Lazy<Registry> = Lazy::new(|| {
    let registry = Registry::new();
    for metric in all_metrics() {
        // Names are unique, registration cannot collide.
        let _ = registry.register(metric);
    }
    registry
});

// =============================================================================
// Segment outcomes
// =============================================================================

/// Segments by final outcome.
pub static SEGMENTS_TOTAL: Lazy<IntCounterVec> = Lazy::new(|| {
    IntCounterVec::new(
        Opts::new("audiosetdl_segments_total", "Segments by final outcome"),
        &["outcome"], // "succeeded", "terminal_failed", "cancelled", "rejected"
    )
    .unwrap()
});

/// Segments skipped because the ledger already has them.
pub static SEGMENTS_SKIPPED: Lazy<IntCounter> = Lazy::new(|| {
    IntCounter::new(
        "audiosetdl_segments_skipped_total",
        "Segments skipped as already complete",
    )
    .unwrap()
});

/// Failed attempts by classified error kind.
pub static ATTEMPT_FAILURES: Lazy<IntCounterVec> = Lazy::new(|| {
    IntCounterVec::new(
        Opts::new(
            "audiosetdl_attempt_failures_total",
            "Failed fetch/extract attempts by error kind",
        ),
        &["error_kind"],
    )
    .unwrap()
});

/// Ledger writes that failed.
pub static LEDGER_WRITE_FAILURES: Lazy<IntCounter> = Lazy::new(|| {
    IntCounter::new(
        "audiosetdl_ledger_write_failures_total",
        "Ledger rows that could not be written",
    )
    .unwrap()
});

// =============================================================================
// External processes
// =============================================================================

/// Time spent resolving source streams.
pub static FETCH_DURATION: Lazy<Histogram> = Lazy::new(|| {
    Histogram::with_opts(
        HistogramOpts::new(
            "audiosetdl_fetch_duration_seconds",
            "Duration of successful stream resolution",
        )
        .buckets(vec![0.5, 1.0, 2.5, 5.0, 10.0, 30.0, 60.0, 120.0]),
    )
    .unwrap()
});

/// Time spent cutting and transcoding a segment.
pub static EXTRACT_DURATION: Lazy<Histogram> = Lazy::new(|| {
    Histogram::with_opts(
        HistogramOpts::new(
            "audiosetdl_extract_duration_seconds",
            "Duration of successful segment extraction",
        )
        .buckets(vec![0.5, 1.0, 2.5, 5.0, 10.0, 30.0, 60.0, 120.0, 300.0]),
    )
    .unwrap()
});

/// Workers currently running a job.
pub static ACTIVE_WORKERS: Lazy<IntGauge> = Lazy::new(|| {
    IntGauge::new("audiosetdl_active_workers", "Workers currently running a job").unwrap()
});

/// All core metrics, for registration.
pub fn all_metrics() -> Vec<Box<dyn prometheus::core::Collector>> {
    vec![
        Box::new(SEGMENTS_TOTAL.clone()),
        Box::new(SEGMENTS_SKIPPED.clone()),
        Box::new(ATTEMPT_FAILURES.clone()),
        Box::new(LEDGER_WRITE_FAILURES.clone()),
        Box::new(FETCH_DURATION.clone()),
        Box::new(EXTRACT_DURATION.clone()),
        Box::new(ACTIVE_WORKERS.clone()),
    ]
}

/// Renders the registry in the text exposition format.
pub fn encode_metrics() -> Result<String, prometheus::Error> {
    let encoder = TextEncoder::new();
    let metric_families = REGISTRY.gather();
    let mut buffer = Vec::new();
    encoder.encode(&metric_families, &mut buffer)?;
    Ok(String::from_utf8_lossy(&buffer).into_owned())
}

/// Writes the rendered registry to `path` via temp file and rename.
pub fn write_textfile(path: &Path) -> std::io::Result<()> {
    let text = encode_metrics().map_err(std::io::Error::other)?;
    crate::report::write_atomic(path, text.as_bytes())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_encode_contains_registered_metrics() {
        SEGMENTS_TOTAL.with_label_values(&["succeeded"]).inc();
        let text = encode_metrics().unwrap();
        assert!(text.contains("audiosetdl_segments_total"));
    }

    #[test]
    fn test_write_textfile() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("metrics/audiosetdl.prom");
        SEGMENTS_SKIPPED.inc();

        write_textfile(&path).unwrap();
        let text = std::fs::read_to_string(&path).unwrap();
        assert!(text.contains("audiosetdl_segments_skipped_total"));
    }
}
