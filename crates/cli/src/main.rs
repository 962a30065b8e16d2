use std::fs::{File, OpenOptions};
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::{Arc, Mutex};

use anyhow::{Context, Result};
use sha2::{Digest, Sha256};
use tokio::signal;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use audiosetdl_core::{
    ensure_writable_dir, load_config, load_shard, metrics, validate_config, Config, Extractor,
    FfmpegExtractor, Fetcher, LoadedShard, RunContext, RunSummary, ShardRunner, SqliteLedger,
    YtDlpFetcher,
};

/// Application version
const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Exit code for a run stopped by SIGINT/SIGTERM.
const EXIT_INTERRUPTED: u8 = 130;

#[tokio::main]
async fn main() -> ExitCode {
    match run().await {
        Ok(code) => code,
        Err(e) => {
            error!("Fatal error: {:#}", e);
            ExitCode::FAILURE
        }
    }
}

async fn run() -> Result<ExitCode> {
    let config_path = config_path();
    let loaded = load_config(&config_path)
        .with_context(|| format!("Failed to load config from {:?}", config_path))
        .and_then(|config| {
            validate_config(&config).context("Configuration validation failed")?;
            Ok(config)
        });

    // Logging depends on the config, so a bad config is reported on the console only
    init_logging(loaded.as_ref().ok());
    let config = loaded?;

    let config_json = serde_json::to_string(&config).unwrap_or_default();
    let config_hash = format!("{:x}", Sha256::digest(config_json.as_bytes()));
    info!(
        version = VERSION,
        config = ?config_path,
        config_hash = &config_hash[..16],
        "audiosetdl starting"
    );
    info!("Output root: {:?}", config.output_root_dir);
    info!(
        "Workers: {}, retries: {}, mode: {:?}",
        config.num_workers, config.num_retries, config.video_mode
    );

    // Fatal setup checks, all before any segment work
    ensure_writable_dir(&config.output_root_dir).await?;

    let fetcher = Arc::new(YtDlpFetcher::new(
        config.fetcher.clone(),
        config.scratch_dir(),
    ));
    fetcher.validate().await?;

    let extractor = Arc::new(FfmpegExtractor::new(config.extractor.clone()));
    extractor
        .validate()
        .await
        .context("Transcoder is not runnable")?;

    let shards = load_shards(&config)?;
    info!("Loaded {} shard(s)", shards.len());

    let cancel = CancellationToken::new();
    let signal_cancel = cancel.clone();
    tokio::spawn(async move {
        shutdown_signal().await;
        warn!("Shutdown requested, finishing in-flight attempts");
        signal_cancel.cancel();
    });

    let runner = ShardRunner::new(RunContext::from_config(&config), fetcher, extractor);
    let mut overall = RunSummary::default();

    for shard in &shards {
        if cancel.is_cancelled() {
            info!(shard = %shard.name(), "Skipping shard after shutdown");
            overall.not_started += shard.descriptors.len();
            continue;
        }

        let ledger_path = config.ledger_path(&shard.name());
        let ledger = Arc::new(
            SqliteLedger::open_or_recover(&ledger_path)
                .with_context(|| format!("Ledger {:?} is unusable", ledger_path))?,
        );

        let report = runner
            .run(shard, ledger, cancel.clone())
            .await
            .with_context(|| format!("Shard {} failed", shard.name()))?;

        match report.write_to_dir(&config.report_dir()) {
            Ok((json, _)) => info!("Failure report written to {:?}", json),
            Err(e) => error!("Failed to write report for {}: {}", report.shard, e),
        }
        if report.summary.non_resumable {
            warn!(
                shard = %report.shard,
                "Ledger could not be persisted; a re-run will redo this shard"
            );
        }
        overall.merge(&report.summary);
    }

    if let Some(path) = &config.report.metrics_path {
        if let Err(e) = metrics::write_textfile(path) {
            error!("Failed to write metrics to {:?}: {}", path, e);
        }
    }

    info!(
        total = overall.total,
        succeeded = overall.succeeded,
        terminal_failed = overall.terminal_failed,
        skipped_complete = overall.skipped_complete,
        cancelled = overall.cancelled,
        not_started = overall.not_started,
        "Run finished"
    );

    let code = exit_code(cancel.is_cancelled(), &overall);
    if code == EXIT_INTERRUPTED {
        warn!("Run interrupted before completion");
    }
    Ok(ExitCode::from(code))
}

/// Terminal segment failures are reported, not fatal. Only a signal that
/// left work unfinished changes the exit status.
fn exit_code(interrupted: bool, summary: &RunSummary) -> u8 {
    if interrupted && !summary.is_complete() {
        EXIT_INTERRUPTED
    } else {
        0
    }
}

/// First argument, then `AUDIOSETDL_CONFIG`, then `audiosetdl.toml`.
fn config_path() -> PathBuf {
    std::env::args_os()
        .nth(1)
        .map(PathBuf::from)
        .or_else(|| std::env::var_os("AUDIOSETDL_CONFIG").map(PathBuf::from))
        .unwrap_or_else(|| PathBuf::from("audiosetdl.toml"))
}

/// The console layer is always installed. A log file that cannot be opened
/// is reported through it and file logging is skipped.
fn init_logging(config: Option<&Config>) {
    let default_level = match config {
        Some(c) if c.verbose => "debug",
        _ => "info",
    };
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| default_level.into());

    let log_root = config
        .filter(|c| c.logging_enabled)
        .map(|c| c.output_root_dir.as_path());
    let (file, file_error) = match open_log_sink(log_root) {
        Ok(file) => (file, None),
        Err(e) => (None, Some(e)),
    };
    let file_layer = file.map(|file| {
        tracing_subscriber::fmt::layer()
            .with_ansi(false)
            .with_writer(Mutex::new(file))
    });

    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer())
        .with(file_layer)
        .init();

    if let Some(e) = file_error {
        warn!("File logging disabled: {:#}", e);
    }
}

/// Opens `audiosetdl.log` under `output_root`, or nothing when file logging is off.
fn open_log_sink(output_root: Option<&Path>) -> Result<Option<File>> {
    output_root
        .map(|root| open_log_file(&root.join("audiosetdl.log")))
        .transpose()
}

fn open_log_file(path: &Path) -> Result<File> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create log directory {:?}", parent))?;
    }
    OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .with_context(|| format!("Failed to open log file {:?}", path))
}

fn load_shards(config: &Config) -> Result<Vec<LoadedShard>> {
    config
        .shards
        .all()
        .into_iter()
        .map(|(subset, path)| {
            let shard = load_shard(
                path,
                subset,
                config.catalog.malformed_rows,
                config.catalog.skip_header_lines,
            )
            .with_context(|| format!("Failed to load shard {:?}", path))?;
            if !shard.rejected.is_empty() {
                warn!(
                    shard = %shard.name(),
                    rejected = shard.rejected.len(),
                    "Shard has malformed rows"
                );
            }
            Ok(shard)
        })
        .collect()
}

/// Wait for shutdown signal (Ctrl+C or SIGTERM)
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!("Failed to install Ctrl+C handler: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                error!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_open_log_file_creates_parent() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("out/audiosetdl.log");

        let mut file = open_log_file(&path).unwrap();
        std::io::Write::write_all(&mut file, b"first\n").unwrap();
        drop(file);
        let mut file = open_log_file(&path).unwrap();
        std::io::Write::write_all(&mut file, b"second\n").unwrap();

        assert_eq!(std::fs::read_to_string(&path).unwrap(), "first\nsecond\n");
    }

    #[test]
    fn test_log_sink_error_names_path() {
        let dir = TempDir::new().unwrap();
        let blocker = dir.path().join("not-a-dir");
        std::fs::write(&blocker, b"x").unwrap();

        assert!(open_log_sink(None).unwrap().is_none());

        let err = open_log_sink(Some(&blocker.join("out"))).unwrap_err();
        let rendered = format!("{:#}", err);
        assert!(rendered.contains("not-a-dir"), "{}", rendered);

        let sink = open_log_sink(Some(&dir.path().join("out"))).unwrap();
        assert!(sink.is_some());
        assert!(dir.path().join("out/audiosetdl.log").is_file());
    }

    #[test]
    fn test_exit_code_terminal_failures_succeed() {
        let summary = RunSummary {
            total: 4,
            succeeded: 1,
            terminal_failed: 3,
            ..Default::default()
        };
        assert_eq!(exit_code(false, &summary), 0);
        // A signal that arrives after every job finished does not count
        assert_eq!(exit_code(true, &summary), 0);
    }

    #[test]
    fn test_exit_code_interrupted_with_pending_work() {
        let summary = RunSummary {
            total: 4,
            succeeded: 1,
            not_started: 3,
            ..Default::default()
        };
        assert_eq!(exit_code(true, &summary), EXIT_INTERRUPTED);

        let summary = RunSummary {
            total: 4,
            succeeded: 3,
            cancelled: 1,
            ..Default::default()
        };
        assert_eq!(exit_code(true, &summary), EXIT_INTERRUPTED);
    }

    #[test]
    fn test_exit_code_failure_limit_without_signal() {
        let summary = RunSummary {
            total: 10,
            terminal_failed: 3,
            not_started: 7,
            aborted_early: true,
            ..Default::default()
        };
        assert!(!summary.is_complete());
        assert_eq!(exit_code(false, &summary), 0);
    }

    #[tokio::test]
    async fn test_output_root_error_names_cause_once() {
        let dir = TempDir::new().unwrap();
        let blocker = dir.path().join("plain-file");
        std::fs::write(&blocker, b"x").unwrap();

        let err = anyhow::Error::from(
            ensure_writable_dir(&blocker.join("out")).await.unwrap_err(),
        );
        let rendered = format!("{:#}", err);
        let cause = err.chain().nth(1).unwrap().to_string();
        assert_eq!(rendered.matches(cause.as_str()).count(), 1, "{}", rendered);
        assert!(rendered.contains("plain-file"), "{}", rendered);
    }
}
