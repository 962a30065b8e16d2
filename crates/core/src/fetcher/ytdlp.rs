//! yt-dlp based fetcher implementation.

use async_trait::async_trait;
use once_cell::sync::Lazy;
use regex_lite::Regex;
use serde::Deserialize;
use std::path::PathBuf;
use std::time::{Duration, Instant};
use tracing::{debug, warn};

use super::error::FetchError;
use super::traits::Fetcher;
use super::types::{ScratchDir, StreamHandle, StreamSource};
use crate::config::FetcherConfig;
use crate::metrics;
use crate::process::{check_executable, excerpt, run_bounded};
use crate::segment::{StreamKind, StreamPlan};

static HTTP_STATUS: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"HTTP Error (\d{3})").expect("valid regex"));

/// Messages yt-dlp prints for videos that will never become available.
const NOT_FOUND_MARKERS: &[&str] = &[
    "video unavailable",
    "private video",
    "this video has been removed",
    "video has been removed",
    "not available in your country",
    "account associated with this video has been terminated",
    "sign in to confirm your age",
    "this video is no longer available",
    "does not exist",
    "is not a valid url",
    "incomplete youtube id",
];

/// Messages yt-dlp prints when the source throttles us.
const RATE_LIMIT_MARKERS: &[&str] = &[
    "too many requests",
    "rate limit",
    "rate-limit",
    "sign in to confirm you're not a bot",
    "sign in to confirm you’re not a bot",
];

/// Classifies a failed yt-dlp invocation from its stderr.
///
/// Anything not recognised as permanent or throttling is treated as a
/// transient network error.
pub fn classify_stderr(video_id: &str, stderr: &str) -> FetchError {
    let lower = stderr.to_lowercase();
    let reason = excerpt(stderr);

    if RATE_LIMIT_MARKERS.iter().any(|m| lower.contains(m)) {
        return FetchError::rate_limited(video_id, reason);
    }

    if let Some(status) = HTTP_STATUS
        .captures(stderr)
        .and_then(|c| c.get(1))
        .and_then(|m| m.as_str().parse::<u16>().ok())
    {
        match status {
            429 => return FetchError::rate_limited(video_id, reason),
            404 | 410 | 451 => return FetchError::not_found(video_id, reason),
            _ => return FetchError::network(video_id, reason),
        }
    }

    if NOT_FOUND_MARKERS.iter().any(|m| lower.contains(m)) {
        return FetchError::not_found(video_id, reason);
    }

    FetchError::network(video_id, reason)
}

#[derive(Debug, Deserialize)]
struct YtDlpInfo {
    duration: Option<f64>,
    url: Option<String>,
    format_id: Option<String>,
    vcodec: Option<String>,
    acodec: Option<String>,
    #[serde(default)]
    requested_formats: Vec<YtDlpFormat>,
}

#[derive(Debug, Deserialize)]
struct YtDlpFormat {
    url: Option<String>,
    format_id: Option<String>,
    vcodec: Option<String>,
    acodec: Option<String>,
}

fn codec_present(codec: &Option<String>) -> bool {
    codec.as_deref().map(|c| c != "none").unwrap_or(false)
}

/// Fetcher that resolves direct stream URLs with yt-dlp.
///
/// The transcoder reads the returned URLs directly, so only the requested
/// window is downloaded.
pub struct YtDlpFetcher {
    config: FetcherConfig,
    scratch_root: PathBuf,
}

impl YtDlpFetcher {
    /// Creates a fetcher that places per-fetch scratch dirs under `scratch_root`.
    pub fn new(config: FetcherConfig, scratch_root: PathBuf) -> Self {
        Self {
            config,
            scratch_root,
        }
    }

    fn page_url(&self, video_id: &str) -> String {
        self.config.page_url_template.replace("{id}", video_id)
    }

    fn build_args(&self, video_id: &str, kind: StreamKind) -> Vec<String> {
        let mut args = vec![
            "--no-playlist".to_string(),
            "--no-warnings".to_string(),
            "--dump-single-json".to_string(),
            "-f".to_string(),
            kind.format_selector().to_string(),
        ];
        args.extend(self.config.extra_args.iter().cloned());
        // A leading dash in an id must not be read as an option.
        args.push("--".to_string());
        args.push(self.page_url(video_id));
        args
    }

    /// Parses yt-dlp's JSON into a stream source and duration.
    fn parse_info(
        video_id: &str,
        kind: StreamKind,
        output: &str,
    ) -> Result<(StreamSource, Option<f64>), FetchError> {
        let info: YtDlpInfo = serde_json::from_str(output).map_err(|e| {
            FetchError::network(video_id, format!("Unreadable yt-dlp output: {}", e))
        })?;

        let (location, format_id, vcodec, acodec) = match info.url {
            Some(url) => (url, info.format_id, info.vcodec, info.acodec),
            None => {
                let first = info
                    .requested_formats
                    .into_iter()
                    .find(|f| f.url.is_some())
                    .ok_or_else(|| FetchError::network(video_id, "yt-dlp returned no stream URL"))?;
                (
                    first.url.unwrap_or_default(),
                    first.format_id,
                    first.vcodec,
                    first.acodec,
                )
            }
        };

        let source = StreamSource {
            kind,
            location,
            format_id,
            has_video: codec_present(&vcodec),
            has_audio: codec_present(&acodec),
        };
        Ok((source, info.duration))
    }

    async fn resolve(
        &self,
        video_id: &str,
        kind: StreamKind,
    ) -> Result<(StreamSource, Option<f64>), FetchError> {
        let args = self.build_args(video_id, kind);
        let output = run_bounded(
            &self.config.ytdlp_path,
            &args,
            Duration::from_secs(self.config.timeout_secs),
        )
        .await
        .map_err(|e| FetchError::from_process(video_id, e))?;

        if !output.success() {
            let err = classify_stderr(video_id, &output.stderr);
            debug!(video_id, ?kind, error = %err, "yt-dlp failed");
            return Err(err);
        }

        Self::parse_info(video_id, kind, &output.stdout)
    }
}

#[async_trait]
impl Fetcher for YtDlpFetcher {
    fn name(&self) -> &str {
        "yt-dlp"
    }

    async fn fetch(&self, video_id: &str, plan: &StreamPlan) -> Result<StreamHandle, FetchError> {
        let start = Instant::now();
        let scratch_name = format!("{}-{}", video_id.trim_start_matches('-'), uuid::Uuid::new_v4());
        let scratch = ScratchDir::create(&self.scratch_root, &scratch_name).await?;

        let mut sources = Vec::new();
        let mut duration = None;
        for kind in plan.required_streams() {
            let (source, source_duration) = self.resolve(video_id, kind).await?;
            if kind == StreamKind::Muxed && !(source.has_audio && source.has_video) {
                warn!(video_id, "Best combined stream is missing audio or video");
            }
            duration = duration.or(source_duration);
            sources.push(source);
        }

        metrics::FETCH_DURATION.observe(start.elapsed().as_secs_f64());
        Ok(StreamHandle::new(video_id, duration, sources, scratch))
    }

    async fn validate(&self) -> Result<(), FetchError> {
        check_executable(&self.config.ytdlp_path, "--version")
            .await
            .map_err(|e| FetchError::Unavailable(e.to_string()))?;
        tokio::fs::create_dir_all(&self.scratch_root).await?;
        Ok(())
    }
}
