use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::segment::{MalformedRowPolicy, Subset, VideoMode};

/// Root configuration for a run.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Config {
    /// Directory under which `<subset>/audio` and `<subset>/video` are written.
    pub output_root_dir: PathBuf,
    #[serde(default = "default_num_workers")]
    pub num_workers: usize,
    #[serde(default = "default_num_retries")]
    pub num_retries: u32,
    #[serde(default)]
    pub video_mode: VideoMode,
    #[serde(default = "default_true")]
    pub logging_enabled: bool,
    #[serde(default)]
    pub verbose: bool,
    /// Stop scheduling new jobs in a shard once this many have failed terminally.
    #[serde(default)]
    pub max_terminal_failures: Option<usize>,
    pub shards: ShardsConfig,
    #[serde(default)]
    pub encoding: EncodingConfig,
    #[serde(default)]
    pub extractor: ExtractorConfig,
    #[serde(default)]
    pub fetcher: FetcherConfig,
    #[serde(default)]
    pub retry: RetryConfig,
    #[serde(default)]
    pub catalog: CatalogConfig,
    #[serde(default)]
    pub ledger: LedgerConfig,
    #[serde(default)]
    pub report: ReportConfig,
}

fn default_num_workers() -> usize {
    4
}

fn default_num_retries() -> u32 {
    3
}

fn default_true() -> bool {
    true
}

impl Config {
    /// Ledger directory, defaulting to `<output_root>/.ledger`.
    pub fn ledger_dir(&self) -> PathBuf {
        self.ledger
            .dir
            .clone()
            .unwrap_or_else(|| self.output_root_dir.join(".ledger"))
    }

    /// Failure report directory, defaulting to `<output_root>/.reports`.
    pub fn report_dir(&self) -> PathBuf {
        self.report
            .dir
            .clone()
            .unwrap_or_else(|| self.output_root_dir.join(".reports"))
    }

    /// Scratch directory for in-progress downloads and transcodes.
    pub fn scratch_dir(&self) -> PathBuf {
        self.output_root_dir.join(".tmp")
    }

    /// Ledger file for a shard.
    pub fn ledger_path(&self, shard_name: &str) -> PathBuf {
        self.ledger_dir().join(format!("{}.sqlite", shard_name))
    }
}

/// Shard files per subset.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct ShardsConfig {
    #[serde(default)]
    pub eval: Vec<PathBuf>,
    #[serde(default)]
    pub balanced_train: Vec<PathBuf>,
    #[serde(default)]
    pub unbalanced_train: Vec<PathBuf>,
}

impl ShardsConfig {
    /// All configured shards with their subset, in subset order.
    pub fn all(&self) -> Vec<(Subset, &Path)> {
        let eval = self.eval.iter().map(|p| (Subset::Eval, p.as_path()));
        let balanced = self
            .balanced_train
            .iter()
            .map(|p| (Subset::BalancedTrain, p.as_path()));
        let unbalanced = self
            .unbalanced_train
            .iter()
            .map(|p| (Subset::UnbalancedTrain, p.as_path()));
        eval.chain(balanced).chain(unbalanced).collect()
    }

    pub fn is_empty(&self) -> bool {
        self.eval.is_empty() && self.balanced_train.is_empty() && self.unbalanced_train.is_empty()
    }
}

/// Output codecs and containers.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct EncodingConfig {
    #[serde(default = "default_audio_codec")]
    pub audio_codec: String,
    #[serde(default = "default_audio_format")]
    pub audio_format: String,
    #[serde(default = "default_video_codec")]
    pub video_codec: String,
    #[serde(default = "default_video_format")]
    pub video_format: String,
    #[serde(default = "default_sample_rate")]
    pub audio_sample_rate: u32,
    #[serde(default = "default_channels")]
    pub audio_channels: u8,
    #[serde(default = "default_frame_rate")]
    pub video_frame_rate: u32,
}

fn default_audio_codec() -> String {
    "flac".to_string()
}

fn default_audio_format() -> String {
    "flac".to_string()
}

fn default_video_codec() -> String {
    "h264".to_string()
}

fn default_video_format() -> String {
    "mp4".to_string()
}

fn default_sample_rate() -> u32 {
    44100
}

fn default_channels() -> u8 {
    2
}

fn default_frame_rate() -> u32 {
    30
}

impl Default for EncodingConfig {
    fn default() -> Self {
        Self {
            audio_codec: default_audio_codec(),
            audio_format: default_audio_format(),
            video_codec: default_video_codec(),
            video_format: default_video_format(),
            audio_sample_rate: default_sample_rate(),
            audio_channels: default_channels(),
            video_frame_rate: default_frame_rate(),
        }
    }
}

/// ffmpeg / ffprobe settings.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ExtractorConfig {
    #[serde(default = "default_transcoder_path")]
    pub transcoder_path: PathBuf,
    #[serde(default = "default_probe_path")]
    pub probe_path: PathBuf,
    /// Timeout for a single ffmpeg invocation.
    #[serde(default = "default_extract_timeout")]
    pub timeout_secs: u64,
    #[serde(default = "default_log_level")]
    pub log_level: String,
    /// Probe outputs before publishing them.
    #[serde(default = "default_true")]
    pub validate_output: bool,
    /// Allowed difference between probed and requested duration.
    #[serde(default = "default_tolerance")]
    pub duration_tolerance_secs: f64,
    /// How far `end_seconds` may run past the reported source duration
    /// before the segment is rejected as out of range. The tail is then
    /// shorter than requested, so keep this at 0 unless source durations
    /// are known to be rounded down.
    #[serde(default)]
    pub range_tolerance_secs: f64,
}

fn default_transcoder_path() -> PathBuf {
    PathBuf::from("ffmpeg")
}

fn default_probe_path() -> PathBuf {
    PathBuf::from("ffprobe")
}

fn default_extract_timeout() -> u64 {
    300
}

fn default_log_level() -> String {
    "error".to_string()
}

fn default_tolerance() -> f64 {
    0.7
}

impl Default for ExtractorConfig {
    fn default() -> Self {
        Self {
            transcoder_path: default_transcoder_path(),
            probe_path: default_probe_path(),
            timeout_secs: default_extract_timeout(),
            log_level: default_log_level(),
            validate_output: true,
            duration_tolerance_secs: default_tolerance(),
            range_tolerance_secs: 0.0,
        }
    }
}

/// yt-dlp settings.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct FetcherConfig {
    #[serde(default = "default_ytdlp_path")]
    pub ytdlp_path: PathBuf,
    #[serde(default = "default_fetch_timeout")]
    pub timeout_secs: u64,
    /// Extra arguments appended before the page URL.
    #[serde(default)]
    pub extra_args: Vec<String>,
    /// `{id}` is replaced with the video id.
    #[serde(default = "default_page_url_template")]
    pub page_url_template: String,
}

fn default_ytdlp_path() -> PathBuf {
    PathBuf::from("yt-dlp")
}

fn default_fetch_timeout() -> u64 {
    120
}

fn default_page_url_template() -> String {
    "https://www.youtube.com/watch?v={id}".to_string()
}

impl Default for FetcherConfig {
    fn default() -> Self {
        Self {
            ytdlp_path: default_ytdlp_path(),
            timeout_secs: default_fetch_timeout(),
            extra_args: Vec::new(),
            page_url_template: default_page_url_template(),
        }
    }
}

/// Backoff shape between attempts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum BackoffKind {
    Fixed,
    #[default]
    Exponential,
}

/// Retry backoff configuration. The attempt bound is `num_retries`.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RetryConfig {
    #[serde(default)]
    pub backoff: BackoffKind,
    #[serde(default = "default_initial_delay")]
    pub initial_delay_ms: u64,
    #[serde(default = "default_max_delay")]
    pub max_delay_ms: u64,
    #[serde(default = "default_multiplier")]
    pub multiplier: f64,
    /// Spread each delay randomly up to the next backoff step.
    #[serde(default = "default_true")]
    pub jitter: bool,
}

fn default_initial_delay() -> u64 {
    2000
}

fn default_max_delay() -> u64 {
    60_000
}

fn default_multiplier() -> f64 {
    2.0
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            backoff: BackoffKind::default(),
            initial_delay_ms: default_initial_delay(),
            max_delay_ms: default_max_delay(),
            multiplier: default_multiplier(),
            jitter: true,
        }
    }
}

/// Shard parsing options.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct CatalogConfig {
    #[serde(default)]
    pub malformed_rows: MalformedRowPolicy,
    /// Fixed number of leading lines to ignore.
    #[serde(default)]
    pub skip_header_lines: usize,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct LedgerConfig {
    #[serde(default)]
    pub dir: Option<PathBuf>,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct ReportConfig {
    #[serde(default)]
    pub dir: Option<PathBuf>,
    /// Write Prometheus text metrics here after each shard.
    #[serde(default)]
    pub metrics_path: Option<PathBuf>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_deserialize_minimal_config() {
        let toml = r#"
output_root_dir = "/data/audioset"

[shards]
eval = ["eval_segments.csv.01"]
"#;
        let config: Config = toml::from_str(toml).unwrap();
        assert_eq!(config.num_workers, 4);
        assert_eq!(config.num_retries, 3);
        assert_eq!(config.video_mode, VideoMode::BestVideoAudio);
        assert!(config.logging_enabled);
        assert!(!config.verbose);
        assert_eq!(config.encoding.audio_codec, "flac");
        assert_eq!(config.encoding.video_format, "mp4");
        assert_eq!(config.extractor.transcoder_path, PathBuf::from("ffmpeg"));
        assert_eq!(config.retry.backoff, BackoffKind::Exponential);
        assert_eq!(config.catalog.malformed_rows, MalformedRowPolicy::Reject);
        assert_eq!(config.shards.all().len(), 1);
    }

    #[test]
    fn test_deserialize_full_config() {
        let toml = r#"
output_root_dir = "/data"
num_workers = 16
num_retries = 0
video_mode = "bestaudio"
logging_enabled = false
verbose = true
max_terminal_failures = 100

[shards]
balanced_train = ["a.csv", "b.csv"]
unbalanced_train = ["c.csv"]

[encoding]
audio_codec = "pcm_s16le"
audio_format = "wav"

[extractor]
transcoder_path = "/opt/ffmpeg/ffmpeg"
timeout_secs = 60

[retry]
backoff = "fixed"
initial_delay_ms = 500

[catalog]
malformed_rows = "abort"
skip_header_lines = 3
"#;
        let config: Config = toml::from_str(toml).unwrap();
        assert_eq!(config.num_workers, 16);
        assert_eq!(config.num_retries, 0);
        assert_eq!(config.video_mode, VideoMode::BestAudio);
        assert_eq!(config.max_terminal_failures, Some(100));
        assert_eq!(config.encoding.audio_format, "wav");
        assert_eq!(config.encoding.video_codec, "h264");
        assert_eq!(config.retry.backoff, BackoffKind::Fixed);
        assert_eq!(config.catalog.malformed_rows, MalformedRowPolicy::Abort);
        assert_eq!(config.catalog.skip_header_lines, 3);

        let shards = config.shards.all();
        assert_eq!(shards.len(), 3);
        assert_eq!(shards[0].0, Subset::BalancedTrain);
        assert_eq!(shards[2].0, Subset::UnbalancedTrain);
    }

    #[test]
    fn test_derived_paths() {
        let config: Config = toml::from_str(
            r#"
output_root_dir = "/data"
[shards]
"#,
        )
        .unwrap();
        assert_eq!(config.ledger_dir(), PathBuf::from("/data/.ledger"));
        assert_eq!(config.report_dir(), PathBuf::from("/data/.reports"));
        assert_eq!(
            config.ledger_path("eval.csv.01"),
            PathBuf::from("/data/.ledger/eval.csv.01.sqlite")
        );
    }

    #[test]
    fn test_missing_output_root_fails() {
        let result: Result<Config, _> = toml::from_str("[shards]\n");
        assert!(result.is_err());
    }
}
