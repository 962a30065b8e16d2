//! FFmpeg-based extractor implementation.

use async_trait::async_trait;
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};
use tokio::fs;
use tracing::{debug, warn};

use super::error::ExtractError;
use super::traits::Extractor;
use super::types::{ExtractionRequest, MediaInfo, OutputKind};
use crate::config::{EncodingConfig, ExtractorConfig};
use crate::fetcher::StreamHandle;
use crate::metrics;
use crate::process::{check_executable, run_bounded};
use crate::segment::OutputArtifact;

/// Codecs that accept 16-bit signed samples.
fn supports_s16(codec: &str) -> bool {
    codec == "flac" || codec == "alac" || codec.starts_with("pcm_s16")
}

/// Formats seconds the way ffmpeg accepts them.
fn secs(value: f64) -> String {
    format!("{:.3}", value)
}

/// FFmpeg-based extractor implementation.
pub struct FfmpegExtractor {
    config: ExtractorConfig,
}

impl FfmpegExtractor {
    /// Creates a new FFmpeg extractor with the given configuration.
    pub fn new(config: ExtractorConfig) -> Self {
        Self { config }
    }

    /// Creates an extractor with default configuration.
    pub fn with_defaults() -> Self {
        Self::new(ExtractorConfig::default())
    }

    /// Builds ffmpeg arguments for the video output.
    fn build_video_args(
        &self,
        input: &str,
        output: &Path,
        request: &ExtractionRequest,
    ) -> Vec<String> {
        let encoding = &request.encoding;
        let mut args = vec![
            "-y".to_string(),
            "-ss".to_string(),
            secs(request.start_seconds),
            "-i".to_string(),
            input.to_string(),
            "-t".to_string(),
            secs(request.duration_secs()),
            "-f".to_string(),
            encoding.video_format.clone(),
            "-r".to_string(),
            encoding.video_frame_rate.to_string(),
            "-vcodec".to_string(),
            encoding.video_codec.clone(),
        ];

        // Strip audio unless the plan keeps it in the video
        if !request.plan.video_keeps_audio {
            args.push("-an".to_string());
        }

        args.extend(["-loglevel".to_string(), self.config.log_level.clone()]);
        args.push(output.to_string_lossy().to_string());
        args
    }

    /// Builds ffmpeg arguments for the audio output.
    fn build_audio_args(
        &self,
        input: &str,
        output: &Path,
        request: &ExtractionRequest,
    ) -> Vec<String> {
        let encoding = &request.encoding;
        let mut args = vec![
            "-y".to_string(),
            "-ss".to_string(),
            secs(request.start_seconds),
            "-i".to_string(),
            input.to_string(),
            "-t".to_string(),
            secs(request.duration_secs()),
            "-vn".to_string(),
            "-ar".to_string(),
            encoding.audio_sample_rate.to_string(),
            "-ac".to_string(),
            encoding.audio_channels.to_string(),
        ];

        if supports_s16(&encoding.audio_codec) {
            args.extend(["-sample_fmt".to_string(), "s16".to_string()]);
        }

        args.extend([
            "-acodec".to_string(),
            encoding.audio_codec.clone(),
            "-loglevel".to_string(),
            self.config.log_level.clone(),
        ]);
        args.push(output.to_string_lossy().to_string());
        args
    }

    /// Rejects windows the source cannot cover. Never clamps.
    fn check_range(
        &self,
        handle: &StreamHandle,
        request: &ExtractionRequest,
    ) -> Result<(), ExtractError> {
        let (start, end) = (request.start_seconds, request.end_seconds);
        let well_formed = start >= 0.0 && end > start;
        if !well_formed {
            return Err(ExtractError::InvalidWindow { start, end });
        }
        if let Some(available) = handle.duration_secs {
            if available + self.config.range_tolerance_secs < end {
                return Err(ExtractError::Range {
                    start,
                    end,
                    available,
                });
            }
        }
        Ok(())
    }

    /// Parses ffprobe JSON output into MediaInfo.
    fn parse_probe_output(path: &Path, output: &str) -> Result<MediaInfo, ExtractError> {
        #[derive(Deserialize)]
        struct ProbeOutput {
            format: ProbeFormat,
            #[serde(default)]
            streams: Vec<ProbeStream>,
        }

        #[derive(Deserialize)]
        struct ProbeFormat {
            format_name: String,
            duration: Option<String>,
        }

        #[derive(Deserialize)]
        struct ProbeStream {
            codec_type: String,
            codec_name: Option<String>,
            sample_rate: Option<String>,
            channels: Option<u8>,
            r_frame_rate: Option<String>,
            duration: Option<String>,
        }

        let probe: ProbeOutput = serde_json::from_str(output).map_err(|e| {
            ExtractError::validation(path, format!("unreadable ffprobe output: {}", e))
        })?;

        let audio_stream = probe.streams.iter().find(|s| s.codec_type == "audio");
        let video_stream = probe.streams.iter().find(|s| s.codec_type == "video");

        let duration_secs = probe
            .format
            .duration
            .as_ref()
            .or_else(|| probe.streams.iter().find_map(|s| s.duration.as_ref()))
            .and_then(|d| d.parse::<f64>().ok())
            .unwrap_or(0.0);

        let format_name = probe
            .format
            .format_name
            .split(',')
            .next()
            .unwrap_or("unknown");

        Ok(MediaInfo {
            path: path.to_path_buf(),
            duration_secs,
            format: format_name.to_string(),
            audio_codec: audio_stream.and_then(|s| s.codec_name.clone()),
            audio_sample_rate: audio_stream
                .and_then(|s| s.sample_rate.as_ref())
                .and_then(|r| r.parse::<u32>().ok()),
            audio_channels: audio_stream.and_then(|s| s.channels),
            video_codec: video_stream.and_then(|s| s.codec_name.clone()),
            video_fps: video_stream
                .and_then(|s| s.r_frame_rate.as_ref())
                .and_then(|r| {
                    // Parse frame rate like "30000/1001" or "30/1"
                    let (num, den) = r.split_once('/')?;
                    let num = num.parse::<f32>().ok()?;
                    let den = den.parse::<f32>().ok()?;
                    (den > 0.0).then(|| num / den)
                }),
        })
    }

    /// Probes a media file.
    pub async fn probe(&self, path: &Path) -> Result<MediaInfo, ExtractError> {
        let output = run_bounded(
            &self.config.probe_path,
            [
                "-v",
                "quiet",
                "-print_format",
                "json",
                "-show_format",
                "-show_streams",
            ]
            .iter()
            .map(|s| s.to_string())
            .chain(std::iter::once(path.to_string_lossy().to_string())),
            Duration::from_secs(60),
        )
        .await
        .map_err(ExtractError::from_process)?;

        if !output.success() {
            return Err(ExtractError::validation(
                path,
                format!("ffprobe failed: {}", output.stderr_excerpt()),
            ));
        }

        Self::parse_probe_output(path, &output.stdout)
    }

    /// Checks a probed output against the request.
    fn check_output(
        &self,
        info: &MediaInfo,
        kind: OutputKind,
        request: &ExtractionRequest,
    ) -> Result<(), ExtractError> {
        let target = request.duration_secs();
        let tolerance = self.config.duration_tolerance_secs;
        if (info.duration_secs - target).abs() > tolerance {
            return Err(ExtractError::validation(
                &info.path,
                format!(
                    "expected duration {:.3}s, got {:.3}s",
                    target, info.duration_secs
                ),
            ));
        }

        match kind {
            OutputKind::Video if !info.has_video() => {
                Err(ExtractError::validation(&info.path, "no video stream"))
            }
            OutputKind::Audio if !info.has_audio() => {
                Err(ExtractError::validation(&info.path, "no audio stream"))
            }
            OutputKind::Audio => check_audio_params(info, &request.encoding),
            OutputKind::Video => Ok(()),
        }
    }

    /// Runs one ffmpeg invocation into the scratch directory.
    async fn run_output(
        &self,
        handle: &StreamHandle,
        kind: OutputKind,
        request: &ExtractionRequest,
        final_path: &Path,
    ) -> Result<PathBuf, ExtractError> {
        let stream_kind = match kind {
            OutputKind::Video => request.plan.video_stream,
            OutputKind::Audio => request.plan.audio_stream,
        }
        .ok_or_else(|| ExtractError::MissingStream(kind.as_str().to_string()))?;

        let source = handle
            .source(stream_kind)
            .ok_or_else(|| ExtractError::MissingStream(kind.as_str().to_string()))?;

        let file_name = final_path
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_else(|| format!("{}.out", request.artifact.basename));
        let temp_path = handle
            .scratch_dir()
            .join(format!("{}.{}", kind.as_str(), file_name));

        let args = match kind {
            OutputKind::Video => self.build_video_args(&source.location, &temp_path, request),
            OutputKind::Audio => self.build_audio_args(&source.location, &temp_path, request),
        };

        let start = Instant::now();
        let output = run_bounded(
            &self.config.transcoder_path,
            &args,
            Duration::from_secs(self.config.timeout_secs),
        )
        .await
        .map_err(ExtractError::from_process)?;

        if !output.success() {
            let stderr = output.stderr_excerpt();
            return Err(ExtractError::transcode_failed(
                format!("ffmpeg exited with code: {:?}", output.status_code),
                output.status_code,
                (!stderr.is_empty()).then_some(stderr),
            ));
        }

        let size = fs::metadata(&temp_path).await.map(|m| m.len()).unwrap_or(0);
        if size == 0 {
            return Err(ExtractError::transcode_failed(
                "output file missing or empty",
                output.status_code,
                None,
            ));
        }

        if self.config.validate_output {
            let info = self.probe(&temp_path).await?;
            self.check_output(&info, kind, request)?;
        }

        debug!(
            video_id = %handle.video_id,
            output = kind.as_str(),
            elapsed_ms = start.elapsed().as_millis() as u64,
            size,
            "Transcoded segment output"
        );
        Ok(temp_path)
    }
}

fn check_audio_params(info: &MediaInfo, encoding: &EncodingConfig) -> Result<(), ExtractError> {
    if let Some(rate) = info.audio_sample_rate {
        if rate != encoding.audio_sample_rate {
            return Err(ExtractError::validation(
                &info.path,
                format!(
                    "expected sample rate {}, got {}",
                    encoding.audio_sample_rate, rate
                ),
            ));
        }
    }
    if let Some(channels) = info.audio_channels {
        if channels != encoding.audio_channels {
            return Err(ExtractError::validation(
                &info.path,
                format!(
                    "expected {} channels, got {}",
                    encoding.audio_channels, channels
                ),
            ));
        }
    }
    Ok(())
}

/// Moves a finished file to its final path atomically.
///
/// Falls back to copy-then-rename through a sibling temp file when the
/// scratch area is on a different filesystem.
pub async fn publish(temp_path: &Path, final_path: &Path) -> Result<(), ExtractError> {
    let publish_err = |source| ExtractError::Publish {
        path: final_path.to_path_buf(),
        source,
    };

    if let Some(parent) = final_path.parent() {
        fs::create_dir_all(parent).await.map_err(publish_err)?;
    }

    match fs::rename(temp_path, final_path).await {
        Ok(()) => Ok(()),
        // EXDEV: scratch and output live on different filesystems
        Err(e) if e.raw_os_error() == Some(18) => {
            let sibling = final_path.with_extension("partial");
            fs::copy(temp_path, &sibling).await.map_err(publish_err)?;
            fs::rename(&sibling, final_path).await.map_err(publish_err)?;
            let _ = fs::remove_file(temp_path).await;
            Ok(())
        }
        Err(e) => Err(publish_err(e)),
    }
}

#[async_trait]
impl Extractor for FfmpegExtractor {
    fn name(&self) -> &str {
        "ffmpeg"
    }

    async fn extract(
        &self,
        handle: &StreamHandle,
        request: &ExtractionRequest,
    ) -> Result<OutputArtifact, ExtractError> {
        self.check_range(handle, request)?;
        let start = Instant::now();

        // Produce every output before publishing any of them.
        let mut finished = Vec::with_capacity(2);
        if let Some(video_path) = &request.artifact.video_path {
            let temp = self
                .run_output(handle, OutputKind::Video, request, video_path)
                .await?;
            finished.push((temp, video_path.clone()));
        }
        if let Some(audio_path) = &request.artifact.audio_path {
            let temp = self
                .run_output(handle, OutputKind::Audio, request, audio_path)
                .await?;
            finished.push((temp, audio_path.clone()));
        }

        for (temp, dest) in &finished {
            if let Err(e) = publish(temp, dest).await {
                warn!(path = %dest.display(), error = %e, "Failed to publish output");
                // Do not leave a partial set of outputs behind.
                for (_, placed) in &finished {
                    let _ = fs::remove_file(placed).await;
                }
                return Err(e);
            }
        }

        metrics::EXTRACT_DURATION.observe(start.elapsed().as_secs_f64());
        Ok(request.artifact.clone())
    }

    async fn validate(&self) -> Result<(), ExtractError> {
        check_executable(&self.config.transcoder_path, "-version")
            .await
            .map_err(|e| ExtractError::Process(e.to_string()))?;
        if self.config.validate_output {
            check_executable(&self.config.probe_path, "-version")
                .await
                .map_err(|e| ExtractError::Process(e.to_string()))?;
        }
        Ok(())
    }
}
