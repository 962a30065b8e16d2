//! Types for the extractor module.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use crate::config::EncodingConfig;
use crate::segment::{OutputArtifact, StreamPlan};

/// What to cut and where to put it.
#[derive(Debug, Clone)]
pub struct ExtractionRequest {
    pub start_seconds: f64,
    pub end_seconds: f64,
    pub encoding: EncodingConfig,
    pub plan: StreamPlan,
    pub artifact: OutputArtifact,
}

impl ExtractionRequest {
    pub fn duration_secs(&self) -> f64 {
        self.end_seconds - self.start_seconds
    }
}

/// Information about a media file (from ffprobe).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MediaInfo {
    pub path: PathBuf,
    pub duration_secs: f64,
    pub format: String,
    pub audio_codec: Option<String>,
    pub audio_sample_rate: Option<u32>,
    pub audio_channels: Option<u8>,
    pub video_codec: Option<String>,
    pub video_fps: Option<f32>,
}

impl MediaInfo {
    pub fn has_audio(&self) -> bool {
        self.audio_codec.is_some()
    }

    pub fn has_video(&self) -> bool {
        self.video_codec.is_some()
    }
}

/// Which artifact an ffmpeg invocation produces.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputKind {
    Audio,
    Video,
}

impl OutputKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            OutputKind::Audio => "audio",
            OutputKind::Video => "video",
        }
    }
}
