//! Segment descriptors, keys, and output naming.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};

use crate::config::EncodingConfig;

/// Catalog subset a segment belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Subset {
    Eval,
    BalancedTrain,
    UnbalancedTrain,
}

impl Subset {
    /// Directory / key component for this subset.
    pub fn as_str(&self) -> &'static str {
        match self {
            Subset::Eval => "eval",
            Subset::BalancedTrain => "balanced-train",
            Subset::UnbalancedTrain => "unbalanced-train",
        }
    }

    /// Parse a subset name. Accepts both `balanced-train` and `balanced_train`.
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_ascii_lowercase().replace('_', "-").as_str() {
            "eval" => Some(Subset::Eval),
            "balanced-train" => Some(Subset::BalancedTrain),
            "unbalanced-train" => Some(Subset::UnbalancedTrain),
            _ => None,
        }
    }

    /// Derives the subset from a shard file name.
    ///
    /// Shard files are named after the master catalog with an optional numeric
    /// shard suffix, e.g. `balanced_train_segments.csv.03`.
    pub fn from_shard_path(path: &Path) -> Option<Self> {
        let name = path.file_name()?.to_str()?;
        let mut stem = name;
        if let Some((head, tail)) = stem.rsplit_once('.') {
            if !tail.is_empty() && tail.chars().all(|c| c.is_ascii_digit()) {
                stem = head;
            }
        }
        let stem = stem.strip_suffix(".csv").unwrap_or(stem);
        let stem = stem.strip_suffix("_segments").unwrap_or(stem);
        Self::parse(stem)
    }
}

impl fmt::Display for Subset {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One labeled segment from a shard file. Immutable once parsed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SegmentDescriptor {
    pub video_id: String,
    pub start_seconds: f64,
    pub end_seconds: f64,
    pub subset: Subset,
    /// Opaque label codes, not interpreted here.
    pub labels: Vec<String>,
    /// 1-based line number in the shard file.
    pub line: usize,
}

impl SegmentDescriptor {
    pub fn key(&self) -> SegmentKey {
        SegmentKey::new(
            self.subset,
            &self.video_id,
            self.start_seconds,
            self.end_seconds,
        )
    }

    pub fn duration_secs(&self) -> f64 {
        self.end_seconds - self.start_seconds
    }

    /// Whether the interval is non-empty and well ordered.
    pub fn has_valid_interval(&self) -> bool {
        self.start_seconds.is_finite()
            && self.end_seconds.is_finite()
            && self.start_seconds >= 0.0
            && self.end_seconds > self.start_seconds
    }
}

/// Identity of a segment across runs: `(subset, video_id, start, end)`.
///
/// Times are kept in whole milliseconds so the key (and every name derived
/// from it) is stable regardless of float formatting in the catalog.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SegmentKey {
    pub subset: &'static str,
    pub video_id: String,
    pub start_ms: i64,
    pub end_ms: i64,
}

impl SegmentKey {
    pub fn new(subset: Subset, video_id: &str, start_seconds: f64, end_seconds: f64) -> Self {
        Self {
            subset: subset.as_str(),
            video_id: video_id.to_string(),
            start_ms: (start_seconds * 1000.0) as i64,
            end_ms: (end_seconds * 1000.0) as i64,
        }
    }

    /// `<video_id>_<start_ms>_<end_ms>`
    pub fn basename(&self) -> String {
        format!("{}_{}_{}", self.video_id, self.start_ms, self.end_ms)
    }
}

impl fmt::Display for SegmentKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.subset, self.basename())
    }
}

/// Which source stream a fetch resolves.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StreamKind {
    /// Best single stream carrying both video and audio.
    Muxed,
    /// Best video-only stream.
    Video,
    /// Best audio-only stream.
    Audio,
}

impl StreamKind {
    /// yt-dlp format selector with fallbacks.
    pub fn format_selector(&self) -> &'static str {
        match self {
            StreamKind::Muxed => "best",
            StreamKind::Video => "bestvideo/best",
            StreamKind::Audio => "bestaudio/best",
        }
    }
}

/// Video mode strategy as configured.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum VideoMode {
    /// Best available combination: muxed video (with audio) plus best audio.
    #[default]
    BestVideoAudio,
    /// Separate best video and best audio streams.
    VideoAudio,
    /// Video only.
    BestVideo,
    /// Audio only.
    BestAudio,
}

impl VideoMode {
    /// Resolve the mode into the concrete stream set and artifact set.
    pub fn plan(&self) -> StreamPlan {
        match self {
            VideoMode::BestVideoAudio => StreamPlan {
                mode: *self,
                video_stream: Some(StreamKind::Muxed),
                audio_stream: Some(StreamKind::Audio),
                video_keeps_audio: true,
            },
            VideoMode::VideoAudio => StreamPlan {
                mode: *self,
                video_stream: Some(StreamKind::Video),
                audio_stream: Some(StreamKind::Audio),
                video_keeps_audio: false,
            },
            VideoMode::BestVideo => StreamPlan {
                mode: *self,
                video_stream: Some(StreamKind::Video),
                audio_stream: None,
                video_keeps_audio: false,
            },
            VideoMode::BestAudio => StreamPlan {
                mode: *self,
                video_stream: None,
                audio_stream: Some(StreamKind::Audio),
                video_keeps_audio: false,
            },
        }
    }
}

/// Streams to fetch and artifacts to produce, resolved once per run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StreamPlan {
    pub mode: VideoMode,
    /// Stream the video artifact is cut from, if a video artifact is produced.
    pub video_stream: Option<StreamKind>,
    /// Stream the audio artifact is cut from, if an audio artifact is produced.
    pub audio_stream: Option<StreamKind>,
    pub video_keeps_audio: bool,
}

impl StreamPlan {
    pub fn produces_video(&self) -> bool {
        self.video_stream.is_some()
    }

    pub fn produces_audio(&self) -> bool {
        self.audio_stream.is_some()
    }

    /// Distinct stream kinds to resolve, in fetch order.
    pub fn required_streams(&self) -> Vec<StreamKind> {
        let mut kinds = Vec::with_capacity(2);
        for kind in [self.video_stream, self.audio_stream].into_iter().flatten() {
            if !kinds.contains(&kind) {
                kinds.push(kind);
            }
        }
        kinds
    }
}

/// Final output paths for one segment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutputArtifact {
    pub basename: String,
    pub audio_path: Option<PathBuf>,
    pub video_path: Option<PathBuf>,
}

impl OutputArtifact {
    /// Derives the artifact paths for a key. Pure function of its inputs.
    pub fn for_key(
        root: &Path,
        key: &SegmentKey,
        plan: &StreamPlan,
        encoding: &EncodingConfig,
    ) -> Self {
        let basename = key.basename();
        let subset_dir = root.join(key.subset);
        let audio_path = plan.produces_audio().then(|| {
            subset_dir
                .join("audio")
                .join(format!("{}.{}", basename, encoding.audio_format))
        });
        let video_path = plan.produces_video().then(|| {
            subset_dir
                .join("video")
                .join(format!("{}.{}", basename, encoding.video_format))
        });
        Self {
            basename,
            audio_path,
            video_path,
        }
    }

    /// All expected paths.
    pub fn paths(&self) -> impl Iterator<Item = &Path> {
        self.audio_path
            .iter()
            .chain(self.video_path.iter())
            .map(PathBuf::as_path)
    }

    /// Whether every expected file exists and is non-empty.
    pub fn is_present(&self) -> bool {
        self.paths().all(|p| {
            std::fs::metadata(p)
                .map(|m| m.is_file() && m.len() > 0)
                .unwrap_or(false)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn descriptor(id: &str, start: f64, end: f64) -> SegmentDescriptor {
        SegmentDescriptor {
            video_id: id.to_string(),
            start_seconds: start,
            end_seconds: end,
            subset: Subset::BalancedTrain,
            labels: vec![],
            line: 1,
        }
    }

    #[test]
    fn test_key_uses_milliseconds() {
        let key = descriptor("--PJHxphWEs", 30.0, 40.0).key();
        assert_eq!(key.basename(), "--PJHxphWEs_30000_40000");
        assert_eq!(key.to_string(), "balanced-train/--PJHxphWEs_30000_40000");
    }

    #[test]
    fn test_artifact_paths_are_deterministic() {
        let key = descriptor("abc", 1.5, 11.5).key();
        let plan = VideoMode::BestVideoAudio.plan();
        let encoding = EncodingConfig::default();
        let a = OutputArtifact::for_key(Path::new("/data"), &key, &plan, &encoding);
        let b = OutputArtifact::for_key(Path::new("/data"), &key, &plan, &encoding);
        assert_eq!(a, b);
        assert_eq!(
            a.audio_path.unwrap(),
            PathBuf::from("/data/balanced-train/audio/abc_1500_11500.flac")
        );
        assert_eq!(
            a.video_path.unwrap(),
            PathBuf::from("/data/balanced-train/video/abc_1500_11500.mp4")
        );
    }

    #[test]
    fn test_audio_only_has_no_video_path() {
        let key = descriptor("abc", 0.0, 10.0).key();
        let plan = VideoMode::BestAudio.plan();
        let artifact =
            OutputArtifact::for_key(Path::new("/d"), &key, &plan, &EncodingConfig::default());
        assert!(artifact.audio_path.is_some());
        assert!(artifact.video_path.is_none());
    }

    #[test]
    fn test_same_extension_does_not_collide() {
        let key = descriptor("abc", 0.0, 10.0).key();
        let plan = VideoMode::VideoAudio.plan();
        let encoding = EncodingConfig {
            audio_format: "mkv".to_string(),
            video_format: "mkv".to_string(),
            ..Default::default()
        };
        let artifact = OutputArtifact::for_key(Path::new("/d"), &key, &plan, &encoding);
        assert_ne!(artifact.audio_path, artifact.video_path);
    }

    #[test]
    fn test_plan_required_streams() {
        assert_eq!(
            VideoMode::BestVideoAudio.plan().required_streams(),
            vec![StreamKind::Muxed, StreamKind::Audio]
        );
        assert_eq!(
            VideoMode::BestAudio.plan().required_streams(),
            vec![StreamKind::Audio]
        );
        assert!(!VideoMode::VideoAudio.plan().video_keeps_audio);
        assert!(VideoMode::BestVideoAudio.plan().video_keeps_audio);
    }

    #[test]
    fn test_subset_from_shard_path() {
        assert_eq!(
            Subset::from_shard_path(Path::new("/x/balanced_train_segments.csv.03")),
            Some(Subset::BalancedTrain)
        );
        assert_eq!(
            Subset::from_shard_path(Path::new("eval_segments.csv")),
            Some(Subset::Eval)
        );
        assert_eq!(Subset::from_shard_path(Path::new("other.csv")), None);
    }

    #[test]
    fn test_invalid_interval() {
        assert!(!descriptor("a", 10.0, 10.0).has_valid_interval());
        assert!(!descriptor("a", 10.0, 5.0).has_valid_interval());
        assert!(descriptor("a", 0.0, 5.0).has_valid_interval());
    }

    #[test]
    fn test_video_mode_deserialize() {
        #[derive(Deserialize)]
        struct W {
            mode: VideoMode,
        }
        let w: W = toml::from_str(r#"mode = "bestvideo""#).unwrap();
        assert_eq!(w.mode, VideoMode::BestVideo);
        let w: W = toml::from_str(r#"mode = "videoaudio""#).unwrap();
        assert_eq!(w.mode, VideoMode::VideoAudio);
    }
}
