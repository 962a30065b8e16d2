//! Segment extractor: cuts fetched streams to the annotated window.
//!
//! [`FfmpegExtractor`] runs one ffmpeg process per output (audio and/or video,
//! per the run's [`StreamPlan`](crate::segment::StreamPlan)), writes into the
//! handle's scratch directory, optionally probes the result with ffprobe, and
//! only then renames each file to its final path.

mod error;
mod ffmpeg;
mod traits;
mod types;

pub use error::ExtractError;
pub use ffmpeg::{publish, FfmpegExtractor};
pub use traits::Extractor;
pub use types::{ExtractionRequest, MediaInfo, OutputKind};
