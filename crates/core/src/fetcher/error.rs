//! Error types for the fetcher module.

use thiserror::Error;

use crate::process::ProcessError;
use crate::retry::ErrorKind;

/// Errors that can occur while resolving a video's streams.
#[derive(Debug, Error)]
pub enum FetchError {
    /// Video removed, private, region-blocked or otherwise gone.
    #[error("Video {video_id} not available: {reason}")]
    NotFound { video_id: String, reason: String },

    /// Source is throttling us.
    #[error("Rate limited while fetching {video_id}: {reason}")]
    RateLimited { video_id: String, reason: String },

    /// Timeout, connection reset, server error or unrecognised failure.
    #[error("Network error while fetching {video_id}: {reason}")]
    Network { video_id: String, reason: String },

    /// Fetch did not finish in time.
    #[error("Fetching {video_id} timed out after {timeout_secs} seconds")]
    Timeout { video_id: String, timeout_secs: u64 },

    /// yt-dlp itself could not be run (missing binary, not executable).
    #[error("yt-dlp is not runnable: {0}")]
    Unavailable(String),

    /// Failed to prepare the temporary location for this fetch.
    #[error("Failed to prepare scratch directory: {0}")]
    Scratch(#[from] std::io::Error),
}

impl FetchError {
    pub fn network(video_id: &str, reason: impl Into<String>) -> Self {
        Self::Network {
            video_id: video_id.to_string(),
            reason: reason.into(),
        }
    }

    pub fn not_found(video_id: &str, reason: impl Into<String>) -> Self {
        Self::NotFound {
            video_id: video_id.to_string(),
            reason: reason.into(),
        }
    }

    pub fn rate_limited(video_id: &str, reason: impl Into<String>) -> Self {
        Self::RateLimited {
            video_id: video_id.to_string(),
            reason: reason.into(),
        }
    }

    /// Maps a process failure onto the fetch taxonomy.
    pub fn from_process(video_id: &str, err: ProcessError) -> Self {
        match err {
            ProcessError::TimedOut { timeout_secs, .. } => Self::Timeout {
                video_id: video_id.to_string(),
                timeout_secs,
            },
            missing @ ProcessError::NotFound { .. } => Self::Unavailable(missing.to_string()),
            other => Self::network(video_id, other.to_string()),
        }
    }

    /// Taxonomy kind of this error.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::NotFound { .. } => ErrorKind::NotFound,
            Self::RateLimited { .. } => ErrorKind::RateLimited,
            Self::Network { .. }
            | Self::Timeout { .. }
            | Self::Unavailable(_)
            | Self::Scratch(_) => ErrorKind::Network,
        }
    }
}
