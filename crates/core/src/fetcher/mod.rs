//! Video fetcher: resolves a video id into stream handles.
//!
//! The [`Fetcher`] trait is implemented by [`YtDlpFetcher`], which asks yt-dlp
//! for the best stream matching each [`StreamKind`](crate::segment::StreamKind)
//! of the run's plan and classifies failures into terminal and retryable kinds.

mod error;
mod traits;
mod types;
mod ytdlp;

pub use error::FetchError;
pub use traits::Fetcher;
pub use types::{ScratchDir, StreamHandle, StreamSource};
pub use ytdlp::{classify_stderr, YtDlpFetcher};
