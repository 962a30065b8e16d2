//! Stream handles returned by fetchers.

use std::path::{Path, PathBuf};
use tracing::warn;

use crate::segment::StreamKind;

/// A resolved, directly readable media stream.
#[derive(Debug, Clone, PartialEq)]
pub struct StreamSource {
    pub kind: StreamKind,
    /// URL or local path readable by the transcoder.
    pub location: String,
    pub format_id: Option<String>,
    pub has_video: bool,
    pub has_audio: bool,
}

/// Per-fetch temporary directory, removed on release or drop.
#[derive(Debug)]
pub struct ScratchDir {
    path: PathBuf,
    released: bool,
}

impl ScratchDir {
    /// Creates `<root>/<name>`.
    pub async fn create(root: &Path, name: &str) -> std::io::Result<Self> {
        let path = root.join(name);
        tokio::fs::create_dir_all(&path).await?;
        Ok(Self {
            path,
            released: false,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Removes the directory and everything in it.
    pub async fn release(mut self) {
        self.released = true;
        if let Err(e) = tokio::fs::remove_dir_all(&self.path).await {
            if e.kind() != std::io::ErrorKind::NotFound {
                warn!(path = %self.path.display(), error = %e, "Failed to remove scratch directory");
            }
        }
    }
}

impl Drop for ScratchDir {
    fn drop(&mut self) {
        if !self.released {
            let _ = std::fs::remove_dir_all(&self.path);
        }
    }
}

/// Result of a successful fetch.
///
/// Owns the scratch directory used for in-progress files; call
/// [`StreamHandle::release`] once extraction is done.
#[derive(Debug)]
pub struct StreamHandle {
    pub video_id: String,
    /// Source duration, if the source reports one.
    pub duration_secs: Option<f64>,
    pub sources: Vec<StreamSource>,
    scratch: ScratchDir,
}

impl StreamHandle {
    pub fn new(
        video_id: impl Into<String>,
        duration_secs: Option<f64>,
        sources: Vec<StreamSource>,
        scratch: ScratchDir,
    ) -> Self {
        Self {
            video_id: video_id.into(),
            duration_secs,
            sources,
            scratch,
        }
    }

    pub fn source(&self, kind: StreamKind) -> Option<&StreamSource> {
        self.sources.iter().find(|s| s.kind == kind)
    }

    pub fn scratch_dir(&self) -> &Path {
        self.scratch.path()
    }

    /// Releases the temporary resources held by this handle.
    pub async fn release(self) {
        self.scratch.release().await;
    }
}
