//! Mock extractor for testing.

use async_trait::async_trait;
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;

use crate::extractor::{publish, ExtractError, ExtractionRequest, Extractor};
use crate::fetcher::StreamHandle;
use crate::segment::OutputArtifact;

/// What the mock does on one `extract` call.
#[derive(Debug, Clone, PartialEq)]
pub enum ExtractBehavior {
    /// Writes every artifact through the atomic publish path.
    Succeed,
    /// Fails like a transcoder exiting non-zero.
    Transcode,
    /// Writes partial scratch output, then sleeps.
    Stall(Duration),
    /// Panics inside the worker task.
    Panic,
}

/// Mock implementation of the Extractor trait.
///
/// Applies the same range check as the real extractor, then follows a
/// per-video script (last behavior repeats; unscripted ids succeed).
#[derive(Debug, Default)]
pub struct MockExtractor {
    scripts: Arc<RwLock<HashMap<String, VecDeque<ExtractBehavior>>>>,
    calls: Arc<RwLock<Vec<String>>>,
}

impl MockExtractor {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn script(&self, video_id: &str, behaviors: Vec<ExtractBehavior>) {
        self.scripts
            .write()
            .await
            .insert(video_id.to_string(), behaviors.into());
    }

    pub async fn extract_count(&self, video_id: &str) -> usize {
        self.calls
            .read()
            .await
            .iter()
            .filter(|id| id.as_str() == video_id)
            .count()
    }

    pub async fn total_extractions(&self) -> usize {
        self.calls.read().await.len()
    }

    async fn next_behavior(&self, video_id: &str) -> ExtractBehavior {
        let mut scripts = self.scripts.write().await;
        match scripts.get_mut(video_id) {
            Some(queue) if queue.len() > 1 => {
                queue.pop_front().unwrap_or(ExtractBehavior::Succeed)
            }
            Some(queue) => queue.front().cloned().unwrap_or(ExtractBehavior::Succeed),
            None => ExtractBehavior::Succeed,
        }
    }
}

#[async_trait]
impl Extractor for MockExtractor {
    fn name(&self) -> &str {
        "mock"
    }

    async fn extract(
        &self,
        handle: &StreamHandle,
        request: &ExtractionRequest,
    ) -> Result<OutputArtifact, ExtractError> {
        self.calls.write().await.push(handle.video_id.clone());

        if let Some(available) = handle.duration_secs {
            if available < request.end_seconds {
                return Err(ExtractError::Range {
                    start: request.start_seconds,
                    end: request.end_seconds,
                    available,
                });
            }
        }

        match self.next_behavior(&handle.video_id).await {
            ExtractBehavior::Succeed => {
                let body = format!(
                    "{} {:.3}-{:.3}",
                    handle.video_id, request.start_seconds, request.end_seconds
                );
                let mut staged = Vec::new();
                for (idx, dest) in request.artifact.paths().enumerate() {
                    let temp = handle.scratch_dir().join(format!("out-{}.part", idx));
                    tokio::fs::write(&temp, body.as_bytes()).await?;
                    staged.push((temp, dest.to_path_buf()));
                }
                for (temp, dest) in staged {
                    publish(&temp, &dest).await?;
                }
                Ok(request.artifact.clone())
            }
            ExtractBehavior::Transcode => Err(ExtractError::transcode_failed(
                "mock transcoder exited with code 1",
                Some(1),
                Some("Invalid data found when processing input".to_string()),
            )),
            ExtractBehavior::Stall(duration) => {
                let temp = handle.scratch_dir().join("out-0.part");
                tokio::fs::write(&temp, b"partial").await?;
                tokio::time::sleep(duration).await;
                Err(ExtractError::transcode_failed("stalled", None, None))
            }
            ExtractBehavior::Panic => {
                panic!("mock extractor panicked on {}", handle.video_id)
            }
        }
    }

    async fn validate(&self) -> Result<(), ExtractError> {
        Ok(())
    }
}
