//! Mock fetcher for testing.

use async_trait::async_trait;
use std::collections::{HashMap, VecDeque};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;

use crate::fetcher::{FetchError, Fetcher, ScratchDir, StreamHandle, StreamSource};
use crate::segment::{StreamKind, StreamPlan};

/// What the mock does on one `fetch` call.
#[derive(Debug, Clone, PartialEq)]
pub enum FetchBehavior {
    Succeed { duration_secs: Option<f64> },
    NotFound,
    RateLimited,
    Network,
    /// Sleeps, then fails with a network error.
    Stall(Duration),
}

/// Mock implementation of the Fetcher trait.
///
/// Each video id follows its own script: behaviors are consumed in order
/// and the last one repeats. Unscripted ids succeed with unknown duration.
///
/// # Example
///
/// ```rust,ignore
/// let fetcher = MockFetcher::new(tmp.path().join(".tmp"));
/// fetcher.script("abc", vec![FetchBehavior::RateLimited]).await;
///
/// // ... run the job ...
///
/// assert_eq!(fetcher.fetch_count("abc").await, 3);
/// ```
#[derive(Debug)]
pub struct MockFetcher {
    scratch_root: PathBuf,
    scripts: Arc<RwLock<HashMap<String, VecDeque<FetchBehavior>>>>,
    /// Video ids in call order.
    calls: Arc<RwLock<Vec<String>>>,
    validate_error: Arc<RwLock<Option<String>>>,
}

impl MockFetcher {
    pub fn new(scratch_root: impl Into<PathBuf>) -> Self {
        Self {
            scratch_root: scratch_root.into(),
            scripts: Arc::new(RwLock::new(HashMap::new())),
            calls: Arc::new(RwLock::new(Vec::new())),
            validate_error: Arc::new(RwLock::new(None)),
        }
    }

    /// Sets the behavior sequence for `video_id`.
    pub async fn script(&self, video_id: &str, behaviors: Vec<FetchBehavior>) {
        self.scripts
            .write()
            .await
            .insert(video_id.to_string(), behaviors.into());
    }

    /// Makes `validate` fail.
    pub async fn set_validate_error(&self, message: impl Into<String>) {
        *self.validate_error.write().await = Some(message.into());
    }

    pub async fn fetch_count(&self, video_id: &str) -> usize {
        self.calls
            .read()
            .await
            .iter()
            .filter(|id| id.as_str() == video_id)
            .count()
    }

    pub async fn total_fetches(&self) -> usize {
        self.calls.read().await.len()
    }

    pub async fn recorded_calls(&self) -> Vec<String> {
        self.calls.read().await.clone()
    }

    async fn next_behavior(&self, video_id: &str) -> FetchBehavior {
        let mut scripts = self.scripts.write().await;
        match scripts.get_mut(video_id) {
            Some(queue) if queue.len() > 1 => queue.pop_front().unwrap_or(FetchBehavior::Network),
            Some(queue) => queue.front().cloned().unwrap_or(FetchBehavior::Network),
            None => FetchBehavior::Succeed {
                duration_secs: None,
            },
        }
    }
}

#[async_trait]
impl Fetcher for MockFetcher {
    fn name(&self) -> &str {
        "mock"
    }

    async fn fetch(&self, video_id: &str, plan: &StreamPlan) -> Result<StreamHandle, FetchError> {
        self.calls.write().await.push(video_id.to_string());

        match self.next_behavior(video_id).await {
            FetchBehavior::Succeed { duration_secs } => {
                let name = format!("{}-{}", video_id, uuid::Uuid::new_v4());
                let scratch = ScratchDir::create(&self.scratch_root, &name).await?;
                let sources = plan
                    .required_streams()
                    .into_iter()
                    .map(|kind| StreamSource {
                        kind,
                        location: format!("mock://{}/{:?}", video_id, kind),
                        format_id: None,
                        has_video: kind != StreamKind::Audio,
                        has_audio: kind != StreamKind::Video,
                    })
                    .collect();
                Ok(StreamHandle::new(video_id, duration_secs, sources, scratch))
            }
            FetchBehavior::NotFound => Err(FetchError::not_found(video_id, "Video unavailable")),
            FetchBehavior::RateLimited => {
                Err(FetchError::rate_limited(video_id, "HTTP Error 429: Too Many Requests"))
            }
            FetchBehavior::Network => Err(FetchError::network(video_id, "Connection reset")),
            FetchBehavior::Stall(duration) => {
                tokio::time::sleep(duration).await;
                Err(FetchError::network(video_id, "stalled"))
            }
        }
    }

    async fn validate(&self) -> Result<(), FetchError> {
        match self.validate_error.read().await.as_ref() {
            Some(message) => Err(FetchError::Unavailable(message.clone())),
            None => Ok(()),
        }
    }
}
