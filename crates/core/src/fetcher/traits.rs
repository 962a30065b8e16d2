//! Trait definitions for the fetcher module.

use async_trait::async_trait;

use super::error::FetchError;
use super::types::StreamHandle;
use crate::segment::StreamPlan;

/// Resolves a video id into readable streams.
#[async_trait]
pub trait Fetcher: Send + Sync {
    /// Returns the name of this fetcher implementation.
    fn name(&self) -> &str;

    /// Resolves every stream the plan requires.
    async fn fetch(&self, video_id: &str, plan: &StreamPlan) -> Result<StreamHandle, FetchError>;

    /// Validates that the fetcher is properly configured and ready.
    async fn validate(&self) -> Result<(), FetchError>;
}
