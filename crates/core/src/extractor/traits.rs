//! Trait definitions for the extractor module.

use async_trait::async_trait;

use super::error::ExtractError;
use super::types::ExtractionRequest;
use crate::fetcher::StreamHandle;
use crate::segment::OutputArtifact;

/// Cuts a fetched stream to a window and writes the configured outputs.
#[async_trait]
pub trait Extractor: Send + Sync {
    /// Returns the name of this extractor implementation.
    fn name(&self) -> &str;

    /// Produces every artifact of the request.
    ///
    /// Outputs appear at their final paths only once complete.
    async fn extract(
        &self,
        handle: &StreamHandle,
        request: &ExtractionRequest,
    ) -> Result<OutputArtifact, ExtractError>;

    /// Validates that the extractor is properly configured and ready.
    async fn validate(&self) -> Result<(), ExtractError>;
}
