//! Segment catalog: descriptors, output naming and the shard loader.

mod loader;
mod types;

pub use loader::{
    load_shard, parse_shard, CatalogError, LoadedShard, MalformedRowPolicy, RejectedRow,
};
pub use types::{
    OutputArtifact, SegmentDescriptor, SegmentKey, StreamKind, StreamPlan, Subset, VideoMode,
};
