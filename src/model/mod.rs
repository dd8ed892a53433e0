//! Model module for the EfficientNet-B3 classifier using the Burn framework
//!
//! This module provides:
//! - The EfficientNet-B3 architecture with a configurable classifier head
//! - Checkpoint metadata saved next to each `.mpk` record
//! - Artifact loading (checkpoint, class list, label encoder) for serving

pub mod artifacts;
pub mod config;
pub mod efficientnet;

// Re-export main types for convenience
pub use artifacts::{
    load_artifacts, try_load_artifacts, ArtifactError, ArtifactPaths, ArtifactState,
    FallbackPolicy, LabelEncoder, ModelArtifact, WeightsSource,
};
pub use config::CheckpointMetadata;
pub use efficientnet::{EfficientNet, EfficientNetConfig};
