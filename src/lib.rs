//! # Plant Disease Classification
//!
//! A Rust library for plant disease classification from leaf photographs using
//! an EfficientNet-B3 built with the Burn framework.
//!
//! ## Features
//!
//! - **Inference pipeline**: decode, leaf plausibility check, preprocessing,
//!   forward pass, top-K ranking and a confidence gate
//! - **Artifact loading** with an explicit, opt-in pretrained-backbone fallback
//! - **Training** with stratified splits, reduce-on-plateau scheduling and
//!   best-checkpoint selection on validation accuracy
//!
//! ## Modules
//!
//! - `backend`: Compile-time backend selection (NdArray CPU or CUDA)
//! - `dataset`: Class-folder loading, stratified splits, Burn dataset/batcher
//! - `model`: EfficientNet-B3 and artifact (checkpoint + class list) loading
//! - `training`: Training loop, scheduler and evaluation
//! - `inference`: The request pipeline served by the HTTP API
//! - `utils`: Logging, metrics, and error types
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use plant_disease::backend::{default_device, DefaultBackend};
//! use plant_disease::inference::{InferenceService, ServiceConfig};
//! use plant_disease::model::{load_artifacts, ArtifactPaths};
//!
//! let state = load_artifacts::<DefaultBackend>(&ArtifactPaths::default(), &default_device());
//! let service = InferenceService::new(state, ServiceConfig::default());
//! let response = service.predict_single(&bytes, Some("image/jpeg"))?;
//! ```

pub mod backend;
pub mod dataset;
pub mod inference;
pub mod model;
pub mod training;
pub mod utils;

// Re-export commonly used items for convenience
pub use dataset::loader::PlantDiseaseDataset;
pub use dataset::split::{DatasetSplits, SplitConfig};
pub use dataset::{PlantDiseaseBatch, PlantDiseaseBatcher, PlantDiseaseBurnDataset, PlantDiseaseItem};
pub use inference::{InferenceService, PredictionError, ServiceConfig};
pub use model::efficientnet::{EfficientNet, EfficientNetConfig};
pub use model::{ArtifactPaths, ArtifactState, ModelArtifact};
pub use training::TrainingConfig;
pub use utils::error::{PlantDiseaseError, Result};
pub use utils::metrics::{ConfusionMatrix, Metrics};

/// Crate version, reported by the CLI and the HTTP root endpoint
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
