//! Inference module: the request pipeline behind the prediction API
//!
//! This module provides:
//! - Image decoding and leaf plausibility checks
//! - Preprocessing into normalized model input
//! - The forward pass, softmax and top-K ranking
//! - The confidence gate and the single/batch request flows
//!
//! ## Pipeline
//!
//! Single image: decode → leaf check → preprocess → infer → top-5 → gate.
//! Batch: decode → preprocess → infer → top-3 per file, failures isolated.

pub mod decode;
pub mod engine;
pub mod error;
pub mod gate;
pub mod leaf;
pub mod pipeline;
pub mod preprocess;
pub mod ranking;

// Re-export main types for convenience
pub use decode::{decode_image, DecodeError, DecodedImage};
pub use engine::{infer, softmax, BurnClassifier, Classifier};
pub use error::{ErrorKind, PredictionError};
pub use gate::{ConfidenceGateConfig, ConfidenceTier};
pub use leaf::{LeafValidationResult, LeafValidator, LeafValidatorConfig};
pub use pipeline::{
    BatchItemResult, BatchResponse, HealthReport, InferenceService, PredictionResponse,
    ServiceConfig, UploadedFile,
};
pub use preprocess::{InputTensor, Preprocessor, INPUT_SIZE};
pub use ranking::{rank, PredictionItem};
