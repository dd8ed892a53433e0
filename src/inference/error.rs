//! Prediction error taxonomy
//!
//! Every failure of the request pipeline is a [`PredictionError`]. Its
//! [`ErrorKind`] decides how a transport layer surfaces it: client input
//! errors are the caller's to fix, `ServiceUnavailable` means no model is
//! loaded, and `Unexpected` covers everything else.

use thiserror::Error;

use crate::inference::decode::DecodeError;

/// Coarse classification of a [`PredictionError`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Bad request data; never retried
    ClientInput,
    /// Model artifact not loaded
    ServiceUnavailable,
    /// Anything else during preprocessing or inference
    Unexpected,
}

#[derive(Error, Debug)]
pub enum PredictionError {
    #[error("File must be an image (got content type '{0}')")]
    UnsupportedContentType(String),

    #[error("No image file provided")]
    MissingFile,

    #[error("Invalid image: {0}")]
    Decode(#[from] DecodeError),

    #[error("Image does not look like a plant leaf: {0}")]
    NotALeaf(String),

    #[error(
        "Very low confidence ({:.1}%), the image is likely not a clear photo of a supported leaf",
        .confidence * 100.0
    )]
    ConfidenceTooLow { confidence: f32 },

    #[error("Maximum {max} images allowed per batch (got {count})")]
    TooManyFiles { count: usize, max: usize },

    #[error("Model not loaded: {0}")]
    ServiceUnavailable(String),

    #[error("Prediction failed: {0}")]
    Unexpected(String),
}

impl PredictionError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            PredictionError::UnsupportedContentType(_)
            | PredictionError::MissingFile
            | PredictionError::Decode(_)
            | PredictionError::NotALeaf(_)
            | PredictionError::ConfidenceTooLow { .. }
            | PredictionError::TooManyFiles { .. } => ErrorKind::ClientInput,
            PredictionError::ServiceUnavailable(_) => ErrorKind::ServiceUnavailable,
            PredictionError::Unexpected(_) => ErrorKind::Unexpected,
        }
    }

    /// Stable machine-readable code for API bodies
    pub fn code(&self) -> &'static str {
        match self {
            PredictionError::UnsupportedContentType(_) => "unsupported_content_type",
            PredictionError::MissingFile => "missing_file",
            PredictionError::Decode(_) => "invalid_image",
            PredictionError::NotALeaf(_) => "not_a_leaf",
            PredictionError::ConfidenceTooLow { .. } => "low_confidence",
            PredictionError::TooManyFiles { .. } => "too_many_files",
            PredictionError::ServiceUnavailable(_) => "model_not_loaded",
            PredictionError::Unexpected(_) => "internal_error",
        }
    }
}
