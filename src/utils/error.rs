//! Library-wide error type
//!
//! Covers dataset handling, training and artifact IO. Failures of a single
//! prediction request are `inference::PredictionError` instead.

use std::path::PathBuf;

use thiserror::Error;

use crate::model::artifacts::ArtifactError;

#[derive(Error, Debug)]
pub enum PlantDiseaseError {
    #[error("Cannot read image {path:?}: {reason}")]
    Image { path: PathBuf, reason: String },

    #[error("Image codec error: {0}")]
    Codec(#[from] image::ImageError),

    #[error("Dataset error: {0}")]
    Dataset(String),

    #[error("Model error: {0}")]
    Model(String),

    #[error(transparent)]
    Artifact(#[from] ArtifactError),

    #[error("Training error: {0}")]
    Training(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Path not found: {0:?}")]
    PathNotFound(PathBuf),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl PlantDiseaseError {
    pub fn image(path: impl Into<PathBuf>, reason: impl std::fmt::Display) -> Self {
        PlantDiseaseError::Image {
            path: path.into(),
            reason: reason.to_string(),
        }
    }
}

pub type Result<T> = std::result::Result<T, PlantDiseaseError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = PlantDiseaseError::Dataset("no class directories".to_string());
        assert_eq!(err.to_string(), "Dataset error: no class directories");
    }

    #[test]
    fn test_image_error_names_the_file() {
        let err = PlantDiseaseError::image("/data/Tomato___Late_blight/leaf_01.jpg", "truncated file");
        let message = err.to_string();
        assert!(message.contains("leaf_01.jpg"));
        assert!(message.contains("truncated file"));
    }

    #[test]
    fn test_json_error_conversion() {
        let parsed: std::result::Result<Vec<String>, _> = serde_json::from_str("{not json");
        let err: PlantDiseaseError = parsed.unwrap_err().into();
        assert!(matches!(err, PlantDiseaseError::Json(_)));
    }

    #[test]
    fn test_artifact_error_is_transparent() {
        let inner = ArtifactError::HeadMismatch { outputs: 3, classes: 5 };
        let expected = inner.to_string();
        let err: PlantDiseaseError = inner.into();
        assert_eq!(err.to_string(), expected);
    }
}
