//! Request orchestration
//!
//! Composes decode, leaf validation, preprocessing, inference, ranking and the
//! confidence gate into the single-image and batch request flows.
//!
//! The single-image path fails fast: the first failing stage short-circuits
//! before any later (more expensive) stage runs. The batch path isolates
//! failures per item and always reports one entry per uploaded file, in
//! upload order.

use std::path::Path;
use std::time::Instant;

use chrono::{DateTime, Local};
use serde::{Deserialize, Serialize};
use tracing::{debug, error, info, warn};

use crate::inference::decode::{decode_image, is_image_content_type, DecodedImage};
use crate::inference::engine::infer;
use crate::inference::error::{ErrorKind, PredictionError};
use crate::inference::gate::{ConfidenceGateConfig, ConfidenceTier};
use crate::inference::leaf::{LeafValidator, LeafValidatorConfig};
use crate::inference::preprocess::Preprocessor;
use crate::inference::ranking::{rank, PredictionItem};
use crate::model::artifacts::{ArtifactState, ModelArtifact, WeightsSource};
use crate::utils::error::{PlantDiseaseError, Result};

/// Tunables of the request pipeline
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServiceConfig {
    pub leaf_validation: LeafValidatorConfig,
    /// Run the leaf validator on the single-image path
    pub validate_leaf: bool,
    /// Run the leaf validator on each batch item
    pub batch_leaf_validation: bool,
    pub confidence: ConfidenceGateConfig,
    pub single_top_k: usize,
    pub batch_top_k: usize,
    pub max_batch_files: usize,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            leaf_validation: LeafValidatorConfig::default(),
            validate_leaf: true,
            batch_leaf_validation: false,
            confidence: ConfidenceGateConfig::default(),
            single_top_k: 5,
            batch_top_k: 3,
            max_batch_files: 10,
        }
    }
}

impl ServiceConfig {
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Err(PlantDiseaseError::PathNotFound(path.to_path_buf()));
        }
        let json = std::fs::read_to_string(path)?;
        let config: Self = serde_json::from_str(&json)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        let gate = &self.confidence;
        if !(0.0..=1.0).contains(&gate.reject_below) || !(0.0..=1.0).contains(&gate.advisory_below) {
            return Err(PlantDiseaseError::Config(
                "confidence thresholds must lie in [0, 1]".to_string(),
            ));
        }
        if self.single_top_k == 0 || self.batch_top_k == 0 {
            return Err(PlantDiseaseError::Config("top_k must be at least 1".to_string()));
        }
        if self.max_batch_files == 0 {
            return Err(PlantDiseaseError::Config(
                "max_batch_files must be at least 1".to_string(),
            ));
        }
        Ok(())
    }
}

/// One uploaded file
#[derive(Debug, Clone)]
pub struct UploadedFile {
    pub filename: String,
    pub content_type: Option<String>,
    pub bytes: Vec<u8>,
}

impl UploadedFile {
    pub fn new(filename: impl Into<String>, content_type: Option<&str>, bytes: Vec<u8>) -> Self {
        Self {
            filename: filename.into(),
            content_type: content_type.map(str::to_string),
            bytes,
        }
    }
}

/// Successful single-image prediction
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PredictionResponse {
    pub success: bool,
    pub prediction: String,
    pub confidence: f32,
    pub all_predictions: Vec<PredictionItem>,
    pub message: String,
    pub timestamp: DateTime<Local>,
}

/// Outcome for one file of a batch
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BatchItemResult {
    pub filename: String,
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub prediction: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub confidence: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub top_predictions: Option<Vec<PredictionItem>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl BatchItemResult {
    fn succeeded(filename: String, ranked: Vec<PredictionItem>) -> Self {
        let top = ranked.first().cloned();
        Self {
            filename,
            success: true,
            prediction: top.as_ref().map(|p| p.class_name.clone()),
            confidence: top.map(|p| p.confidence),
            top_predictions: Some(ranked),
            error: None,
        }
    }

    fn failed(filename: String, error: &PredictionError) -> Self {
        Self {
            filename,
            success: false,
            prediction: None,
            confidence: None,
            top_predictions: None,
            error: Some(error.to_string()),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BatchResponse {
    pub success: bool,
    pub total_images: usize,
    pub results: Vec<BatchItemResult>,
    pub timestamp: DateTime<Local>,
}

/// Readiness snapshot
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HealthReport {
    pub status: String,
    pub model_loaded: bool,
    pub num_classes: usize,
    pub device: String,
    /// Absent when no model is loaded
    pub weights: Option<WeightsSource>,
    pub timestamp: DateTime<Local>,
}

/// The loaded artifact plus everything needed to serve requests
///
/// Built once at startup and shared read-only between request handlers.
pub struct InferenceService {
    state: ArtifactState,
    config: ServiceConfig,
    validator: LeafValidator,
    preprocessor: Preprocessor,
}

impl InferenceService {
    pub fn new(state: ArtifactState, config: ServiceConfig) -> Self {
        let validator = LeafValidator::new(config.leaf_validation.clone());
        Self {
            state,
            config,
            validator,
            preprocessor: Preprocessor::default(),
        }
    }

    pub fn state(&self) -> &ArtifactState {
        &self.state
    }

    pub fn config(&self) -> &ServiceConfig {
        &self.config
    }

    pub fn is_ready(&self) -> bool {
        self.state.is_ready()
    }

    pub fn health(&self) -> HealthReport {
        match self.state.artifact() {
            Some(artifact) => HealthReport {
                status: "healthy".to_string(),
                model_loaded: true,
                num_classes: artifact.num_classes(),
                device: artifact.device().to_string(),
                weights: Some(artifact.weights()),
                timestamp: Local::now(),
            },
            None => HealthReport {
                status: "model_not_loaded".to_string(),
                model_loaded: false,
                num_classes: 0,
                device: "none".to_string(),
                weights: None,
                timestamp: Local::now(),
            },
        }
    }

    /// Ordered class list of the loaded model
    pub fn classes(&self) -> std::result::Result<&[String], PredictionError> {
        Ok(self.state.ready()?.class_names())
    }

    /// Full single-image flow, including the leaf and confidence gates
    pub fn predict_single(
        &self,
        bytes: &[u8],
        content_type: Option<&str>,
    ) -> std::result::Result<PredictionResponse, PredictionError> {
        let artifact = self.state.ready()?;

        let content_type = content_type.unwrap_or_default();
        if !is_image_content_type(content_type) {
            return Err(PredictionError::UnsupportedContentType(content_type.to_string()));
        }

        let started = Instant::now();
        let image = decode_image(bytes, Some(content_type))?;

        if self.config.validate_leaf {
            self.check_leaf(&image)?;
        }

        let ranked = self.classify(artifact, &image, self.config.single_top_k)?;
        let (prediction, confidence) = match ranked.first() {
            Some(top) => (top.class_name.clone(), top.confidence),
            None => {
                return Err(PredictionError::Unexpected(
                    "model produced no predictions".to_string(),
                ))
            }
        };

        let tier = self.config.confidence.classify(confidence);
        if tier == ConfidenceTier::Rejected {
            info!(
                "Rejected prediction '{}' at {:.1}% confidence",
                prediction,
                confidence * 100.0
            );
            return Err(PredictionError::ConfidenceTooLow { confidence });
        }

        debug!("Single prediction took {:?}", started.elapsed());

        Ok(PredictionResponse {
            success: true,
            prediction,
            confidence,
            all_predictions: ranked,
            message: tier.message().to_string(),
            timestamp: Local::now(),
        })
    }

    /// Batch flow; one result per file, in upload order
    ///
    /// Fails as a whole only when no model is loaded or the batch is too
    /// large. Both checks happen before any file is processed.
    pub fn predict_batch(
        &self,
        files: Vec<UploadedFile>,
    ) -> std::result::Result<BatchResponse, PredictionError> {
        let artifact = self.state.ready()?;

        if files.is_empty() {
            return Err(PredictionError::MissingFile);
        }
        if files.len() > self.config.max_batch_files {
            return Err(PredictionError::TooManyFiles {
                count: files.len(),
                max: self.config.max_batch_files,
            });
        }

        let started = Instant::now();
        let total_images = files.len();
        let results: Vec<BatchItemResult> = files
            .into_iter()
            .map(|file| match self.predict_item(artifact, &file) {
                Ok(ranked) => BatchItemResult::succeeded(file.filename, ranked),
                Err(e) => {
                    warn!("Batch item '{}' failed: {}", file.filename, e);
                    BatchItemResult::failed(file.filename, &e)
                }
            })
            .collect();

        let failed = results.iter().filter(|r| !r.success).count();
        info!(
            "Batch of {} images processed in {:?} ({} failed)",
            total_images,
            started.elapsed(),
            failed
        );

        Ok(BatchResponse {
            success: true,
            total_images,
            results,
            timestamp: Local::now(),
        })
    }

    fn predict_item(
        &self,
        artifact: &ModelArtifact,
        file: &UploadedFile,
    ) -> std::result::Result<Vec<PredictionItem>, PredictionError> {
        let image = decode_image(&file.bytes, file.content_type.as_deref())?;
        if self.config.batch_leaf_validation {
            self.check_leaf(&image)?;
        }
        self.classify(artifact, &image, self.config.batch_top_k)
    }

    fn check_leaf(&self, image: &DecodedImage) -> std::result::Result<(), PredictionError> {
        let verdict = self.validator.validate(image);
        if verdict.is_valid {
            Ok(())
        } else {
            debug!("Leaf validation failed: {:?}", verdict.rejected_by);
            Err(PredictionError::NotALeaf(verdict.reason))
        }
    }

    fn classify(
        &self,
        artifact: &ModelArtifact,
        image: &DecodedImage,
        top_k: usize,
    ) -> std::result::Result<Vec<PredictionItem>, PredictionError> {
        let input = self.preprocessor.process(image);
        let probabilities = infer(&self.state, &input).map_err(|e| {
            if e.kind() == ErrorKind::Unexpected {
                error!("Inference failed: {}", e);
            }
            e
        })?;
        Ok(rank(&probabilities, artifact.class_names(), top_k))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::Ordering;

    use image::{DynamicImage, Rgb, RgbImage};

    use crate::inference::decode::tests::encode_png;
    use crate::inference::engine::tests::{class_names, StubClassifier};
    use crate::inference::gate::{LOW_CONFIDENCE_MESSAGE, SUCCESS_MESSAGE};
    use crate::inference::leaf::tests::leafy_image;

    fn service_with(probabilities: &[f32], config: ServiceConfig) -> (InferenceService, StubClassifier) {
        let stub = StubClassifier::with_probabilities(probabilities);
        let probe = StubClassifier {
            logits: stub.logits.clone(),
            calls: stub.calls.clone(),
        };
        let artifact = ModelArtifact::new(
            Box::new(stub),
            class_names(probabilities.len()),
            WeightsSource::Custom,
        )
        .unwrap();
        (InferenceService::new(ArtifactState::Ready(artifact), config), probe)
    }

    fn leaf_png() -> Vec<u8> {
        encode_png(DynamicImage::ImageRgb8(leafy_image(128)))
    }

    fn upload(name: &str, bytes: Vec<u8>) -> UploadedFile {
        UploadedFile::new(name, Some("image/png"), bytes)
    }

    #[test]
    fn test_single_confident_prediction() {
        let (service, _) = service_with(&[0.05, 0.9, 0.05], ServiceConfig::default());
        let response = service.predict_single(&leaf_png(), Some("image/png")).unwrap();

        assert!(response.success);
        assert_eq!(response.prediction, "Class_1");
        assert!((response.confidence - 0.9).abs() < 1e-5);
        assert_eq!(response.all_predictions.len(), 3);
        assert_eq!(response.message, SUCCESS_MESSAGE);
    }

    #[test]
    fn test_confidence_tiers() {
        // top-1 0.10 over ten equal classes
        let (service, _) = service_with(&[0.1; 10], ServiceConfig::default());
        let err = service.predict_single(&leaf_png(), Some("image/png")).unwrap_err();
        assert!(matches!(err, PredictionError::ConfidenceTooLow { .. }));
        assert_eq!(err.kind(), ErrorKind::ClientInput);

        let (service, _) = service_with(&[0.4, 0.3, 0.3], ServiceConfig::default());
        let response = service.predict_single(&leaf_png(), Some("image/png")).unwrap();
        assert_eq!(response.message, LOW_CONFIDENCE_MESSAGE);
        assert_eq!(response.prediction, "Class_0");
    }

    #[test]
    fn test_not_loaded_is_checked_first() {
        let service = InferenceService::new(ArtifactState::not_loaded("missing"), ServiceConfig::default());
        let err = service.predict_single(b"not an image", Some("text/plain")).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::ServiceUnavailable);

        let err = service.predict_batch(vec![upload("a.png", leaf_png())]).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::ServiceUnavailable);
        assert!(service.classes().is_err());
    }

    #[test]
    fn test_single_rejects_bad_inputs_before_inference() {
        let (service, probe) = service_with(&[0.9, 0.1], ServiceConfig::default());

        let err = service.predict_single(&leaf_png(), Some("application/pdf")).unwrap_err();
        assert!(matches!(err, PredictionError::UnsupportedContentType(_)));

        let err = service.predict_single(b"garbage", Some("image/png")).unwrap_err();
        assert!(matches!(err, PredictionError::Decode(_)));

        let gray = encode_png(DynamicImage::ImageRgb8(RgbImage::from_pixel(
            200,
            200,
            Rgb([128, 128, 128]),
        )));
        let err = service.predict_single(&gray, Some("image/png")).unwrap_err();
        assert!(matches!(err, PredictionError::NotALeaf(_)));

        assert_eq!(probe.calls.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_leaf_gate_can_be_bypassed() {
        let config = ServiceConfig {
            validate_leaf: false,
            ..ServiceConfig::default()
        };
        let (service, _) = service_with(&[0.9, 0.1], config);
        let gray = encode_png(DynamicImage::ImageRgb8(RgbImage::from_pixel(
            200,
            200,
            Rgb([128, 128, 128]),
        )));
        assert!(service.predict_single(&gray, Some("image/png")).is_ok());
    }

    #[test]
    fn test_single_is_deterministic() {
        let (service, _) = service_with(&[0.2, 0.5, 0.3], ServiceConfig::default());
        let bytes = leaf_png();
        let first = service.predict_single(&bytes, Some("image/png")).unwrap();
        let second = service.predict_single(&bytes, Some("image/png")).unwrap();

        assert_eq!(first.prediction, second.prediction);
        assert_eq!(first.confidence, second.confidence);
        assert_eq!(first.all_predictions, second.all_predictions);
        assert_eq!(first.message, second.message);
    }

    #[test]
    fn test_batch_too_large_runs_no_inference() {
        let (service, probe) = service_with(&[0.9, 0.1], ServiceConfig::default());
        let files: Vec<UploadedFile> = (0..11)
            .map(|i| upload(&format!("{}.png", i), leaf_png()))
            .collect();

        let err = service.predict_batch(files).unwrap_err();
        assert!(matches!(err, PredictionError::TooManyFiles { count: 11, max: 10 }));
        assert_eq!(probe.calls.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_batch_isolates_failures_and_keeps_order() {
        let (service, probe) = service_with(&[0.1, 0.2, 0.3, 0.4], ServiceConfig::default());
        let files = vec![
            upload("first.png", leaf_png()),
            upload("broken.png", b"\x89PNG not really".to_vec()),
            upload("third.png", leaf_png()),
        ];

        let response = service.predict_batch(files).unwrap();
        assert!(response.success);
        assert_eq!(response.total_images, 3);

        let names: Vec<&str> = response.results.iter().map(|r| r.filename.as_str()).collect();
        assert_eq!(names, vec!["first.png", "broken.png", "third.png"]);

        let outcomes: Vec<bool> = response.results.iter().map(|r| r.success).collect();
        assert_eq!(outcomes, vec![true, false, true]);

        let ok = &response.results[0];
        assert_eq!(ok.prediction.as_deref(), Some("Class_3"));
        assert_eq!(ok.top_predictions.as_ref().map(Vec::len), Some(3));
        assert!(response.results[1].error.is_some());
        assert_eq!(probe.calls.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_batch_skips_leaf_gate_by_default() {
        let (service, _) = service_with(&[0.9, 0.1], ServiceConfig::default());
        let gray = encode_png(DynamicImage::ImageRgb8(RgbImage::from_pixel(
            200,
            200,
            Rgb([128, 128, 128]),
        )));
        let response = service.predict_batch(vec![upload("gray.png", gray.clone())]).unwrap();
        assert!(response.results[0].success);

        let config = ServiceConfig {
            batch_leaf_validation: true,
            ..ServiceConfig::default()
        };
        let (service, _) = service_with(&[0.9, 0.1], config);
        let response = service.predict_batch(vec![upload("gray.png", gray)]).unwrap();
        assert!(!response.results[0].success);
    }

    #[test]
    fn test_health_reflects_state() {
        let service = InferenceService::new(ArtifactState::not_loaded("missing"), ServiceConfig::default());
        let health = service.health();
        assert!(!health.model_loaded);
        assert_eq!(health.status, "model_not_loaded");
        assert_eq!(health.num_classes, 0);

        let (service, _) = service_with(&[0.5, 0.25, 0.25], ServiceConfig::default());
        let health = service.health();
        assert!(health.model_loaded);
        assert_eq!(health.num_classes, 3);
        assert_eq!(health.weights, Some(WeightsSource::Custom));
    }

    #[test]
    fn test_config_loads_partial_json() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("service.json");
        std::fs::write(&path, r#"{"max_batch_files": 4, "confidence": {"reject_below": 0.2}}"#).unwrap();

        let config = ServiceConfig::load(&path).unwrap();
        assert_eq!(config.max_batch_files, 4);
        assert_eq!(config.confidence.reject_below, 0.2);
        assert_eq!(config.confidence.advisory_below, 0.50);
        assert!(config.validate_leaf);

        std::fs::write(&path, r#"{"single_top_k": 0}"#).unwrap();
        assert!(ServiceConfig::load(&path).is_err());
    }
}
