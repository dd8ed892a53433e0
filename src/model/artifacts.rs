//! Model artifacts
//!
//! Loads the classifier checkpoint, the ordered class list and the optional
//! label encoder once at startup. Loading never takes the process down: any
//! failure is logged and leaves the state `NotLoaded`, which dependent
//! operations report as service unavailable.
//!
//! Falling back to generic pretrained backbone weights when the custom
//! checkpoint fails is opt-in through [`FallbackPolicy`] and is always
//! visible as [`WeightsSource::Fallback`].

use std::collections::HashSet;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::path::{Path, PathBuf};

use burn::module::Module;
use burn::record::CompactRecorder;
use burn::tensor::backend::Backend;
use burn::tensor::Tensor;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{error, info, warn};

use crate::inference::engine::{BurnClassifier, Classifier};
use crate::inference::error::PredictionError;
use crate::model::config::{
    checkpoint_file, CheckpointMetadata, CLASS_NAMES_FILE, LABEL_ENCODER_FILE, MODEL_STEM,
};
use crate::model::efficientnet::{
    EfficientNet, EfficientNetConfig, EfficientNetFeatures, ARCHITECTURE,
};

#[derive(Error, Debug)]
pub enum ArtifactError {
    #[error("artifact file not found: {0:?}")]
    MissingFile(PathBuf),

    #[error("invalid class list: {0}")]
    ClassList(String),

    #[error("invalid label encoder: {0}")]
    LabelEncoder(String),

    #[error("failed to load checkpoint {path:?}: {reason}")]
    Checkpoint { path: PathBuf, reason: String },

    #[error("classifier outputs {outputs} classes but the class list has {classes}")]
    HeadMismatch { outputs: usize, classes: usize },

    #[error("checkpoint metadata mismatch: {0}")]
    Metadata(String),

    #[error("custom weights failed ({primary}) and fallback weights failed ({fallback})")]
    FallbackFailed { primary: String, fallback: String },
}

/// Where the serving weights came from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WeightsSource {
    /// The trained checkpoint
    Custom,
    /// Generic pretrained backbone with an untrained classifier head
    Fallback,
}

/// What to do when the custom checkpoint cannot be loaded
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(tag = "mode", rename_all = "snake_case")]
pub enum FallbackPolicy {
    #[default]
    Disabled,
    /// Load a backbone-only record and attach a fresh head
    PretrainedBackbone { path: PathBuf },
}

/// Artifact locations
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ArtifactPaths {
    /// Checkpoint stem; the `.mpk` extension is implied
    pub checkpoint: PathBuf,
    pub class_names: PathBuf,
    pub label_encoder: Option<PathBuf>,
    #[serde(default)]
    pub fallback: FallbackPolicy,
}

impl ArtifactPaths {
    /// Standard file names inside a model directory, as written by training
    pub fn in_dir(dir: &Path) -> Self {
        Self {
            checkpoint: dir.join(MODEL_STEM),
            class_names: dir.join(CLASS_NAMES_FILE),
            label_encoder: Some(dir.join(LABEL_ENCODER_FILE)),
            fallback: FallbackPolicy::Disabled,
        }
    }
}

impl Default for ArtifactPaths {
    fn default() -> Self {
        Self::in_dir(Path::new("models"))
    }
}

/// Sorted class-name to index mapping produced during training
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LabelEncoder {
    pub classes: Vec<String>,
}

impl LabelEncoder {
    pub fn fit(names: &[String]) -> Self {
        let mut classes: Vec<String> = names.to_vec();
        classes.sort();
        classes.dedup();
        Self { classes }
    }

    pub fn index_of(&self, name: &str) -> Option<usize> {
        self.classes.iter().position(|c| c == name)
    }

    pub fn load(path: &Path) -> Result<Self, ArtifactError> {
        let json = read_artifact(path)?;
        serde_json::from_str(&json).map_err(|e| ArtifactError::LabelEncoder(e.to_string()))
    }

    pub fn save(&self, path: &Path) -> std::io::Result<()> {
        let json = serde_json::to_string_pretty(self).map_err(std::io::Error::other)?;
        std::fs::write(path, json)
    }

    /// Every class name must map to its own position in the class list
    pub fn check_against(&self, class_names: &[String]) -> Result<(), ArtifactError> {
        if self.classes.len() != class_names.len() {
            return Err(ArtifactError::LabelEncoder(format!(
                "encoder has {} classes, class list has {}",
                self.classes.len(),
                class_names.len()
            )));
        }
        for (idx, name) in class_names.iter().enumerate() {
            if self.index_of(name) != Some(idx) {
                return Err(ArtifactError::LabelEncoder(format!(
                    "class '{}' is at index {} in the class list but {:?} in the encoder",
                    name,
                    idx,
                    self.index_of(name)
                )));
            }
        }
        Ok(())
    }
}

fn read_artifact(path: &Path) -> Result<String, ArtifactError> {
    if !path.exists() {
        return Err(ArtifactError::MissingFile(path.to_path_buf()));
    }
    std::fs::read_to_string(path).map_err(|e| ArtifactError::Checkpoint {
        path: path.to_path_buf(),
        reason: e.to_string(),
    })
}

/// Read and check a JSON array of class names
pub fn load_class_names(path: &Path) -> Result<Vec<String>, ArtifactError> {
    let json = read_artifact(path)?;
    let names: Vec<String> =
        serde_json::from_str(&json).map_err(|e| ArtifactError::ClassList(e.to_string()))?;
    check_class_names(&names)?;
    Ok(names)
}

fn check_class_names(names: &[String]) -> Result<(), ArtifactError> {
    if names.is_empty() {
        return Err(ArtifactError::ClassList("class list is empty".to_string()));
    }
    let mut seen = HashSet::new();
    for name in names {
        if !seen.insert(name.as_str()) {
            return Err(ArtifactError::ClassList(format!("duplicate class '{}'", name)));
        }
    }
    Ok(())
}

/// Everything needed to serve predictions. Immutable once built.
pub struct ModelArtifact {
    classifier: Box<dyn Classifier>,
    class_names: Vec<String>,
    label_encoder: Option<LabelEncoder>,
    weights: WeightsSource,
    device: String,
    architecture: String,
}

impl std::fmt::Debug for ModelArtifact {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ModelArtifact")
            .field("architecture", &self.architecture)
            .field("num_classes", &self.class_names.len())
            .field("weights", &self.weights)
            .field("device", &self.device)
            .finish()
    }
}

impl ModelArtifact {
    /// Pair a classifier with its class list, checking they line up
    pub fn new(
        classifier: Box<dyn Classifier>,
        class_names: Vec<String>,
        weights: WeightsSource,
    ) -> Result<Self, ArtifactError> {
        check_class_names(&class_names)?;
        if classifier.num_classes() != class_names.len() {
            return Err(ArtifactError::HeadMismatch {
                outputs: classifier.num_classes(),
                classes: class_names.len(),
            });
        }

        Ok(Self {
            classifier,
            class_names,
            label_encoder: None,
            weights,
            device: "cpu".to_string(),
            architecture: ARCHITECTURE.to_string(),
        })
    }

    pub fn with_label_encoder(mut self, encoder: LabelEncoder) -> Result<Self, ArtifactError> {
        encoder.check_against(&self.class_names)?;
        self.label_encoder = Some(encoder);
        Ok(self)
    }

    pub fn with_device(mut self, device: impl Into<String>) -> Self {
        self.device = device.into();
        self
    }

    pub fn classifier(&self) -> &dyn Classifier {
        self.classifier.as_ref()
    }

    pub fn class_names(&self) -> &[String] {
        &self.class_names
    }

    pub fn num_classes(&self) -> usize {
        self.class_names.len()
    }

    pub fn label_encoder(&self) -> Option<&LabelEncoder> {
        self.label_encoder.as_ref()
    }

    pub fn weights(&self) -> WeightsSource {
        self.weights
    }

    pub fn device(&self) -> &str {
        &self.device
    }

    pub fn architecture(&self) -> &str {
        &self.architecture
    }
}

/// Loaded artifact, or why there is none
#[derive(Debug)]
pub enum ArtifactState {
    Ready(ModelArtifact),
    NotLoaded { reason: String },
}

impl ArtifactState {
    pub fn not_loaded(reason: impl Into<String>) -> Self {
        ArtifactState::NotLoaded {
            reason: reason.into(),
        }
    }

    pub fn is_ready(&self) -> bool {
        matches!(self, ArtifactState::Ready(_))
    }

    pub fn artifact(&self) -> Option<&ModelArtifact> {
        match self {
            ArtifactState::Ready(artifact) => Some(artifact),
            ArtifactState::NotLoaded { .. } => None,
        }
    }

    /// The artifact, or `ServiceUnavailable`
    pub fn ready(&self) -> Result<&ModelArtifact, PredictionError> {
        match self {
            ArtifactState::Ready(artifact) => Ok(artifact),
            ArtifactState::NotLoaded { reason } => {
                Err(PredictionError::ServiceUnavailable(reason.clone()))
            }
        }
    }
}

/// Normalized device name: `cpu`, `cuda`, or the backend's own description
pub fn device_name<B: Backend>(device: &B::Device) -> String {
    let description = format!("{:?}", device).to_lowercase();
    if description.contains("cuda") {
        "cuda".to_string()
    } else if description.contains("cpu") {
        "cpu".to_string()
    } else {
        description
    }
}

/// Load the full checkpoint for `num_classes` outputs
pub fn load_checkpoint<B: Backend>(
    checkpoint: &Path,
    num_classes: usize,
    device: &B::Device,
) -> Result<EfficientNet<B>, ArtifactError> {
    let file = checkpoint_file(checkpoint);
    if !file.exists() {
        return Err(ArtifactError::MissingFile(file));
    }

    let metadata = CheckpointMetadata::load(checkpoint)
        .map_err(|e| ArtifactError::Metadata(e.to_string()))?;
    if let Some(meta) = &metadata {
        if meta.architecture != ARCHITECTURE {
            return Err(ArtifactError::Metadata(format!(
                "checkpoint architecture is '{}', expected '{}'",
                meta.architecture, ARCHITECTURE
            )));
        }
        if meta.num_classes != num_classes {
            return Err(ArtifactError::HeadMismatch {
                outputs: meta.num_classes,
                classes: num_classes,
            });
        }
    }

    let model = guarded(&file, || {
        EfficientNet::<B>::new(&EfficientNetConfig::b3(num_classes), device).load_file(
            file.clone(),
            &CompactRecorder::new(),
            device,
        )
    })?
    .map_err(|e| ArtifactError::Checkpoint {
        path: file.clone(),
        reason: format!("{:?}", e),
    })?;

    // the record decides the real head width
    if model.num_classes() != num_classes {
        return Err(ArtifactError::HeadMismatch {
            outputs: model.num_classes(),
            classes: num_classes,
        });
    }

    check_forward(&model, &file, num_classes, device)?;

    if let Some(meta) = metadata {
        info!(
            "Checkpoint from epoch {} (validation accuracy {:.2}%)",
            meta.epoch,
            meta.val_accuracy * 100.0
        );
    }

    Ok(model)
}

/// Load backbone weights and attach a fresh classifier head
pub fn load_backbone<B: Backend>(
    backbone: &Path,
    num_classes: usize,
    device: &B::Device,
) -> Result<EfficientNet<B>, ArtifactError> {
    let file = checkpoint_file(backbone);
    if !file.exists() {
        return Err(ArtifactError::MissingFile(file));
    }

    let config = EfficientNetConfig::b3(num_classes);
    let features = guarded(&file, || {
        EfficientNetFeatures::<B>::new(&config, device).load_file(
            file.clone(),
            &CompactRecorder::new(),
            device,
        )
    })?
    .map_err(|e| ArtifactError::Checkpoint {
        path: file.clone(),
        reason: format!("{:?}", e),
    })?;

    let model = EfficientNet::with_features(features, &config, device);
    check_forward(&model, &file, num_classes, device)?;
    Ok(model)
}

/// Side of the dummy input used to check a loaded network end to end
const SHAPE_CHECK_SIZE: usize = 64;

/// Run `job`, turning a panic into a checkpoint error for `path`
///
/// Burn panics instead of returning an error when a record's parameter tree
/// or tensor shapes disagree with the module it is loaded into.
fn guarded<T>(path: &Path, job: impl FnOnce() -> T) -> Result<T, ArtifactError> {
    catch_unwind(AssertUnwindSafe(job)).map_err(|payload| ArtifactError::Checkpoint {
        path: path.to_path_buf(),
        reason: format!("incompatible record: {}", panic_message(payload.as_ref())),
    })
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(msg) = payload.downcast_ref::<&str>() {
        msg.to_string()
    } else if let Some(msg) = payload.downcast_ref::<String>() {
        msg.clone()
    } else {
        "panic while loading weights".to_string()
    }
}

/// One forward pass on a zero image; the output must be `[1, num_classes]`
///
/// Catches records whose channel widths differ from the B3 layout while the
/// head width still matches.
fn check_forward<B: Backend>(
    model: &EfficientNet<B>,
    path: &Path,
    num_classes: usize,
    device: &B::Device,
) -> Result<(), ArtifactError> {
    let dims = guarded(path, || {
        let input = Tensor::<B, 4>::zeros([1, 3, SHAPE_CHECK_SIZE, SHAPE_CHECK_SIZE], device);
        model.forward(input).dims()
    })?;

    if dims != [1, num_classes] {
        return Err(ArtifactError::Checkpoint {
            path: path.to_path_buf(),
            reason: format!("forward pass produced shape {:?}, expected [1, {}]", dims, num_classes),
        });
    }
    Ok(())
}

/// Load every artifact or return the first problem
pub fn try_load_artifacts<B: Backend>(
    paths: &ArtifactPaths,
    device: &B::Device,
) -> Result<ModelArtifact, ArtifactError> {
    let class_names = load_class_names(&paths.class_names)?;
    info!("Loaded {} class names", class_names.len());

    let label_encoder = match &paths.label_encoder {
        Some(path) if path.exists() => Some(LabelEncoder::load(path)?),
        Some(path) => {
            warn!("Label encoder not found at {:?}, continuing without it", path);
            None
        }
        None => None,
    };

    let (model, weights) = match load_checkpoint::<B>(&paths.checkpoint, class_names.len(), device) {
        Ok(model) => (model, WeightsSource::Custom),
        Err(primary) => match &paths.fallback {
            FallbackPolicy::Disabled => return Err(primary),
            FallbackPolicy::PretrainedBackbone { path } => {
                warn!(
                    "Custom checkpoint failed ({}); falling back to pretrained backbone {:?}. \
                     Predictions come from an untrained classifier head.",
                    primary, path
                );
                let model = load_backbone::<B>(path, class_names.len(), device).map_err(
                    |fallback| ArtifactError::FallbackFailed {
                        primary: primary.to_string(),
                        fallback: fallback.to_string(),
                    },
                )?;
                (model, WeightsSource::Fallback)
            }
        },
    };

    let classifier = BurnClassifier::new(model, device.clone());
    let mut artifact = ModelArtifact::new(Box::new(classifier), class_names, weights)?
        .with_device(device_name::<B>(device));
    if let Some(encoder) = label_encoder {
        artifact = artifact.with_label_encoder(encoder)?;
    }

    Ok(artifact)
}

/// Load artifacts at startup; failures are logged and yield `NotLoaded`
pub fn load_artifacts<B: Backend>(paths: &ArtifactPaths, device: &B::Device) -> ArtifactState {
    match try_load_artifacts::<B>(paths, device) {
        Ok(artifact) => {
            info!(
                "Model loaded: {} classes, {:?} weights on {}",
                artifact.num_classes(),
                artifact.weights(),
                artifact.device()
            );
            ArtifactState::Ready(artifact)
        }
        Err(e) => {
            error!("Failed to load model artifacts: {}", e);
            ArtifactState::not_loaded(e.to_string())
        }
    }
}
