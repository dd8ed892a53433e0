//! Inference engine
//!
//! Runs the classifier's forward pass and turns its scores into a probability
//! distribution. The classifier sits behind the [`Classifier`] trait so the
//! request pipeline can be exercised with stub models.

use std::sync::Mutex;

use burn::tensor::backend::Backend;

use crate::inference::error::PredictionError;
use crate::inference::preprocess::InputTensor;
use crate::model::artifacts::ArtifactState;
use crate::model::efficientnet::EfficientNet;

/// A read-only model producing one score per class
pub trait Classifier: Send + Sync {
    /// Width of the output layer
    fn num_classes(&self) -> usize;

    /// Raw scores (logits) for a single input
    fn logits(&self, input: &InputTensor) -> Result<Vec<f32>, PredictionError>;
}

/// [`Classifier`] backed by a Burn [`EfficientNet`]
///
/// Burn modules are `Send` but not `Sync`, so the network sits behind a mutex
/// and forward passes through one instance are serialized.
pub struct BurnClassifier<B: Backend> {
    model: Mutex<EfficientNet<B>>,
    device: B::Device,
    num_classes: usize,
}

impl<B: Backend> BurnClassifier<B> {
    pub fn new(model: EfficientNet<B>, device: B::Device) -> Self {
        let num_classes = model.num_classes();
        Self {
            model: Mutex::new(model),
            device,
            num_classes,
        }
    }
}

impl<B: Backend> Classifier for BurnClassifier<B> {
    fn num_classes(&self) -> usize {
        self.num_classes
    }

    fn logits(&self, input: &InputTensor) -> Result<Vec<f32>, PredictionError> {
        let tensor = input.to_tensor::<B>(&self.device);

        let output = {
            let model = self
                .model
                .lock()
                .map_err(|_| PredictionError::Unexpected("model lock poisoned".to_string()))?;
            model.forward(tensor)
        };

        output
            .into_data()
            .convert::<f32>()
            .to_vec::<f32>()
            .map_err(|e| PredictionError::Unexpected(format!("reading model output: {:?}", e)))
    }
}

/// Numerically stable softmax
pub fn softmax(logits: &[f32]) -> Vec<f32> {
    let max = logits.iter().copied().fold(f32::NEG_INFINITY, f32::max);
    let exps: Vec<f32> = logits.iter().map(|&x| (x - max).exp()).collect();
    let sum: f32 = exps.iter().sum();
    exps.into_iter().map(|e| e / sum).collect()
}

/// Forward pass plus softmax against the loaded artifact
///
/// Readiness is checked before any tensor work.
pub fn infer(state: &ArtifactState, input: &InputTensor) -> Result<Vec<f32>, PredictionError> {
    let artifact = state.ready()?;

    let logits = artifact.classifier().logits(input)?;
    if logits.len() != artifact.num_classes() {
        return Err(PredictionError::Unexpected(format!(
            "model produced {} scores for {} classes",
            logits.len(),
            artifact.num_classes()
        )));
    }
    if logits.iter().any(|x| !x.is_finite()) {
        return Err(PredictionError::Unexpected(
            "model produced non-finite scores".to_string(),
        ));
    }

    Ok(softmax(&logits))
}
