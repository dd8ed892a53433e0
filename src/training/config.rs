//! Training hyperparameters

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::dataset::split::SplitConfig;
use crate::utils::error::{PlantDiseaseError, Result};

/// Configuration for a training run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TrainingConfig {
    /// Square input resolution
    pub image_size: u32,
    pub batch_size: usize,
    pub epochs: usize,
    pub learning_rate: f64,
    /// Fraction of the full dataset held out for validation
    pub validation_split: f64,
    /// Fraction of the full dataset held out for the final test
    pub test_split: f64,
    pub seed: u64,
    /// Learning rate multiplier when validation loss plateaus
    pub plateau_factor: f64,
    /// Epochs without validation loss improvement before reducing the LR
    pub plateau_patience: usize,
    pub min_learning_rate: f64,
    /// Use a random subset of the dataset
    pub max_samples: Option<usize>,
    /// Preprocess every image into memory before training
    pub cache_images: bool,
    /// Initialise the feature extractor from this backbone record
    pub backbone: Option<PathBuf>,
}

impl Default for TrainingConfig {
    fn default() -> Self {
        Self {
            image_size: 224,
            batch_size: 32,
            epochs: 50,
            learning_rate: 1e-3,
            validation_split: 0.2,
            test_split: 0.1,
            seed: 42,
            plateau_factor: 0.5,
            plateau_patience: 5,
            min_learning_rate: 1e-7,
            max_samples: None,
            cache_images: false,
            backbone: None,
        }
    }
}

impl TrainingConfig {
    /// Small, fast settings for smoke runs
    pub fn debug() -> Self {
        Self {
            epochs: 2,
            batch_size: 4,
            max_samples: Some(64),
            ..Self::default()
        }
    }

    pub fn split_config(&self) -> SplitConfig {
        SplitConfig {
            test_fraction: self.test_split,
            validation_fraction: self.validation_split,
            seed: self.seed,
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.batch_size == 0 || self.epochs == 0 || self.image_size == 0 {
            return Err(PlantDiseaseError::Config(
                "batch_size, epochs and image_size must be positive".to_string(),
            ));
        }
        if self.learning_rate <= 0.0 {
            return Err(PlantDiseaseError::Config("learning_rate must be positive".to_string()));
        }
        if !(0.0..1.0).contains(&self.plateau_factor) {
            return Err(PlantDiseaseError::Config(
                "plateau_factor must be in [0, 1)".to_string(),
            ));
        }
        self.split_config().validate()
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        std::fs::write(path, serde_json::to_string_pretty(self)?)?;
        Ok(())
    }

    pub fn load(path: &Path) -> Result<Self> {
        let json = std::fs::read_to_string(path)?;
        let config: Self = serde_json::from_str(&json)?;
        config.validate()?;
        Ok(config)
    }
}
