//! Dataset module for plant disease image folders
//!
//! This module provides functionality for:
//! - Loading a `root/<class_name>/*.jpg` image tree from disk
//! - Stratified train/validation/test splitting with a fixed seed
//! - Burn `Dataset`/`Batcher` implementations for training
//!
//! ## Split Strategy
//!
//! 1. **Test Set**: 10% of every class, held out for the final evaluation
//! 2. **Validation Set**: 20% of every class, for model selection and LR scheduling
//! 3. **Training Set**: the rest

pub mod burn_dataset;
pub mod loader;
pub mod split;

// Re-export main types for convenience
pub use burn_dataset::{PlantDiseaseBatch, PlantDiseaseBatcher, PlantDiseaseBurnDataset, PlantDiseaseItem};
pub use loader::{DatasetStats, ImageSample, PlantDiseaseDataset};
pub use split::{DatasetSplits, SplitConfig};

/// Plant name of a `Plant___Condition` class (e.g. "Tomato" from "Tomato___Early_blight")
pub fn plant_name(class_name: &str) -> &str {
    class_name.split("___").next().unwrap_or(class_name)
}

/// Whether a class denotes a healthy plant
pub fn is_healthy_class(class_name: &str) -> bool {
    class_name.to_lowercase().ends_with("healthy")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_plant_name() {
        assert_eq!(plant_name("Tomato___Early_blight"), "Tomato");
        assert_eq!(plant_name("Background"), "Background");
    }

    #[test]
    fn test_is_healthy_class() {
        assert!(is_healthy_class("Apple___healthy"));
        assert!(!is_healthy_class("Apple___Apple_scab"));
    }
}
