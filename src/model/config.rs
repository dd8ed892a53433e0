//! Checkpoint metadata
//!
//! Saved as a JSON sidecar next to each `.mpk` checkpoint so the loader can
//! check the class count before touching the weights.

use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::model::efficientnet::ARCHITECTURE;
use crate::utils::error::Result;

/// Extension Burn's `CompactRecorder` writes
pub const CHECKPOINT_EXTENSION: &str = "mpk";

/// Artifact file names inside a model directory
pub const MODEL_STEM: &str = "efficientnet_plant_disease";
pub const CLASS_NAMES_FILE: &str = "class_names.json";
pub const LABEL_ENCODER_FILE: &str = "label_encoder.json";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CheckpointMetadata {
    pub architecture: String,
    pub num_classes: usize,
    /// Epoch (1-based) the checkpoint was taken at
    pub epoch: usize,
    /// Validation accuracy in [0, 1]
    pub val_accuracy: f64,
    pub created_at: DateTime<Utc>,
}

impl CheckpointMetadata {
    pub fn new(num_classes: usize, epoch: usize, val_accuracy: f64) -> Self {
        Self {
            architecture: ARCHITECTURE.to_string(),
            num_classes,
            epoch,
            val_accuracy,
            created_at: Utc::now(),
        }
    }

    /// Sidecar location for a checkpoint path (with or without extension)
    pub fn sidecar_path(checkpoint: &Path) -> PathBuf {
        checkpoint.with_extension("json")
    }

    pub fn save(&self, checkpoint: &Path) -> Result<()> {
        let json = serde_json::to_string_pretty(self)?;
        std::fs::write(Self::sidecar_path(checkpoint), json)?;
        Ok(())
    }

    /// Read the sidecar if it exists
    pub fn load(checkpoint: &Path) -> Result<Option<Self>> {
        let path = Self::sidecar_path(checkpoint);
        if !path.exists() {
            return Ok(None);
        }
        let json = std::fs::read_to_string(path)?;
        Ok(Some(serde_json::from_str(&json)?))
    }
}

/// Path of the record file Burn reads for a checkpoint stem
pub fn checkpoint_file(checkpoint: &Path) -> PathBuf {
    checkpoint.with_extension(CHECKPOINT_EXTENSION)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sidecar_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let checkpoint = dir.path().join("best_model");

        assert_eq!(CheckpointMetadata::load(&checkpoint).unwrap(), None);

        let meta = CheckpointMetadata::new(38, 12, 0.97);
        meta.save(&checkpoint).unwrap();

        let loaded = CheckpointMetadata::load(&checkpoint).unwrap().unwrap();
        assert_eq!(loaded, meta);
        assert_eq!(loaded.architecture, "efficientnet_b3");
    }

    #[test]
    fn test_paths() {
        let stem = Path::new("models/efficientnet_plant_disease.pth");
        assert_eq!(
            checkpoint_file(stem),
            PathBuf::from("models/efficientnet_plant_disease.mpk")
        );
        assert_eq!(
            CheckpointMetadata::sidecar_path(stem),
            PathBuf::from("models/efficientnet_plant_disease.json")
        );
    }
}
