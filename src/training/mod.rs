//! Training module for the plant disease classifier
//!
//! This module provides:
//! - Training hyperparameters (`TrainingConfig`)
//! - Reduce-on-plateau learning rate scheduling
//! - The supervised training loop, checkpointing and test evaluation

pub mod config;
pub mod scheduler;
pub mod trainer;

// Re-export main types for convenience
pub use config::TrainingConfig;
pub use scheduler::{PlateauMode, ReduceOnPlateau};
pub use trainer::{
    evaluate, evaluate_checkpoint, run_training, ConfusionMatrixFile, TestMetrics, TrainingHistory,
    TrainingReport,
};
