//! Stratified train/validation/test splitting
//!
//! The held-out test set and the validation set are carved out of every
//! class in proportion to its size, so small classes are represented in all
//! three splits. Splitting is deterministic for a given seed.

use std::collections::BTreeMap;
use std::path::Path;

use rand::seq::SliceRandom;
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::dataset::loader::ImageSample;
use crate::utils::error::{PlantDiseaseError, Result};

/// Split fractions, both relative to the full dataset
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SplitConfig {
    pub test_fraction: f64,
    pub validation_fraction: f64,
    pub seed: u64,
}

impl Default for SplitConfig {
    fn default() -> Self {
        Self {
            test_fraction: 0.10,
            validation_fraction: 0.20,
            seed: 42,
        }
    }
}

impl SplitConfig {
    pub fn new(test_fraction: f64, validation_fraction: f64, seed: u64) -> Result<Self> {
        let config = Self {
            test_fraction,
            validation_fraction,
            seed,
        };
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if !(0.0..1.0).contains(&self.test_fraction) {
            return Err(PlantDiseaseError::Config(
                "Test fraction must be in [0.0, 1.0)".to_string(),
            ));
        }
        if !(0.0..1.0).contains(&self.validation_fraction) {
            return Err(PlantDiseaseError::Config(
                "Validation fraction must be in [0.0, 1.0)".to_string(),
            ));
        }
        if self.test_fraction + self.validation_fraction >= 1.0 {
            return Err(PlantDiseaseError::Config(
                "Test + validation fractions must be less than 1.0".to_string(),
            ));
        }
        Ok(())
    }
}

/// The three disjoint splits
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatasetSplits {
    pub train: Vec<ImageSample>,
    pub validation: Vec<ImageSample>,
    pub test: Vec<ImageSample>,
    pub class_names: Vec<String>,
    pub config: SplitConfig,
}

impl DatasetSplits {
    /// Stratified split of `samples`
    pub fn stratified(
        samples: &[ImageSample],
        class_names: &[String],
        config: SplitConfig,
    ) -> Result<Self> {
        config.validate()?;
        if samples.is_empty() {
            return Err(PlantDiseaseError::Dataset(
                "No images provided for splitting".to_string(),
            ));
        }

        let mut by_class: BTreeMap<usize, Vec<&ImageSample>> = BTreeMap::new();
        for sample in samples {
            by_class.entry(sample.label).or_default().push(sample);
        }

        let mut rng = ChaCha8Rng::seed_from_u64(config.seed);
        let mut train = Vec::new();
        let mut validation = Vec::new();
        let mut test = Vec::new();

        for class_samples in by_class.values_mut() {
            class_samples.shuffle(&mut rng);
            let (n_test, n_val) = class_split_sizes(class_samples.len(), &config);

            let (test_part, rest) = class_samples.split_at(n_test);
            let (val_part, train_part) = rest.split_at(n_val);
            test.extend(test_part.iter().map(|s| (*s).clone()));
            validation.extend(val_part.iter().map(|s| (*s).clone()));
            train.extend(train_part.iter().map(|s| (*s).clone()));
        }

        train.shuffle(&mut rng);
        validation.shuffle(&mut rng);
        test.shuffle(&mut rng);

        info!(
            "Stratified split: {} train, {} validation, {} test",
            train.len(),
            validation.len(),
            test.len()
        );

        Ok(Self {
            train,
            validation,
            test,
            class_names: class_names.to_vec(),
            config,
        })
    }

    pub fn total(&self) -> usize {
        self.train.len() + self.validation.len() + self.test.len()
    }

    /// Per-class sample counts of one split
    pub fn class_counts(&self, split: &[ImageSample]) -> Vec<usize> {
        let mut counts = vec![0usize; self.class_names.len()];
        for sample in split {
            if let Some(count) = counts.get_mut(sample.label) {
                *count += 1;
            }
        }
        counts
    }

    /// Persist the split so evaluation can reuse the exact test set
    pub fn save(&self, path: &Path) -> Result<()> {
        let json = serde_json::to_string_pretty(self)?;
        std::fs::write(path, json)?;
        Ok(())
    }

    pub fn load(path: &Path) -> Result<Self> {
        let json = std::fs::read_to_string(path)?;
        Ok(serde_json::from_str(&json)?)
    }
}

/// (test, validation) sizes for one class; at least one sample stays in training
fn class_split_sizes(n: usize, config: &SplitConfig) -> (usize, usize) {
    if n == 0 {
        return (0, 0);
    }
    let mut n_test = (n as f64 * config.test_fraction).round() as usize;
    let mut n_val = (n as f64 * config.validation_fraction).round() as usize;

    while n_test + n_val >= n {
        if n_val > 0 {
            n_val -= 1;
        } else if n_test > 0 {
            n_test -= 1;
        } else {
            break;
        }
    }
    (n_test, n_val)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;
    use std::path::PathBuf;

    fn samples(per_class: &[usize]) -> (Vec<ImageSample>, Vec<String>) {
        let names: Vec<String> = (0..per_class.len()).map(|c| format!("class_{}", c)).collect();
        let samples = per_class
            .iter()
            .enumerate()
            .flat_map(|(label, &n)| {
                let name = names[label].clone();
                (0..n).map(move |i| ImageSample {
                    path: PathBuf::from(format!("{}/{}.jpg", name, i)),
                    label,
                    class_name: name.clone(),
                })
            })
            .collect();
        (samples, names)
    }

    #[test]
    fn test_default_fractions() {
        let config = SplitConfig::default();
        assert_eq!(config.test_fraction, 0.10);
        assert_eq!(config.validation_fraction, 0.20);
        assert_eq!(config.seed, 42);
    }

    #[test]
    fn test_invalid_fractions() {
        assert!(SplitConfig::new(0.5, 0.5, 1).is_err());
        assert!(SplitConfig::new(-0.1, 0.2, 1).is_err());
        assert!(SplitConfig::new(0.1, 0.2, 1).is_ok());
    }

    #[test]
    fn test_stratified_proportions() {
        let (samples, names) = samples(&[100, 50]);
        let splits = DatasetSplits::stratified(&samples, &names, SplitConfig::default()).unwrap();

        assert_eq!(splits.total(), 150);
        assert_eq!(splits.class_counts(&splits.test), vec![10, 5]);
        assert_eq!(splits.class_counts(&splits.validation), vec![20, 10]);
        assert_eq!(splits.class_counts(&splits.train), vec![70, 35]);
    }

    #[test]
    fn test_splits_are_disjoint() {
        let (samples, names) = samples(&[30, 30, 30]);
        let splits = DatasetSplits::stratified(&samples, &names, SplitConfig::default()).unwrap();

        let mut seen = HashSet::new();
        for sample in splits.train.iter().chain(&splits.validation).chain(&splits.test) {
            assert!(seen.insert(sample.path.clone()));
        }
        assert_eq!(seen.len(), 90);
    }

    #[test]
    fn test_split_is_deterministic() {
        let (samples, names) = samples(&[20, 20]);
        let a = DatasetSplits::stratified(&samples, &names, SplitConfig::default()).unwrap();
        let b = DatasetSplits::stratified(&samples, &names, SplitConfig::default()).unwrap();
        assert_eq!(a.test, b.test);
        assert_eq!(a.train, b.train);
    }

    #[test]
    fn test_tiny_class_keeps_a_training_sample() {
        assert_eq!(class_split_sizes(1, &SplitConfig::default()), (0, 0));
        let (test, val) = class_split_sizes(3, &SplitConfig::default());
        assert!(test + val < 3);
    }

    #[test]
    fn test_save_and_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("splits.json");
        let (samples, names) = samples(&[10, 10]);
        let splits = DatasetSplits::stratified(&samples, &names, SplitConfig::default()).unwrap();
        splits.save(&path).unwrap();

        let loaded = DatasetSplits::load(&path).unwrap();
        assert_eq!(loaded.test, splits.test);
        assert_eq!(loaded.class_names, names);
    }

    #[test]
    fn test_empty_input() {
        assert!(DatasetSplits::stratified(&[], &[], SplitConfig::default()).is_err());
    }
}
