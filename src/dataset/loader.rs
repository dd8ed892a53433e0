//! Plant disease dataset loader
//!
//! Reads a directory of class folders into labeled samples. Class folder
//! names sorted lexicographically define the class indices, which become the
//! class list and label encoder written next to the trained model.

use std::path::{Path, PathBuf};

use colored::Colorize;
use rand::seq::SliceRandom;
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};
use walkdir::WalkDir;

use crate::utils::error::{PlantDiseaseError, Result};

/// File extensions picked up by the loader
pub const IMAGE_EXTENSIONS: [&str; 3] = ["jpg", "jpeg", "png"];

/// A single image sample with its label
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ImageSample {
    pub path: PathBuf,
    /// Index into the sorted class list
    pub label: usize,
    pub class_name: String,
}

/// Labeled images discovered on disk
#[derive(Debug, Clone)]
pub struct PlantDiseaseDataset {
    pub root_dir: PathBuf,
    pub samples: Vec<ImageSample>,
    /// Sorted class names; index = label
    pub class_names: Vec<String>,
}

impl PlantDiseaseDataset {
    /// Scan a dataset directory
    ///
    /// The directory should be structured as:
    /// ```text
    /// root_dir/
    /// ├── Tomato___Early_blight/
    /// │   ├── image1.jpg
    /// │   └── image2.png
    /// ├── Tomato___healthy/
    /// │   └── ...
    /// └── ...
    /// ```
    pub fn new<P: AsRef<Path>>(root_dir: P) -> Result<Self> {
        let root_dir = root_dir.as_ref().to_path_buf();
        info!("Loading dataset from: {:?}", root_dir);

        if !root_dir.is_dir() {
            return Err(PlantDiseaseError::PathNotFound(root_dir));
        }

        let mut class_names: Vec<String> = Vec::new();
        for entry in std::fs::read_dir(&root_dir)? {
            let entry = entry?;
            if entry.file_type()?.is_dir() {
                if let Some(name) = entry.file_name().to_str() {
                    class_names.push(name.to_string());
                }
            }
        }
        class_names.sort();

        if class_names.is_empty() {
            return Err(PlantDiseaseError::Dataset(format!(
                "no class directories found in {:?}",
                root_dir
            )));
        }
        info!("Found {} classes", class_names.len());

        let mut samples = Vec::new();
        for (label, class_name) in class_names.iter().enumerate() {
            let mut paths: Vec<PathBuf> = WalkDir::new(root_dir.join(class_name))
                .min_depth(1)
                .max_depth(1)
                .into_iter()
                .filter_map(|e| e.ok())
                .map(|e| e.into_path())
                .filter(|p| is_image_file(p))
                .collect();
            paths.sort();

            debug!("Class '{}' (label {}): {} images", class_name, label, paths.len());

            samples.extend(paths.into_iter().map(|path| ImageSample {
                path,
                label,
                class_name: class_name.clone(),
            }));
        }

        info!("Loaded {} total samples", samples.len());

        Ok(Self {
            root_dir,
            samples,
            class_names,
        })
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    pub fn num_classes(&self) -> usize {
        self.class_names.len()
    }

    /// Drop samples whose image header cannot be read
    ///
    /// Returns the number of samples removed.
    pub fn drop_unreadable(&mut self) -> usize {
        let before = self.samples.len();
        let readable: Vec<bool> = self
            .samples
            .par_iter()
            .map(|s| match image::image_dimensions(&s.path) {
                Ok((w, h)) => w > 0 && h > 0,
                Err(e) => {
                    warn!("Skipping unreadable image {:?}: {}", s.path, e);
                    false
                }
            })
            .collect();

        let mut keep = readable.into_iter();
        self.samples.retain(|_| keep.next().unwrap_or(false));
        before - self.samples.len()
    }

    /// Keep at most `max` samples, chosen with a seeded shuffle
    pub fn truncate_random(&mut self, max: usize, seed: u64) {
        if self.samples.len() <= max {
            return;
        }
        let mut rng = ChaCha8Rng::seed_from_u64(seed);
        self.samples.shuffle(&mut rng);
        self.samples.truncate(max);
        self.samples.sort_by(|a, b| a.label.cmp(&b.label).then_with(|| a.path.cmp(&b.path)));
    }

    pub fn samples_by_class(&self, label: usize) -> Vec<&ImageSample> {
        self.samples.iter().filter(|s| s.label == label).collect()
    }

    pub fn stats(&self) -> DatasetStats {
        let mut class_counts = vec![0usize; self.num_classes()];
        for sample in &self.samples {
            class_counts[sample.label] += 1;
        }

        DatasetStats {
            total_samples: self.samples.len(),
            num_classes: self.num_classes(),
            class_counts,
            class_names: self.class_names.clone(),
        }
    }
}

fn is_image_file(path: &Path) -> bool {
    path.extension()
        .map(|ext| ext.to_string_lossy().to_lowercase())
        .is_some_and(|ext| IMAGE_EXTENSIONS.contains(&ext.as_str()))
}

/// Per-class sample counts
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DatasetStats {
    pub total_samples: usize,
    pub num_classes: usize,
    pub class_counts: Vec<usize>,
    pub class_names: Vec<String>,
}

impl DatasetStats {
    /// Smallest and largest class sizes
    pub fn imbalance(&self) -> Option<(usize, usize)> {
        let min = self.class_counts.iter().copied().min()?;
        let max = self.class_counts.iter().copied().max()?;
        Some((min, max))
    }

    /// Print statistics to console
    pub fn print(&self) {
        println!("\n{}", "Dataset Statistics:".cyan().bold());
        println!("  Total samples: {}", self.total_samples);
        println!("  Number of classes: {}", self.num_classes);
        println!("\n  Samples per class:");

        for (idx, (name, count)) in self.class_names.iter().zip(&self.class_counts).enumerate() {
            let bar_len = if self.total_samples > 0 {
                (*count as f32 / self.total_samples as f32 * 40.0) as usize
            } else {
                0
            };
            println!("    {:3}. {:45} {:6} {}", idx, name, count, "█".repeat(bar_len));
        }

        if let Some((min, max)) = self.imbalance() {
            if min > 0 && max / min >= 10 {
                println!(
                    "\n  {} largest class is {}x the smallest",
                    "Warning:".yellow(),
                    max / min
                );
            }
        }
    }
}
