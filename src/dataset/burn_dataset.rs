//! Burn Dataset integration
//!
//! Implements Burn's `Dataset` and `Batcher` for training and evaluation.
//! Images go through the same [`Preprocessor`] as inference requests, so the
//! resize policy and normalization constants exist in one place.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};

use burn::data::dataloader::batcher::Batcher;
use burn::data::dataset::Dataset;
use burn::prelude::*;
use indicatif::{ProgressBar, ProgressStyle};
use rayon::prelude::*;
use tracing::{info, warn};

use crate::dataset::loader::ImageSample;
use crate::inference::decode::DecodedImage;
use crate::inference::preprocess::Preprocessor;
use crate::utils::error::{PlantDiseaseError, Result};

/// One preprocessed training example
#[derive(Clone, Debug)]
pub struct PlantDiseaseItem {
    /// Normalized CHW floats, `3 * size * size` long
    pub image: Vec<f32>,
    pub label: usize,
    pub path: PathBuf,
}

impl PlantDiseaseItem {
    /// Read, decode and preprocess an image file
    pub fn from_path(path: &Path, label: usize, preprocessor: &Preprocessor) -> Result<Self> {
        let rgb = image::open(path)
            .map_err(|e| PlantDiseaseError::image(path, e))?
            .to_rgb8();
        let decoded = DecodedImage::from_rgb(rgb)
            .map_err(|e| PlantDiseaseError::image(path, e))?;

        Ok(Self {
            image: preprocessor.process(&decoded).into_data(),
            label,
            path: path.to_path_buf(),
        })
    }
}

/// Dataset over (path, label) pairs
///
/// Images are loaded on demand unless the dataset was built with
/// [`PlantDiseaseBurnDataset::new_cached`].
#[derive(Debug, Clone)]
pub struct PlantDiseaseBurnDataset {
    samples: Vec<(PathBuf, usize)>,
    preprocessor: Preprocessor,
    cached_items: Option<Vec<PlantDiseaseItem>>,
}

impl PlantDiseaseBurnDataset {
    pub fn new(samples: Vec<(PathBuf, usize)>, preprocessor: Preprocessor) -> Self {
        Self {
            samples,
            preprocessor,
            cached_items: None,
        }
    }

    pub fn from_samples(samples: &[ImageSample], preprocessor: Preprocessor) -> Self {
        Self::new(
            samples.iter().map(|s| (s.path.clone(), s.label)).collect(),
            preprocessor,
        )
    }

    /// Load and preprocess every image up front, in parallel
    ///
    /// Images that fail to load are dropped with a warning.
    pub fn new_cached(samples: Vec<(PathBuf, usize)>, preprocessor: Preprocessor) -> Self {
        let total = samples.len();
        info!("Pre-loading {} images into memory", total);

        let pb = ProgressBar::new(total as u64);
        pb.set_style(
            ProgressStyle::default_bar()
                .template("  {spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} ({per_sec})")
                .unwrap_or_else(|_| ProgressStyle::default_bar())
                .progress_chars("#>-"),
        );

        let loaded = AtomicUsize::new(0);
        let cached_items: Vec<PlantDiseaseItem> = samples
            .par_iter()
            .filter_map(|(path, label)| {
                let result = match PlantDiseaseItem::from_path(path, *label, &preprocessor) {
                    Ok(item) => Some(item),
                    Err(e) => {
                        warn!("Skipping {:?}: {}", path, e);
                        None
                    }
                };
                let count = loaded.fetch_add(1, Ordering::Relaxed);
                if count % 100 == 0 {
                    pb.set_position(count as u64);
                }
                result
            })
            .collect();

        pb.finish_with_message(format!("Loaded {} images", cached_items.len()));

        let samples = cached_items
            .iter()
            .map(|item| (item.path.clone(), item.label))
            .collect();

        Self {
            samples,
            preprocessor,
            cached_items: Some(cached_items),
        }
    }

    pub fn image_size(&self) -> usize {
        self.preprocessor.size() as usize
    }

    pub fn labels(&self) -> impl Iterator<Item = usize> + '_ {
        self.samples.iter().map(|(_, label)| *label)
    }
}

impl Dataset<PlantDiseaseItem> for PlantDiseaseBurnDataset {
    fn get(&self, index: usize) -> Option<PlantDiseaseItem> {
        if let Some(cached) = &self.cached_items {
            return cached.get(index).cloned();
        }

        let (path, label) = self.samples.get(index)?;
        match PlantDiseaseItem::from_path(path, *label, &self.preprocessor) {
            Ok(item) => Some(item),
            Err(e) => {
                warn!("Failed to load {:?}: {}", path, e);
                None
            }
        }
    }

    fn len(&self) -> usize {
        self.samples.len()
    }
}

/// A batch of images and targets
#[derive(Clone, Debug)]
pub struct PlantDiseaseBatch<B: Backend> {
    /// `[batch_size, 3, height, width]`
    pub images: Tensor<B, 4>,
    /// `[batch_size]`
    pub targets: Tensor<B, 1, Int>,
}

/// Stacks preprocessed items into tensors
#[derive(Clone, Debug)]
pub struct PlantDiseaseBatcher {
    image_size: usize,
}

impl PlantDiseaseBatcher {
    pub fn new(image_size: usize) -> Self {
        Self { image_size }
    }
}

impl Default for PlantDiseaseBatcher {
    fn default() -> Self {
        Self::new(Preprocessor::default().size() as usize)
    }
}

impl<B: Backend> Batcher<B, PlantDiseaseItem, PlantDiseaseBatch<B>> for PlantDiseaseBatcher {
    fn batch(&self, items: Vec<PlantDiseaseItem>, device: &B::Device) -> PlantDiseaseBatch<B> {
        let batch_size = items.len();
        let size = self.image_size;

        let images_data: Vec<f32> = items.iter().flat_map(|item| item.image.iter().copied()).collect();
        let images = Tensor::<B, 4>::from_floats(
            TensorData::new(images_data, [batch_size, 3, size, size]),
            device,
        );

        let targets_data: Vec<i64> = items.iter().map(|item| item.label as i64).collect();
        let targets =
            Tensor::<B, 1, Int>::from_data(TensorData::new(targets_data, [batch_size]), device);

        PlantDiseaseBatch { images, targets }
    }
}
