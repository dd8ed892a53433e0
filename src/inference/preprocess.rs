//! Image preprocessing
//!
//! Resize to the model's fixed input resolution with bilinear interpolation,
//! scale to [0, 1], then normalize each channel with the ImageNet statistics.
//! The training batcher goes through the same code path.

use burn::tensor::{backend::Backend, Tensor, TensorData};
use image::imageops::{self, FilterType};
use image::RgbImage;

use crate::inference::decode::DecodedImage;

/// Model input resolution (square)
pub const INPUT_SIZE: u32 = 224;

/// ImageNet normalization mean values (RGB)
pub const IMAGENET_MEAN: [f32; 3] = [0.485, 0.456, 0.406];
/// ImageNet normalization std values (RGB)
pub const IMAGENET_STD: [f32; 3] = [0.229, 0.224, 0.225];

/// Smallest and largest value a normalized channel can take
pub fn normalized_range() -> (f32, f32) {
    let lows = (0..3).map(|c| (0.0 - IMAGENET_MEAN[c]) / IMAGENET_STD[c]);
    let highs = (0..3).map(|c| (1.0 - IMAGENET_MEAN[c]) / IMAGENET_STD[c]);
    (
        lows.fold(f32::INFINITY, f32::min),
        highs.fold(f32::NEG_INFINITY, f32::max),
    )
}

/// A single normalized image in NCHW layout with batch size 1
#[derive(Debug, Clone, PartialEq)]
pub struct InputTensor {
    data: Vec<f32>,
    height: usize,
    width: usize,
}

impl InputTensor {
    /// `[1, 3, height, width]`
    pub fn shape(&self) -> [usize; 4] {
        [1, 3, self.height, self.width]
    }

    /// Flat CHW data
    pub fn data(&self) -> &[f32] {
        &self.data
    }

    pub fn into_data(self) -> Vec<f32> {
        self.data
    }

    pub fn to_tensor<B: Backend>(&self, device: &B::Device) -> Tensor<B, 4> {
        Tensor::from_data(TensorData::new(self.data.clone(), self.shape()), device)
    }
}

/// Deterministic resize and normalization
#[derive(Debug, Clone, Copy)]
pub struct Preprocessor {
    size: u32,
}

impl Default for Preprocessor {
    fn default() -> Self {
        Self { size: INPUT_SIZE }
    }
}

impl Preprocessor {
    pub fn new(size: u32) -> Self {
        Self { size }
    }

    pub fn size(&self) -> u32 {
        self.size
    }

    pub fn process(&self, image: &DecodedImage) -> InputTensor {
        self.process_rgb(image.pixels())
    }

    /// Resize and normalize an RGB buffer
    pub fn process_rgb(&self, rgb: &RgbImage) -> InputTensor {
        let resized;
        let pixels = if rgb.dimensions() == (self.size, self.size) {
            rgb
        } else {
            resized = imageops::resize(rgb, self.size, self.size, FilterType::Triangle);
            &resized
        };

        let num_pixels = (self.size * self.size) as usize;
        let mut data = vec![0.0f32; 3 * num_pixels];

        // CHW layout: all R values, then all G values, then all B values
        for (i, pixel) in pixels.pixels().enumerate() {
            for c in 0..3 {
                let value = pixel[c] as f32 / 255.0;
                data[c * num_pixels + i] = (value - IMAGENET_MEAN[c]) / IMAGENET_STD[c];
            }
        }

        InputTensor {
            data,
            height: self.size as usize,
            width: self.size as usize,
        }
    }
}
