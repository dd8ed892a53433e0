//! Leaf plausibility heuristics
//!
//! Cheap checks run before inference to turn away images that are very
//! unlikely to be usable leaf photographs. This is a UX gate, not a
//! guarantee: false positives and negatives are expected.
//!
//! Checks run in order and the first failure wins:
//! 1. color: share of pixels inside the leaf HSV bands
//! 2. brightness: mean grayscale intensity
//! 3. texture: grayscale standard deviation
//! 4. resolution: smallest side in pixels
//!
//! An achromatic image (almost no saturated pixels) always fails the color
//! check, which says little about what is wrong with it. For those images the
//! color verdict is reported last, after brightness, texture and resolution.

use serde::{Deserialize, Serialize};

use crate::inference::decode::DecodedImage;

/// Inclusive HSV range in OpenCV 8-bit scaling (H 0-180, S and V 0-255)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HsvBand {
    pub name: String,
    pub lower: [u8; 3],
    pub upper: [u8; 3],
}

impl HsvBand {
    pub fn new(name: &str, lower: [u8; 3], upper: [u8; 3]) -> Self {
        Self {
            name: name.to_string(),
            lower,
            upper,
        }
    }

    pub fn contains(&self, hsv: [u8; 3]) -> bool {
        (0..3).all(|c| hsv[c] >= self.lower[c] && hsv[c] <= self.upper[c])
    }
}

/// Thresholds for [`LeafValidator`]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LeafValidatorConfig {
    /// Healthy, yellowing and diseased leaf tones
    pub bands: Vec<HsvBand>,
    /// Minimum percentage of pixels inside any band
    pub min_plant_coverage: f32,
    /// Mean grayscale floor (0-255)
    pub min_brightness: f32,
    /// Mean grayscale ceiling (0-255)
    pub max_brightness: f32,
    /// Grayscale standard deviation floor
    pub min_texture_std: f32,
    /// Minimum width and height in pixels
    pub min_dimension: u32,
}

impl Default for LeafValidatorConfig {
    fn default() -> Self {
        Self {
            bands: vec![
                HsvBand::new("green", [35, 40, 40], [85, 255, 255]),
                HsvBand::new("yellow", [20, 40, 40], [35, 255, 255]),
                HsvBand::new("brown", [8, 40, 20], [20, 255, 200]),
            ],
            min_plant_coverage: 25.0,
            min_brightness: 30.0,
            max_brightness: 240.0,
            min_texture_std: 20.0,
            min_dimension: 100,
        }
    }
}

/// Which check rejected an image
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum LeafCheck {
    Color,
    Brightness,
    Texture,
    Resolution,
}

/// Verdict and human-readable reason
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LeafValidationResult {
    pub is_valid: bool,
    pub reason: String,
    pub rejected_by: Option<LeafCheck>,
}

impl LeafValidationResult {
    fn accept() -> Self {
        Self {
            is_valid: true,
            reason: "Image looks like a plant leaf".to_string(),
            rejected_by: None,
        }
    }

    fn reject(check: LeafCheck, reason: String) -> Self {
        Self {
            is_valid: false,
            reason,
            rejected_by: Some(check),
        }
    }
}

/// Pixel statistics gathered in a single pass
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ImageStats {
    /// Percentage of pixels inside any leaf band
    pub plant_coverage: f32,
    /// Percentage of pixels at or above the lowest band saturation
    pub saturated_coverage: f32,
    pub mean_brightness: f32,
    pub texture_std: f32,
    pub width: u32,
    pub height: u32,
}

/// Convert an RGB pixel to OpenCV-scaled HSV
pub fn rgb_to_hsv(rgb: [u8; 3]) -> [u8; 3] {
    let [r, g, b] = rgb.map(f32::from);
    let max = r.max(g).max(b);
    let min = r.min(g).min(b);
    let delta = max - min;

    let saturation = if max > 0.0 { delta / max * 255.0 } else { 0.0 };

    let hue_degrees = if delta == 0.0 {
        0.0
    } else if max == r {
        60.0 * (g - b) / delta
    } else if max == g {
        120.0 + 60.0 * (b - r) / delta
    } else {
        240.0 + 60.0 * (r - g) / delta
    };
    let hue_degrees = if hue_degrees < 0.0 { hue_degrees + 360.0 } else { hue_degrees };

    [
        (hue_degrees / 2.0).round().min(180.0) as u8,
        saturation.round() as u8,
        max as u8,
    ]
}

/// ITU-R BT.601 luma, as used for grayscale conversion
fn luma(rgb: [u8; 3]) -> f32 {
    0.299 * rgb[0] as f32 + 0.587 * rgb[1] as f32 + 0.114 * rgb[2] as f32
}

#[derive(Debug, Clone, Default)]
pub struct LeafValidator {
    config: LeafValidatorConfig,
}

impl LeafValidator {
    pub fn new(config: LeafValidatorConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &LeafValidatorConfig {
        &self.config
    }

    pub fn stats(&self, image: &DecodedImage) -> ImageStats {
        let pixels = image.pixels();
        let total = (pixels.width() as u64 * pixels.height() as u64).max(1) as f64;

        let min_saturation = self
            .config
            .bands
            .iter()
            .map(|band| band.lower[1])
            .min()
            .unwrap_or(0);

        let mut in_band = 0u64;
        let mut saturated = 0u64;
        let mut sum = 0f64;
        let mut sum_sq = 0f64;

        for pixel in pixels.pixels() {
            let hsv = rgb_to_hsv(pixel.0);
            if self.config.bands.iter().any(|band| band.contains(hsv)) {
                in_band += 1;
            }
            if hsv[1] >= min_saturation {
                saturated += 1;
            }

            let gray = luma(pixel.0) as f64;
            sum += gray;
            sum_sq += gray * gray;
        }

        let mean = sum / total;
        let variance = (sum_sq / total - mean * mean).max(0.0);

        ImageStats {
            plant_coverage: (100.0 * in_band as f64 / total) as f32,
            saturated_coverage: (100.0 * saturated as f64 / total) as f32,
            mean_brightness: mean as f32,
            texture_std: variance.sqrt() as f32,
            width: pixels.width(),
            height: pixels.height(),
        }
    }

    pub fn validate(&self, image: &DecodedImage) -> LeafValidationResult {
        let stats = self.stats(image);
        self.evaluate(&stats)
    }

    /// Apply the checks to precomputed statistics
    pub fn evaluate(&self, stats: &ImageStats) -> LeafValidationResult {
        let color = self.check_color(stats);
        let achromatic = stats.saturated_coverage < self.config.min_plant_coverage;

        if !achromatic {
            if let Some(rejection) = color.clone() {
                return rejection;
            }
        }

        let remaining = [
            self.check_brightness(stats),
            self.check_texture(stats),
            self.check_resolution(stats),
        ];
        remaining
            .into_iter()
            .flatten()
            .next()
            .or(color)
            .unwrap_or_else(LeafValidationResult::accept)
    }

    fn check_color(&self, stats: &ImageStats) -> Option<LeafValidationResult> {
        (stats.plant_coverage < self.config.min_plant_coverage).then(|| {
            LeafValidationResult::reject(
                LeafCheck::Color,
                format!(
                    "Only {:.1}% of the image has leaf-like colors (need at least {:.0}%)",
                    stats.plant_coverage, self.config.min_plant_coverage
                ),
            )
        })
    }

    fn check_brightness(&self, stats: &ImageStats) -> Option<LeafValidationResult> {
        if stats.mean_brightness < self.config.min_brightness {
            Some(LeafValidationResult::reject(
                LeafCheck::Brightness,
                format!(
                    "Image is too dark (mean brightness {:.0}, minimum {:.0})",
                    stats.mean_brightness, self.config.min_brightness
                ),
            ))
        } else if stats.mean_brightness > self.config.max_brightness {
            Some(LeafValidationResult::reject(
                LeafCheck::Brightness,
                format!(
                    "Image is overexposed (mean brightness {:.0}, maximum {:.0})",
                    stats.mean_brightness, self.config.max_brightness
                ),
            ))
        } else {
            None
        }
    }

    fn check_texture(&self, stats: &ImageStats) -> Option<LeafValidationResult> {
        (stats.texture_std < self.config.min_texture_std).then(|| {
            LeafValidationResult::reject(
                LeafCheck::Texture,
                format!(
                    "Image is too uniform to be a leaf photo (texture {:.1}, minimum {:.0})",
                    stats.texture_std, self.config.min_texture_std
                ),
            )
        })
    }

    fn check_resolution(&self, stats: &ImageStats) -> Option<LeafValidationResult> {
        let min = self.config.min_dimension;
        (stats.width < min || stats.height < min).then(|| {
            LeafValidationResult::reject(
                LeafCheck::Resolution,
                format!(
                    "Image resolution {}x{} is too small (minimum {} pixels per side)",
                    stats.width, stats.height, min
                ),
            )
        })
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use image::{Rgb, RgbImage};

    /// Checkerboard of two greens: leaf-colored, textured, mid brightness
    pub(crate) fn leafy_image(size: u32) -> RgbImage {
        RgbImage::from_fn(size, size, |x, y| {
            if (x + y) % 2 == 0 {
                Rgb([30, 120, 30])
            } else {
                Rgb([90, 220, 70])
            }
        })
    }

    fn decoded(image: RgbImage) -> DecodedImage {
        DecodedImage::from_rgb(image).unwrap()
    }

    #[test]
    fn test_rgb_to_hsv_matches_opencv_scaling() {
        assert_eq!(rgb_to_hsv([0, 255, 0]), [60, 255, 255]);
        assert_eq!(rgb_to_hsv([255, 0, 0]), [0, 255, 255]);
        assert_eq!(rgb_to_hsv([0, 0, 255]), [120, 255, 255]);
        assert_eq!(rgb_to_hsv([128, 128, 128]), [0, 0, 128]);
        assert_eq!(rgb_to_hsv([0, 0, 0]), [0, 0, 0]);
    }

    #[test]
    fn test_leafy_image_is_accepted() {
        let result = LeafValidator::default().validate(&decoded(leafy_image(224)));
        assert!(result.is_valid, "{}", result.reason);
        assert_eq!(result.rejected_by, None);
    }

    #[test]
    fn test_black_image_rejected_for_brightness() {
        let black = RgbImage::from_pixel(224, 224, Rgb([0, 0, 0]));
        let result = LeafValidator::default().validate(&decoded(black));

        assert!(!result.is_valid);
        assert_eq!(result.rejected_by, Some(LeafCheck::Brightness));
        assert!(result.reason.contains("too dark"));
    }

    #[test]
    fn test_white_image_rejected_for_overexposure() {
        let white = RgbImage::from_pixel(224, 224, Rgb([255, 255, 255]));
        let result = LeafValidator::default().validate(&decoded(white));
        assert_eq!(result.rejected_by, Some(LeafCheck::Brightness));
        assert!(result.reason.contains("overexposed"));
    }

    #[test]
    fn test_uniform_gray_rejected_for_texture() {
        let gray = RgbImage::from_pixel(224, 224, Rgb([128, 128, 128]));
        let result = LeafValidator::default().validate(&decoded(gray));

        assert!(!result.is_valid);
        assert_eq!(result.rejected_by, Some(LeafCheck::Texture));
    }

    #[test]
    fn test_small_image_rejected_for_resolution() {
        let result = LeafValidator::default().validate(&decoded(leafy_image(50)));

        assert!(!result.is_valid);
        assert_eq!(result.rejected_by, Some(LeafCheck::Resolution));
        assert!(result.reason.contains("50x50"));
    }

    #[test]
    fn test_saturated_non_leaf_color_fails_color_first() {
        // bright blue checkerboard: saturated, textured, but no leaf hue
        let blue = RgbImage::from_fn(40, 40, |x, y| {
            if (x + y) % 2 == 0 {
                Rgb([20, 20, 120])
            } else {
                Rgb([60, 60, 250])
            }
        });
        let result = LeafValidator::default().validate(&decoded(blue));
        assert_eq!(result.rejected_by, Some(LeafCheck::Color));
    }

    #[test]
    fn test_stats() {
        let stats = LeafValidator::default().stats(&decoded(leafy_image(100)));
        assert!((stats.plant_coverage - 100.0).abs() < 1e-3);
        assert!(stats.texture_std > 40.0);
        assert!(stats.mean_brightness > 100.0 && stats.mean_brightness < 140.0);
    }

    #[test]
    fn test_thresholds_are_configurable() {
        let config = LeafValidatorConfig {
            min_dimension: 10,
            ..Default::default()
        };
        let result = LeafValidator::new(config).validate(&decoded(leafy_image(50)));
        assert!(result.is_valid);
    }
}
