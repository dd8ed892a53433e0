//! Image decoding
//!
//! Turns uploaded bytes into an 8-bit RGB pixel grid. Whatever the source
//! encoding (grayscale, RGBA, palette, 16-bit) the output is always RGB.

use image::{DynamicImage, ImageFormat, RgbImage};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum DecodeError {
    #[error("empty upload")]
    Empty,

    #[error("could not decode image bytes: {0}")]
    Malformed(String),

    #[error("image has zero area ({width}x{height})")]
    ZeroArea { width: u32, height: u32 },
}

/// A decoded RGB image, row-major, 3 channels of 8 bits
#[derive(Debug, Clone)]
pub struct DecodedImage {
    pixels: RgbImage,
}

impl DecodedImage {
    pub fn from_rgb(pixels: RgbImage) -> Result<Self, DecodeError> {
        let (width, height) = pixels.dimensions();
        if width == 0 || height == 0 {
            return Err(DecodeError::ZeroArea { width, height });
        }
        Ok(Self { pixels })
    }

    pub fn width(&self) -> u32 {
        self.pixels.width()
    }

    pub fn height(&self) -> u32 {
        self.pixels.height()
    }

    pub fn pixels(&self) -> &RgbImage {
        &self.pixels
    }
}

/// Whether a content type announces an image (`image/*`)
pub fn is_image_content_type(content_type: &str) -> bool {
    content_type
        .trim()
        .to_ascii_lowercase()
        .starts_with("image/")
}

/// Decode raw bytes into a [`DecodedImage`]
///
/// The content type is only a hint: when it names a format the decoder knows
/// that format is tried first, otherwise the format is sniffed from the bytes.
pub fn decode_image(bytes: &[u8], content_type: Option<&str>) -> Result<DecodedImage, DecodeError> {
    if bytes.is_empty() {
        return Err(DecodeError::Empty);
    }

    let hinted = content_type
        .and_then(ImageFormat::from_mime_type)
        .and_then(|format| image::load_from_memory_with_format(bytes, format).ok());

    let image: DynamicImage = match hinted {
        Some(image) => image,
        None => image::load_from_memory(bytes).map_err(|e| DecodeError::Malformed(e.to_string()))?,
    };

    DecodedImage::from_rgb(image.to_rgb8())
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use image::{ImageBuffer, Luma, Rgba};
    use std::io::Cursor;

    pub(crate) fn encode_png(image: DynamicImage) -> Vec<u8> {
        let mut bytes = Vec::new();
        image
            .write_to(&mut Cursor::new(&mut bytes), ImageFormat::Png)
            .unwrap();
        bytes
    }

    #[test]
    fn test_decode_png_rgb() {
        let img = RgbImage::from_pixel(12, 8, image::Rgb([10, 200, 30]));
        let decoded = decode_image(&encode_png(DynamicImage::ImageRgb8(img)), Some("image/png")).unwrap();

        assert_eq!((decoded.width(), decoded.height()), (12, 8));
        assert_eq!(decoded.pixels().get_pixel(3, 3).0, [10, 200, 30]);
    }

    #[test]
    fn test_grayscale_and_rgba_become_rgb() {
        let gray: ImageBuffer<Luma<u8>, Vec<u8>> = ImageBuffer::from_pixel(4, 4, Luma([77]));
        let decoded = decode_image(&encode_png(DynamicImage::ImageLuma8(gray)), None).unwrap();
        assert_eq!(decoded.pixels().get_pixel(0, 0).0, [77, 77, 77]);

        let rgba: ImageBuffer<Rgba<u8>, Vec<u8>> = ImageBuffer::from_pixel(4, 4, Rgba([1, 2, 3, 255]));
        let decoded = decode_image(&encode_png(DynamicImage::ImageRgba8(rgba)), None).unwrap();
        assert_eq!(decoded.pixels().get_pixel(1, 1).0, [1, 2, 3]);
    }

    #[test]
    fn test_wrong_hint_falls_back_to_sniffing() {
        let img = RgbImage::from_pixel(5, 5, image::Rgb([0, 0, 0]));
        let bytes = encode_png(DynamicImage::ImageRgb8(img));
        assert!(decode_image(&bytes, Some("image/jpeg")).is_ok());
    }

    #[test]
    fn test_empty_and_garbage_fail() {
        assert!(matches!(decode_image(&[], None), Err(DecodeError::Empty)));
        assert!(matches!(
            decode_image(b"definitely not an image", Some("image/png")),
            Err(DecodeError::Malformed(_))
        ));
    }

    #[test]
    fn test_zero_area_rejected() {
        let empty = RgbImage::new(0, 10);
        assert!(matches!(
            DecodedImage::from_rgb(empty),
            Err(DecodeError::ZeroArea { width: 0, height: 10 })
        ));
    }

    #[test]
    fn test_content_type_check() {
        assert!(is_image_content_type("image/png"));
        assert!(is_image_content_type("Image/JPEG"));
        assert!(!is_image_content_type("application/pdf"));
        assert!(!is_image_content_type("text/plain"));
    }
}
