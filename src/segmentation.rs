//! Segmentation adapter
//!
//! [`SegmentationModel`] is the narrow contract the pipeline depends on:
//! encoded image bytes in, encoded PNG bytes out whose alpha channel holds
//! the foreground confidence. [`ModelSegmenter`] implements it on top of any
//! [`InferenceBackend`].

use crate::error::{ConvertError, Result};
use crate::inference::InferenceBackend;
use crate::models::PreprocessingConfig;
use crate::types::SegmentationMask;
use image::codecs::png::{CompressionType, FilterType as PngFilterType, PngEncoder};
use image::imageops::{self, FilterType};
use image::{GrayImage, ImageBuffer, Rgb, RgbImage, Rgba, RgbaImage};
use ndarray::Array4;

/// Produces a foreground mask for an encoded image.
///
/// Implementations must be pure functions of their input and weights, and
/// safe to call from many threads at once.
pub trait SegmentationModel: Send + Sync {
    /// Segment `encoded` (PNG or JPEG), returning PNG bytes with alpha = mask
    ///
    /// # Errors
    /// - `ConvertError::Segmentation` for undecodable input or model failure
    fn segment(&self, encoded: &[u8]) -> Result<Vec<u8>>;

    /// Name used in logs
    fn name(&self) -> &str;
}

/// Placement of the resized image inside the square model input
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LetterboxTransform {
    pub target_size: u32,
    pub scaled_width: u32,
    pub scaled_height: u32,
    pub offset_x: u32,
    pub offset_y: u32,
}

impl LetterboxTransform {
    /// Aspect-preserving fit of `width` x `height` into a `target_size` square,
    /// centered
    #[must_use]
    pub fn fit(width: u32, height: u32, target_size: u32) -> Self {
        let scale = (target_size as f32 / width as f32).min(target_size as f32 / height as f32);
        let scaled_width = ((width as f32 * scale).round() as u32).clamp(1, target_size);
        let scaled_height = ((height as f32 * scale).round() as u32).clamp(1, target_size);

        Self {
            target_size,
            scaled_width,
            scaled_height,
            offset_x: (target_size - scaled_width) / 2,
            offset_y: (target_size - scaled_height) / 2,
        }
    }
}

/// Build the normalized NCHW input tensor, letterboxed on white
#[must_use]
pub fn preprocess(image: &RgbImage, config: &PreprocessingConfig) -> (Array4<f32>, LetterboxTransform) {
    let (width, height) = image.dimensions();
    let transform = LetterboxTransform::fit(width, height, config.target_size[0]);

    let resized = imageops::resize(
        image,
        transform.scaled_width,
        transform.scaled_height,
        FilterType::Triangle,
    );

    let target = transform.target_size;
    let mut canvas = ImageBuffer::from_pixel(target, target, Rgb([255u8, 255, 255]));
    imageops::replace(
        &mut canvas,
        &resized,
        i64::from(transform.offset_x),
        i64::from(transform.offset_y),
    );

    let size = target as usize;
    let mut tensor = Array4::<f32>::zeros((1, 3, size, size));
    let mean = config.normalization_mean;
    let std = config.normalization_std;

    for (x, y, pixel) in canvas.enumerate_pixels() {
        for (channel, value) in pixel.0.iter().enumerate() {
            if let (Some(slot), Some(m), Some(s)) = (
                tensor.get_mut([0, channel, y as usize, x as usize]),
                mean.get(channel),
                std.get(channel),
            ) {
                *slot = (f32::from(*value) / 255.0 - m) / s;
            }
        }
    }

    (tensor, transform)
}

/// Turn the model output back into a mask the size of the model input image.
///
/// Predictions are min-max normalized, the letterbox region is cropped out
/// and resampled to `dimensions`.
///
/// # Errors
/// - Output tensor is not `[1, 1, H, W]`
/// - Output spatial size does not match the letterbox
pub fn tensor_to_mask(
    tensor: &Array4<f32>,
    transform: &LetterboxTransform,
    dimensions: (u32, u32),
) -> Result<SegmentationMask> {
    let (batch, channels, out_height, out_width) = tensor.dim();
    if batch != 1 || channels != 1 {
        return Err(ConvertError::segmentation(format!(
            "Invalid output tensor shape {:?}",
            tensor.shape()
        )));
    }
    let target = transform.target_size as usize;
    if out_height != target || out_width != target {
        return Err(ConvertError::segmentation(format!(
            "Output tensor {out_width}x{out_height} does not match model input {target}x{target}"
        )));
    }

    let (min, max) = tensor
        .iter()
        .fold((f32::INFINITY, f32::NEG_INFINITY), |(lo, hi), &v| {
            (lo.min(v), hi.max(v))
        });
    let range = max - min;
    let normalize = |v: f32| -> f32 {
        if range > f32::EPSILON {
            (v - min) / range
        } else {
            v.clamp(0.0, 1.0)
        }
    };

    let cropped = GrayImage::from_fn(transform.scaled_width, transform.scaled_height, |x, y| {
        let value = tensor
            .get([
                0,
                0,
                (y + transform.offset_y) as usize,
                (x + transform.offset_x) as usize,
            ])
            .copied()
            .map_or(0.0, normalize);
        image::Luma([(value.clamp(0.0, 1.0) * 255.0).round() as u8])
    });

    let (width, height) = dimensions;
    let resized = if cropped.dimensions() == dimensions {
        cropped
    } else {
        imageops::resize(&cropped, width, height, FilterType::Lanczos3)
    };
    Ok(SegmentationMask::from_image(resized))
}

/// Segmentation adapter backed by an inference engine
#[derive(Debug)]
pub struct ModelSegmenter<B> {
    backend: B,
}

impl<B: InferenceBackend> ModelSegmenter<B> {
    pub fn new(backend: B) -> Self {
        Self { backend }
    }

    pub fn backend(&self) -> &B {
        &self.backend
    }

    /// Run the model on a decoded image and return its mask
    ///
    /// # Errors
    /// - Inference or output-shape failures
    pub fn mask_for(&self, image: &RgbImage) -> Result<SegmentationMask> {
        let (tensor, transform) = preprocess(image, self.backend.preprocessing_config());
        let output = self.backend.infer(&tensor)?;
        drop(tensor);
        tensor_to_mask(&output, &transform, image.dimensions())
    }
}

impl<B: InferenceBackend> SegmentationModel for ModelSegmenter<B> {
    fn segment(&self, encoded: &[u8]) -> Result<Vec<u8>> {
        let image = image::load_from_memory(encoded)
            .map_err(|e| ConvertError::segmentation(format!("Cannot decode model input: {e}")))?
            .into_rgb8();

        let mask = self.mask_for(&image)?;
        let stats = mask.statistics();
        log::debug!(
            "{} mask: {:.1}% foreground of {} pixels",
            self.backend.name(),
            stats.foreground_ratio * 100.0,
            stats.total_pixels
        );

        let (width, height) = image.dimensions();
        let mut cutout = RgbaImage::new(width, height);
        for ((dst, src), &alpha) in cutout
            .pixels_mut()
            .zip(image.pixels())
            .zip(mask.as_raw().iter())
        {
            let [r, g, b] = src.0;
            *dst = Rgba([r, g, b, alpha]);
        }
        drop(image);

        let mut buffer = Vec::new();
        let encoder =
            PngEncoder::new_with_quality(&mut buffer, CompressionType::Fast, PngFilterType::Adaptive);
        cutout
            .write_with_encoder(encoder)
            .map_err(|e| ConvertError::segmentation(format!("Failed to encode mask: {e}")))?;
        Ok(buffer)
    }

    fn name(&self) -> &str {
        self.backend.name()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::utils::mask::extract_alpha_mask;

    /// Backend predicting "foreground" wherever the input is darker than white
    #[derive(Debug)]
    struct DarkPixelBackend {
        config: PreprocessingConfig,
    }

    impl InferenceBackend for DarkPixelBackend {
        fn infer(&self, input: &Array4<f32>) -> Result<Array4<f32>> {
            let (_, _, h, w) = input.dim();
            let white = (1.0 - self.config.normalization_mean[0]) / self.config.normalization_std[0];
            Ok(Array4::from_shape_fn((1, 1, h, w), |(_, _, y, x)| {
                if input[[0, 0, y, x]] < white - 0.01 {
                    0.9
                } else {
                    0.1
                }
            }))
        }

        fn preprocessing_config(&self) -> &PreprocessingConfig {
            &self.config
        }

        fn name(&self) -> &'static str {
            "dark-pixel"
        }
    }

    fn segmenter(size: u32) -> ModelSegmenter<DarkPixelBackend> {
        ModelSegmenter::new(DarkPixelBackend {
            config: PreprocessingConfig {
                target_size: [size, size],
                ..PreprocessingConfig::default()
            },
        })
    }

    fn encode_png(image: &RgbImage) -> Vec<u8> {
        let mut buffer = std::io::Cursor::new(Vec::new());
        image.write_to(&mut buffer, image::ImageFormat::Png).unwrap();
        buffer.into_inner()
    }

    #[test]
    fn test_letterbox_fit() {
        let t = LetterboxTransform::fit(1024, 768, 320);
        assert_eq!((t.scaled_width, t.scaled_height), (320, 240));
        assert_eq!((t.offset_x, t.offset_y), (0, 40));

        let t = LetterboxTransform::fit(100, 100, 320);
        assert_eq!((t.scaled_width, t.scaled_height), (320, 320));
        assert_eq!((t.offset_x, t.offset_y), (0, 0));

        let t = LetterboxTransform::fit(5000, 1, 320);
        assert_eq!(t.scaled_height, 1);
    }

    #[test]
    fn test_preprocess_shape_and_padding() {
        let image = RgbImage::from_pixel(64, 32, Rgb([0, 0, 0]));
        let config = PreprocessingConfig::default();
        let (tensor, transform) = preprocess(&image, &config);

        assert_eq!(tensor.shape(), &[1, 3, 320, 320]);
        assert_eq!(transform.offset_y, 80);

        let white_r = (1.0 - config.normalization_mean[0]) / config.normalization_std[0];
        let black_r = (0.0 - config.normalization_mean[0]) / config.normalization_std[0];
        assert!((tensor[[0, 0, 0, 0]] - white_r).abs() < 1e-5);
        assert!((tensor[[0, 0, 160, 160]] - black_r).abs() < 1e-5);
    }

    #[test]
    fn test_tensor_to_mask_min_max_normalizes() {
        let transform = LetterboxTransform::fit(4, 4, 4);
        let tensor = Array4::from_shape_fn((1, 1, 4, 4), |(_, _, y, _)| 0.2 + 0.1 * y as f32);
        let mask = tensor_to_mask(&tensor, &transform, (4, 4)).unwrap();

        assert_eq!(mask.as_image().get_pixel(0, 0).0[0], 0);
        assert_eq!(mask.as_image().get_pixel(0, 3).0[0], 255);
    }

    #[test]
    fn test_tensor_to_mask_rejects_bad_shapes() {
        let transform = LetterboxTransform::fit(8, 8, 8);
        let wrong_channels = Array4::<f32>::zeros((1, 2, 8, 8));
        assert!(tensor_to_mask(&wrong_channels, &transform, (8, 8)).is_err());

        let wrong_size = Array4::<f32>::zeros((1, 1, 16, 16));
        assert!(tensor_to_mask(&wrong_size, &transform, (8, 8)).is_err());
    }

    #[test]
    fn test_segment_returns_rgba_png_with_mask() {
        let mut image = RgbImage::from_pixel(40, 20, Rgb([255, 255, 255]));
        for y in 5..15 {
            for x in 10..30 {
                image.put_pixel(x, y, Rgb([20, 20, 20]));
            }
        }

        let output = segmenter(64).segment(&encode_png(&image)).unwrap();
        let mask = extract_alpha_mask(&output).unwrap();

        assert_eq!(mask.dimensions(), (40, 20));
        assert!(mask.as_image().get_pixel(20, 10).0[0] > 200);
        assert!(mask.as_image().get_pixel(1, 1).0[0] < 50);
    }

    #[test]
    fn test_segment_rejects_unparsable_bytes() {
        let err = segmenter(32).segment(b"\x00\x01garbage").unwrap_err();
        assert!(matches!(err, ConvertError::Segmentation(_)));
        assert_eq!(segmenter(32).name(), "dark-pixel");
    }
}
