//! Size-budget compression of the inference payload
//!
//! The segmentation model only ever sees the bytes produced here. The
//! downscaled copy is first encoded as PNG; when that exceeds the byte
//! budget the [`SizeBudgetCompressor`] walks a JPEG quality ladder and then
//! shrinks dimensions until the payload fits. Missing the budget is not an
//! error: the smallest attempt is returned.

use crate::config::{PipelineConfig, PngCompression};
use crate::error::{ConvertError, Result};
use crate::types::PipelineState;
use image::codecs::jpeg::JpegEncoder;
use image::codecs::png::{FilterType as PngFilterType, PngEncoder};
use image::imageops::{self, FilterType};
use image::RgbImage;
use serde::Serialize;
use std::borrow::Cow;

/// Encoding of an inference payload
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum PayloadFormat {
    Png,
    Jpeg,
}

/// One encode tried by the compressor
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct CompressionAttempt {
    pub quality: u8,
    pub width: u32,
    pub height: u32,
    pub size_bytes: usize,
}

/// Encoded bytes handed to the segmentation model
#[derive(Debug, Clone)]
pub struct InferencePayload {
    pub bytes: Vec<u8>,
    pub format: PayloadFormat,
    pub width: u32,
    pub height: u32,
    /// JPEG quality of the chosen attempt
    pub quality: Option<u8>,
    pub within_budget: bool,
    /// Every JPEG encode tried, in order (empty when PNG fit)
    pub attempts: Vec<CompressionAttempt>,
}

impl InferencePayload {
    /// Whether the compressor had to engage
    #[must_use]
    pub fn was_compressed(&self) -> bool {
        self.format == PayloadFormat::Jpeg
    }

    /// Smallest size seen after each attempt; never increases
    #[must_use]
    pub fn best_sizes(&self) -> Vec<usize> {
        self.attempts
            .iter()
            .scan(usize::MAX, |best, attempt| {
                *best = (*best).min(attempt.size_bytes);
                Some(*best)
            })
            .collect()
    }
}

/// Encode an RGB raster as PNG
///
/// # Errors
/// - Encoder failure
pub fn encode_png(image: &RgbImage, compression: PngCompression) -> Result<Vec<u8>> {
    let mut buffer = Vec::new();
    let encoder = PngEncoder::new_with_quality(
        &mut buffer,
        compression.to_compression_type(),
        PngFilterType::Adaptive,
    );
    image
        .write_with_encoder(encoder)
        .map_err(|e| ConvertError::encode(format!("PNG encoding failed: {e}")))?;
    Ok(buffer)
}

/// Encode an RGB raster as baseline JPEG
///
/// # Errors
/// - Encoder failure
pub fn encode_jpeg(image: &RgbImage, quality: u8) -> Result<Vec<u8>> {
    let mut buffer = Vec::new();
    let encoder = JpegEncoder::new_with_quality(&mut buffer, quality.clamp(1, 100));
    image
        .write_with_encoder(encoder)
        .map_err(|e| ConvertError::encode(format!("JPEG encoding failed: {e}")))?;
    Ok(buffer)
}

/// Quality ladder followed by cumulative dimension shrinking
#[derive(Debug, Clone)]
pub struct SizeBudgetCompressor {
    budget_bytes: usize,
    quality_ladder: Vec<u8>,
    shrink_factor: f32,
    shrink_rounds: u32,
    shrink_quality: u8,
}

impl SizeBudgetCompressor {
    #[must_use]
    pub fn new(config: &PipelineConfig) -> Self {
        Self {
            budget_bytes: config.size_budget_bytes,
            quality_ladder: config.quality_ladder.clone(),
            shrink_factor: config.shrink_factor,
            shrink_rounds: config.shrink_rounds,
            shrink_quality: config.shrink_quality,
        }
    }

    /// Upper bound on the number of encodes
    #[must_use]
    pub fn max_attempts(&self) -> usize {
        self.quality_ladder.len() + self.shrink_rounds as usize
    }

    /// Re-encode `image` until it fits the budget, or return the smallest attempt
    ///
    /// # Errors
    /// - Encoder failure
    pub fn compress(&self, image: &RgbImage) -> Result<InferencePayload> {
        let (width, height) = image.dimensions();
        let mut attempts = Vec::with_capacity(self.max_attempts());
        let mut best: Option<(Vec<u8>, CompressionAttempt)> = None;

        for &quality in &self.quality_ladder {
            let bytes = encode_jpeg(image, quality)?;
            if let Some(payload) = self.record(bytes, quality, (width, height), &mut attempts, &mut best) {
                return Ok(payload);
            }
        }

        for round in 1..=self.shrink_rounds {
            let (w, h) = self.shrunk_dimensions(width, height, round);
            let shrunk: Cow<'_, RgbImage> = if (w, h) == (width, height) {
                Cow::Borrowed(image)
            } else {
                Cow::Owned(imageops::resize(image, w, h, FilterType::Lanczos3))
            };
            let bytes = encode_jpeg(&shrunk, self.shrink_quality)?;
            drop(shrunk);

            if let Some(payload) =
                self.record(bytes, self.shrink_quality, (w, h), &mut attempts, &mut best)
            {
                return Ok(payload);
            }
        }

        let (bytes, chosen) = best.ok_or_else(|| {
            ConvertError::internal("Size-budget compressor made no attempts")
        })?;
        log::warn!(
            "Inference payload stays over budget after {} attempts: best {} bytes > {} bytes ({}x{} q{})",
            attempts.len(),
            chosen.size_bytes,
            self.budget_bytes,
            chosen.width,
            chosen.height,
            chosen.quality
        );

        Ok(InferencePayload {
            bytes,
            format: PayloadFormat::Jpeg,
            width: chosen.width,
            height: chosen.height,
            quality: Some(chosen.quality),
            within_budget: false,
            attempts,
        })
    }

    /// Log an attempt and keep it if it is the smallest so far; returns the
    /// payload once the budget is met
    fn record(
        &self,
        bytes: Vec<u8>,
        quality: u8,
        (width, height): (u32, u32),
        attempts: &mut Vec<CompressionAttempt>,
        best: &mut Option<(Vec<u8>, CompressionAttempt)>,
    ) -> Option<InferencePayload> {
        let attempt = CompressionAttempt {
            quality,
            width,
            height,
            size_bytes: bytes.len(),
        };
        attempts.push(attempt);
        log::debug!(
            "Compression attempt {}: {width}x{height} q{quality} -> {} bytes",
            attempts.len(),
            attempt.size_bytes
        );

        if attempt.size_bytes <= self.budget_bytes {
            return Some(InferencePayload {
                bytes,
                format: PayloadFormat::Jpeg,
                width,
                height,
                quality: Some(quality),
                within_budget: true,
                attempts: std::mem::take(attempts),
            });
        }

        let is_smaller = best
            .as_ref()
            .map_or(true, |(_, current)| attempt.size_bytes < current.size_bytes);
        if is_smaller {
            *best = Some((bytes, attempt));
        }
        None
    }

    fn shrunk_dimensions(&self, width: u32, height: u32, round: u32) -> (u32, u32) {
        let factor = f64::from(self.shrink_factor).powi(round as i32);
        let scale = |edge: u32| ((f64::from(edge) * factor).round() as u32).max(1);
        (scale(width), scale(height))
    }
}

/// Encode the inference copy, engaging the compressor only when the PNG
/// encoding exceeds the configured budget
///
/// # Errors
/// - PNG encoder failure, tagged with the downscale stage
/// - JPEG encoder failure inside the compressor, tagged with the compression
///   stage
pub fn prepare_inference_payload(
    image: &RgbImage,
    config: &PipelineConfig,
) -> Result<InferencePayload> {
    let (width, height) = image.dimensions();
    let png = encode_png(image, PngCompression::Default)
        .map_err(|e| e.at_stage(PipelineState::DownscaledForInference))?;

    if png.len() <= config.size_budget_bytes {
        log::debug!(
            "Inference payload {width}x{height} PNG is {} bytes, within budget",
            png.len()
        );
        return Ok(InferencePayload {
            bytes: png,
            format: PayloadFormat::Png,
            width,
            height,
            quality: None,
            within_budget: true,
            attempts: Vec::new(),
        });
    }

    log::debug!(
        "Inference payload PNG is {} bytes, over budget of {}; compressing",
        png.len(),
        config.size_budget_bytes
    );
    drop(png);
    SizeBudgetCompressor::new(config)
        .compress(image)
        .map_err(|e| e.at_stage(PipelineState::CompressedForInference))
}
