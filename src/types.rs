//! Core data types shared across the pipeline stages

use crate::error::{ConvertError, Result};
use image::{GrayImage, RgbaImage};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;

/// Pipeline states, in the order a successful run passes through them.
///
/// A failure at any point is reported as [`ConvertError::Stage`] carrying the
/// state the pipeline was trying to reach.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PipelineState {
    Loaded,
    Normalized,
    DownscaledForInference,
    CompressedForInference,
    Segmented,
    MaskUpscaled,
    Composited,
    Saved,
}

impl PipelineState {
    /// Whether this is the terminal success state
    #[must_use]
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Saved)
    }
}

impl fmt::Display for PipelineState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Loaded => "load",
            Self::Normalized => "normalization",
            Self::DownscaledForInference => "inference downscale",
            Self::CompressedForInference => "inference compression",
            Self::Segmented => "segmentation",
            Self::MaskUpscaled => "mask upscale",
            Self::Composited => "compositing",
            Self::Saved => "save",
        };
        f.write_str(name)
    }
}

/// Solid RGB color used to flatten the cutout instead of emitting transparency
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BackgroundColor {
    pub r: u8,
    pub g: u8,
    pub b: u8,
}

impl BackgroundColor {
    #[must_use]
    pub const fn new(r: u8, g: u8, b: u8) -> Self {
        Self { r, g, b }
    }

    #[must_use]
    pub const fn white() -> Self {
        Self::new(255, 255, 255)
    }

    #[must_use]
    pub fn to_rgb(self) -> image::Rgb<u8> {
        image::Rgb([self.r, self.g, self.b])
    }
}

impl fmt::Display for BackgroundColor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{},{},{}", self.r, self.g, self.b)
    }
}

impl FromStr for BackgroundColor {
    type Err = ConvertError;

    /// Parse `"R,G,B"` (whitespace tolerant) or `#RRGGBB`
    fn from_str(s: &str) -> Result<Self> {
        let trimmed = s.trim();

        if let Some(hex) = trimmed.strip_prefix('#') {
            if hex.len() != 6 || !hex.is_ascii() {
                return Err(ConvertError::invalid_config(format!(
                    "Invalid background color '{s}': expected #RRGGBB"
                )));
            }
            let channel = |range: std::ops::Range<usize>| {
                hex.get(range)
                    .and_then(|part| u8::from_str_radix(part, 16).ok())
                    .ok_or_else(|| {
                        ConvertError::invalid_config(format!(
                            "Invalid background color '{s}': bad hex digits"
                        ))
                    })
            };
            return Ok(Self::new(channel(0..2)?, channel(2..4)?, channel(4..6)?));
        }

        let parts: Vec<&str> = trimmed.split(',').map(str::trim).collect();
        let (r, g, b) = match parts.as_slice() {
            [r, g, b] => (*r, *g, *b),
            _ => {
                return Err(ConvertError::invalid_config(format!(
                    "Invalid background color '{s}': expected three comma-separated values"
                )))
            },
        };

        let parse = |value: &str| {
            value.parse::<u8>().map_err(|_| {
                ConvertError::config_value_error("background color channel", value, "0-255", None)
            })
        };

        Ok(Self::new(parse(r)?, parse(g)?, parse(b)?))
    }
}

/// Single-channel foreground confidence map (0 = background, 255 = subject)
#[derive(Debug, Clone, PartialEq)]
pub struct SegmentationMask {
    image: GrayImage,
}

impl SegmentationMask {
    /// Create a mask from raw row-major data
    pub fn new(data: Vec<u8>, dimensions: (u32, u32)) -> Result<Self> {
        let (width, height) = dimensions;
        if data.len() != width as usize * height as usize {
            return Err(ConvertError::internal(format!(
                "Mask data length {} does not match {width}x{height}",
                data.len()
            )));
        }
        GrayImage::from_raw(width, height, data)
            .map(|image| Self { image })
            .ok_or_else(|| {
                ConvertError::internal(format!(
                    "Mask data length does not match {width}x{height}"
                ))
            })
    }

    /// Create a mask with every pixel set to `value`
    #[must_use]
    pub fn filled(width: u32, height: u32, value: u8) -> Self {
        Self {
            image: GrayImage::from_pixel(width, height, image::Luma([value])),
        }
    }

    #[must_use]
    pub fn from_image(image: GrayImage) -> Self {
        Self { image }
    }

    /// Extract the alpha channel of an RGBA image as a mask
    #[must_use]
    pub fn from_alpha(rgba: &RgbaImage) -> Self {
        let (width, height) = rgba.dimensions();
        let data = rgba.pixels().map(|p| p.0[3]).collect();
        Self {
            image: GrayImage::from_raw(width, height, data)
                .unwrap_or_else(|| GrayImage::new(width, height)),
        }
    }

    #[must_use]
    pub fn dimensions(&self) -> (u32, u32) {
        self.image.dimensions()
    }

    #[must_use]
    pub fn width(&self) -> u32 {
        self.image.width()
    }

    #[must_use]
    pub fn height(&self) -> u32 {
        self.image.height()
    }

    #[must_use]
    pub fn as_image(&self) -> &GrayImage {
        &self.image
    }

    #[must_use]
    pub fn into_image(self) -> GrayImage {
        self.image
    }

    #[must_use]
    pub fn as_raw(&self) -> &[u8] {
        self.image.as_raw()
    }

    /// Get mask statistics
    #[must_use]
    pub fn statistics(&self) -> MaskStatistics {
        let total_pixels = self.image.as_raw().len();
        let foreground_pixels = self.image.as_raw().iter().filter(|&&x| x > 127).count();
        let foreground_ratio = if total_pixels == 0 {
            0.0
        } else {
            foreground_pixels as f32 / total_pixels as f32
        };

        MaskStatistics {
            total_pixels,
            foreground_pixels,
            foreground_ratio,
        }
    }
}

/// Mask coverage summary, logged after segmentation
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct MaskStatistics {
    pub total_pixels: usize,
    pub foreground_pixels: usize,
    pub foreground_ratio: f32,
}

/// Structured outcome handed back to the orchestrator
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemovalOutcome {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub filename: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub input_size: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub output_size: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub output_path: Option<PathBuf>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub failed_stage: Option<PipelineState>,
}

impl RemovalOutcome {
    #[must_use]
    pub fn succeeded(input_size: u64, output_size: u64, output_path: &Path) -> Self {
        Self {
            success: true,
            filename: None,
            input_size: Some(input_size),
            output_size: Some(output_size),
            output_path: Some(output_path.to_path_buf()),
            error: None,
            failed_stage: None,
        }
    }

    #[must_use]
    pub fn failed(error: &ConvertError) -> Self {
        Self {
            success: false,
            filename: None,
            input_size: None,
            output_size: None,
            output_path: None,
            error: Some(error.root().to_string()),
            failed_stage: error.stage(),
        }
    }

    #[must_use]
    pub fn with_filename<S: Into<String>>(mut self, filename: S) -> Self {
        self.filename = Some(filename.into());
        self
    }
}

impl From<Result<RemovalSummary>> for RemovalOutcome {
    fn from(result: Result<RemovalSummary>) -> Self {
        match result {
            Ok(summary) => Self::succeeded(
                summary.input_size,
                summary.output_size,
                &summary.output_path,
            ),
            Err(e) => Self::failed(&e),
        }
    }
}

/// Detailed record of a successful pipeline run
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RemovalSummary {
    pub input_size: u64,
    pub output_size: u64,
    pub output_path: PathBuf,
    /// Original (and output) dimensions
    pub dimensions: (u32, u32),
    /// Dimensions the model actually saw
    pub inference_dimensions: (u32, u32),
    /// Byte size of the payload sent to the segmentation model
    pub inference_payload_bytes: usize,
    /// Whether the size-budget compressor engaged
    pub compressed_for_inference: bool,
    pub background_applied: bool,
    pub timings: ProcessingTimings,
}

/// Per-stage wall-clock timings in milliseconds
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ProcessingTimings {
    pub decode_ms: u64,
    pub preprocess_ms: u64,
    pub segmentation_ms: u64,
    pub postprocess_ms: u64,
    pub encode_ms: u64,
    pub total_ms: u64,
}
