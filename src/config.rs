//! Configuration types for the background removal pipeline

use crate::error::{ConvertError, Result};
use crate::models::ModelSource;
use serde::{Deserialize, Serialize};

/// Longest edge, in pixels, of the copy the segmentation model sees
pub const DEFAULT_INFERENCE_MAX_EDGE: u32 = 1024;

/// Byte budget for the payload sent to the segmentation model (2 MiB)
pub const DEFAULT_SIZE_BUDGET_BYTES: usize = 2 * 1024 * 1024;

/// JPEG qualities tried, in order, before shrinking dimensions
pub const DEFAULT_QUALITY_LADDER: [u8; 5] = [95, 85, 75, 60, 45];

/// Per-round dimension multiplier once the quality ladder is exhausted
pub const DEFAULT_SHRINK_FACTOR: f32 = 0.85;

/// Maximum number of dimension-shrink rounds
pub const DEFAULT_SHRINK_ROUNDS: u32 = 5;

/// JPEG quality used during every shrink round
pub const DEFAULT_SHRINK_QUALITY: u8 = 45;

/// Execution provider options for ONNX Runtime
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExecutionProvider {
    /// Auto-detect best available provider (CUDA > `CoreML` > CPU)
    #[default]
    Auto,
    /// CPU execution (always available)
    Cpu,
    /// NVIDIA CUDA GPU acceleration
    Cuda,
    /// Apple Silicon GPU acceleration
    CoreMl,
}

impl std::fmt::Display for ExecutionProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Auto => write!(f, "auto"),
            Self::Cpu => write!(f, "cpu"),
            Self::Cuda => write!(f, "cuda"),
            Self::CoreMl => write!(f, "coreml"),
        }
    }
}

impl std::str::FromStr for ExecutionProvider {
    type Err = ConvertError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "auto" => Ok(Self::Auto),
            "cpu" => Ok(Self::Cpu),
            "cuda" => Ok(Self::Cuda),
            "coreml" => Ok(Self::CoreMl),
            other => Err(ConvertError::invalid_config(format!(
                "Unknown execution provider '{other}' (expected auto, cpu, cuda or coreml)"
            ))),
        }
    }
}

/// Inference engine used to run the segmentation model
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackendType {
    /// ONNX Runtime backend (supports GPU acceleration)
    Onnx,
    /// Tract backend (pure Rust, no external dependencies)
    Tract,
}

impl Default for BackendType {
    fn default() -> Self {
        if cfg!(feature = "onnx") {
            Self::Onnx
        } else {
            Self::Tract
        }
    }
}

impl std::fmt::Display for BackendType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Onnx => write!(f, "onnx"),
            Self::Tract => write!(f, "tract"),
        }
    }
}

/// Zlib effort for the final lossless PNG
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PngCompression {
    Fast,
    Default,
    /// Smallest output, slowest encode
    #[default]
    Best,
}

impl PngCompression {
    /// Map a zlib-style level (0-9) onto the encoder presets
    #[must_use]
    pub fn from_level(level: u8) -> Self {
        match level {
            0..=3 => Self::Fast,
            4..=6 => Self::Default,
            _ => Self::Best,
        }
    }

    #[must_use]
    pub fn to_compression_type(self) -> image::codecs::png::CompressionType {
        use image::codecs::png::CompressionType;
        match self {
            Self::Fast => CompressionType::Fast,
            Self::Default => CompressionType::Default,
            Self::Best => CompressionType::Best,
        }
    }
}

impl std::str::FromStr for PngCompression {
    type Err = ConvertError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "fast" => Ok(Self::Fast),
            "default" => Ok(Self::Default),
            "best" => Ok(Self::Best),
            other => other
                .parse::<u8>()
                .ok()
                .filter(|level| *level <= 9)
                .map(Self::from_level)
                .ok_or_else(|| {
                    ConvertError::config_value_error(
                        "PNG compression",
                        other,
                        "fast, default, best or 0-9",
                        Some("best"),
                    )
                }),
        }
    }
}

/// Tunables of the resolution-decoupled removal pipeline
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PipelineConfig {
    /// Longest edge of the inference copy
    pub inference_max_edge: u32,

    /// Byte budget above which the compressor engages before segmentation
    pub size_budget_bytes: usize,

    /// Descending JPEG qualities tried by the compressor
    pub quality_ladder: Vec<u8>,

    /// Dimension multiplier per shrink round, in (0, 1)
    pub shrink_factor: f32,

    /// Maximum number of shrink rounds
    pub shrink_rounds: u32,

    /// JPEG quality used during shrink rounds
    pub shrink_quality: u8,

    /// Compression effort for the final PNG
    pub png_compression: PngCompression,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            inference_max_edge: DEFAULT_INFERENCE_MAX_EDGE,
            size_budget_bytes: DEFAULT_SIZE_BUDGET_BYTES,
            quality_ladder: DEFAULT_QUALITY_LADDER.to_vec(),
            shrink_factor: DEFAULT_SHRINK_FACTOR,
            shrink_rounds: DEFAULT_SHRINK_ROUNDS,
            shrink_quality: DEFAULT_SHRINK_QUALITY,
            png_compression: PngCompression::default(),
        }
    }
}

impl PipelineConfig {
    /// Create a new configuration builder for fluent API construction
    ///
    /// # Examples
    /// ```rust
    /// use convertall_bgremove::{PipelineConfig, PngCompression};
    ///
    /// let config = PipelineConfig::builder()
    ///     .inference_max_edge(768)
    ///     .png_compression(PngCompression::Fast)
    ///     .build()
    ///     .unwrap();
    /// assert_eq!(config.inference_max_edge, 768);
    /// ```
    #[must_use]
    pub fn builder() -> PipelineConfigBuilder {
        PipelineConfigBuilder::default()
    }

    /// Defaults overlaid with `CONVERTALL_MAX_EDGE`, `CONVERTALL_SIZE_BUDGET`
    /// and `CONVERTALL_PNG_COMPRESSION` when set
    ///
    /// # Errors
    /// - Environment values that do not parse
    /// - Resulting configuration failing [`PipelineConfig::validate`]
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup<F: Fn(&str) -> Option<String>>(lookup: F) -> Result<Self> {
        let mut config = Self::default();

        if let Some(value) = lookup("CONVERTALL_MAX_EDGE") {
            config.inference_max_edge = value.trim().parse().map_err(|_| {
                ConvertError::config_value_error("CONVERTALL_MAX_EDGE", value.as_str(), "1-16384", None)
            })?;
        }
        if let Some(value) = lookup("CONVERTALL_SIZE_BUDGET") {
            config.size_budget_bytes = value.trim().parse().map_err(|_| {
                ConvertError::config_value_error(
                    "CONVERTALL_SIZE_BUDGET",
                    value.as_str(),
                    "positive byte count",
                    None,
                )
            })?;
        }
        if let Some(value) = lookup("CONVERTALL_PNG_COMPRESSION") {
            config.png_compression = value.parse()?;
        }

        config.validate()?;
        Ok(config)
    }

    /// Validate all configuration parameters
    ///
    /// # Errors
    /// - Zero inference edge or size budget
    /// - Empty ladder, qualities outside 1-100, or a ladder that is not strictly descending
    /// - Shrink factor outside (0, 1) or more than 20 shrink rounds
    pub fn validate(&self) -> Result<()> {
        if self.inference_max_edge == 0 || self.inference_max_edge > 16384 {
            return Err(ConvertError::config_value_error(
                "inference max edge",
                self.inference_max_edge,
                "1-16384",
                Some(DEFAULT_INFERENCE_MAX_EDGE),
            ));
        }

        if self.size_budget_bytes == 0 {
            return Err(ConvertError::config_value_error(
                "size budget",
                self.size_budget_bytes,
                "> 0 bytes",
                Some(DEFAULT_SIZE_BUDGET_BYTES),
            ));
        }

        if self.quality_ladder.is_empty() {
            return Err(ConvertError::invalid_config(
                "Quality ladder must contain at least one step",
            ));
        }

        for quality in self.quality_ladder.iter().chain(std::iter::once(&self.shrink_quality)) {
            if !(1..=100).contains(quality) {
                return Err(ConvertError::config_value_error("JPEG quality", *quality, "1-100", None));
            }
        }

        if self.quality_ladder.windows(2).any(|w| matches!(w, [a, b] if b >= a)) {
            return Err(ConvertError::invalid_config(format!(
                "Quality ladder must be strictly descending, got {:?}",
                self.quality_ladder
            )));
        }

        if !(self.shrink_factor > 0.0 && self.shrink_factor < 1.0) {
            return Err(ConvertError::config_value_error(
                "shrink factor",
                self.shrink_factor,
                "(0.0, 1.0)",
                Some(DEFAULT_SHRINK_FACTOR),
            ));
        }

        if self.shrink_rounds > 20 {
            return Err(ConvertError::config_value_error(
                "shrink rounds",
                self.shrink_rounds,
                "0-20",
                Some(DEFAULT_SHRINK_ROUNDS),
            ));
        }

        Ok(())
    }
}

/// Builder for `PipelineConfig`
#[derive(Debug, Default)]
pub struct PipelineConfigBuilder {
    config: PipelineConfig,
}

impl PipelineConfigBuilder {
    #[must_use]
    pub fn inference_max_edge(mut self, edge: u32) -> Self {
        self.config.inference_max_edge = edge;
        self
    }

    #[must_use]
    pub fn size_budget_bytes(mut self, bytes: usize) -> Self {
        self.config.size_budget_bytes = bytes;
        self
    }

    #[must_use]
    pub fn quality_ladder<I: IntoIterator<Item = u8>>(mut self, ladder: I) -> Self {
        self.config.quality_ladder = ladder.into_iter().map(|q| q.min(100)).collect();
        self
    }

    #[must_use]
    pub fn shrink_factor(mut self, factor: f32) -> Self {
        self.config.shrink_factor = factor;
        self
    }

    #[must_use]
    pub fn shrink_rounds(mut self, rounds: u32) -> Self {
        self.config.shrink_rounds = rounds;
        self
    }

    #[must_use]
    pub fn shrink_quality(mut self, quality: u8) -> Self {
        self.config.shrink_quality = quality.min(100);
        self
    }

    #[must_use]
    pub fn png_compression(mut self, compression: PngCompression) -> Self {
        self.config.png_compression = compression;
        self
    }

    /// Build and validate the configuration
    ///
    /// # Errors
    /// Any failure reported by [`PipelineConfig::validate`]
    pub fn build(self) -> Result<PipelineConfig> {
        self.config.validate()?;
        Ok(self.config)
    }
}

/// Which model to load and how to run it
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelConfig {
    pub source: ModelSource,
    pub backend: BackendType,
    pub execution_provider: ExecutionProvider,
    /// Number of intra-op threads for inference (0 = auto)
    pub intra_threads: usize,
    /// Number of inter-op threads for inference (0 = auto)
    pub inter_threads: usize,
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            source: ModelSource::default(),
            backend: BackendType::default(),
            execution_provider: ExecutionProvider::default(),
            intra_threads: 0,
            inter_threads: 0,
        }
    }
}

impl ModelConfig {
    #[must_use]
    pub fn with_source(mut self, source: ModelSource) -> Self {
        self.source = source;
        self
    }

    #[must_use]
    pub fn with_backend(mut self, backend: BackendType) -> Self {
        self.backend = backend;
        self
    }

    #[must_use]
    pub fn with_execution_provider(mut self, provider: ExecutionProvider) -> Self {
        self.execution_provider = provider;
        self
    }

    /// Set both intra and inter threads (0 = auto-detect)
    #[must_use]
    pub fn with_threads(mut self, threads: usize) -> Self {
        self.intra_threads = threads;
        self.inter_threads = if threads > 0 { (threads / 2).max(1) } else { 0 };
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn test_default_config() {
        let config = PipelineConfig::default();
        assert_eq!(config.inference_max_edge, 1024);
        assert_eq!(config.size_budget_bytes, 2 * 1024 * 1024);
        assert_eq!(config.quality_ladder, vec![95, 85, 75, 60, 45]);
        assert_eq!(config.png_compression, PngCompression::Best);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_config_builder() {
        let config = PipelineConfig::builder()
            .inference_max_edge(512)
            .size_budget_bytes(1000)
            .quality_ladder([90, 70, 50])
            .shrink_factor(0.5)
            .shrink_rounds(3)
            .shrink_quality(30)
            .build()
            .unwrap();

        assert_eq!(config.inference_max_edge, 512);
        assert_eq!(config.size_budget_bytes, 1000);
        assert_eq!(config.quality_ladder, vec![90, 70, 50]);
        assert_eq!(config.shrink_rounds, 3);
        assert_eq!(config.shrink_quality, 30);
    }

    #[test]
    fn test_config_validation() {
        assert!(PipelineConfig::builder().inference_max_edge(0).build().is_err());
        assert!(PipelineConfig::builder().size_budget_bytes(0).build().is_err());
        assert!(PipelineConfig::builder().quality_ladder([]).build().is_err());
        assert!(PipelineConfig::builder().quality_ladder([50, 60]).build().is_err());
        assert!(PipelineConfig::builder().quality_ladder([80, 0]).build().is_err());
        assert!(PipelineConfig::builder().shrink_factor(1.0).build().is_err());
        assert!(PipelineConfig::builder().shrink_factor(0.0).build().is_err());
        assert!(PipelineConfig::builder().shrink_factor(f32::NAN).build().is_err());
        assert!(PipelineConfig::builder().shrink_rounds(21).build().is_err());
        assert!(PipelineConfig::builder().shrink_quality(0).build().is_err());

        let err = PipelineConfig::builder().shrink_factor(1.5).build().unwrap_err();
        assert!(err.to_string().contains("shrink factor"));
        assert!(err.to_string().contains("(0.0, 1.0)"));
    }

    #[test]
    fn test_png_compression_parsing() {
        assert_eq!("fast".parse::<PngCompression>().unwrap(), PngCompression::Fast);
        assert_eq!("BEST".parse::<PngCompression>().unwrap(), PngCompression::Best);
        assert_eq!("9".parse::<PngCompression>().unwrap(), PngCompression::Best);
        assert_eq!("5".parse::<PngCompression>().unwrap(), PngCompression::Default);
        assert_eq!("1".parse::<PngCompression>().unwrap(), PngCompression::Fast);
        assert!("10".parse::<PngCompression>().is_err());
        assert!("ultra".parse::<PngCompression>().is_err());
    }

    #[test]
    fn test_from_lookup_overlays_environment() {
        let env: HashMap<&str, &str> = [
            ("CONVERTALL_MAX_EDGE", "640"),
            ("CONVERTALL_SIZE_BUDGET", "4096"),
            ("CONVERTALL_PNG_COMPRESSION", "fast"),
        ]
        .into_iter()
        .collect();

        let config =
            PipelineConfig::from_lookup(|key| env.get(key).map(ToString::to_string)).unwrap();
        assert_eq!(config.inference_max_edge, 640);
        assert_eq!(config.size_budget_bytes, 4096);
        assert_eq!(config.png_compression, PngCompression::Fast);
        assert_eq!(config.quality_ladder, DEFAULT_QUALITY_LADDER.to_vec());
    }

    #[test]
    fn test_from_lookup_rejects_bad_values() {
        assert!(PipelineConfig::from_lookup(|key| {
            (key == "CONVERTALL_MAX_EDGE").then(|| "huge".to_string())
        })
        .is_err());
        assert!(PipelineConfig::from_lookup(|key| {
            (key == "CONVERTALL_SIZE_BUDGET").then(|| "0".to_string())
        })
        .is_err());
    }

    #[test]
    fn test_execution_provider_parsing() {
        assert_eq!("auto".parse::<ExecutionProvider>().unwrap(), ExecutionProvider::Auto);
        assert_eq!("CoreML".parse::<ExecutionProvider>().unwrap(), ExecutionProvider::CoreMl);
        assert!("tpu".parse::<ExecutionProvider>().is_err());
        assert_eq!(ExecutionProvider::Cuda.to_string(), "cuda");
    }

    #[test]
    fn test_model_config_threads() {
        let config = ModelConfig::default().with_threads(8);
        assert_eq!(config.intra_threads, 8);
        assert_eq!(config.inter_threads, 4);

        let config = ModelConfig::default().with_threads(0);
        assert_eq!(config.inter_threads, 0);
    }

    #[test]
    fn test_config_serde_roundtrip() {
        let config = PipelineConfig::default();
        let json = serde_json::to_string(&config).unwrap();
        assert!(json.contains("\"png_compression\":\"best\""));
        let back: PipelineConfig = serde_json::from_str(&json).unwrap();
        assert_eq!(back, config);
    }
}
