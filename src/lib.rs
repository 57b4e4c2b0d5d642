#![allow(clippy::too_many_lines)]
#![allow(clippy::missing_errors_doc)]
#![allow(clippy::missing_panics_doc)]
#![allow(clippy::uninlined_format_args)]

//! # ConvertAll background removal
//!
//! Resolution-decoupled background removal for the ConvertAll file-conversion
//! backend. The segmentation model only ever sees a bounded copy of the input
//! (long edge ≤ 1024, optionally re-encoded under a byte budget); its mask is
//! upscaled back and composited onto the untouched full-resolution original.
//!
//! ## Pipeline
//!
//! 1. **Normalize**: decode and flatten any transparency onto white, giving opaque RGB
//! 2. **Downscale**: Lanczos3 copy with the long edge bounded
//! 3. **Compress**: JPEG quality ladder, then shrink rounds, only when the
//!    inference copy is over the size budget
//! 4. **Segment**: encoded bytes in, PNG with the mask as alpha out
//! 5. **Upscale mask**: back to the original dimensions
//! 6. **Composite**: mask as alpha, or blended over a solid color
//! 7. **Save**: lossless PNG written atomically
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use convertall_bgremove::{
//!     BackgroundColor, BackgroundRemovalProcessor, ModelCache, ModelConfig, PipelineConfig,
//!     SharedSegmenter,
//! };
//!
//! # fn example() -> anyhow::Result<()> {
//! let segmenter = SharedSegmenter::from_model_config(ModelConfig::default(), ModelCache::new()?);
//! let processor = BackgroundRemovalProcessor::new(PipelineConfig::default(), segmenter)?;
//!
//! let outcome = processor.remove_background("photo.jpg", "photo_no_bg.png", None);
//! assert!(outcome.success);
//!
//! let red = BackgroundColor::new(255, 0, 0);
//! let outcome = processor.remove_background("photo.jpg", "photo_red.png", Some(red));
//! println!("{}", serde_json::to_string(&outcome)?);
//! # Ok(())
//! # }
//! ```
//!
//! ### Feature Flags
//!
//! - `onnx` (default): ONNX Runtime backend with CUDA/CoreML execution providers
//! - `tract` (default): Pure Rust backend
//! - `cli` (default): `convertall-bgremove` binary
//! - `webp-support` (default): WebP input decoding
//! - `tracing-json`, `tracing-files`: extra log sinks for the binary

pub mod backends;
pub mod cache;
#[cfg(feature = "cli")]
pub mod cli;
pub mod compositor;
pub mod config;
pub mod download;
pub mod error;
pub mod inference;
pub mod models;
pub mod processor;
pub mod segmentation;
pub mod services;
pub mod session;
#[cfg(feature = "cli")]
pub mod tracing_config;
pub mod types;
pub mod utils;

pub use backends::{available_backends, create_backend};
#[cfg(feature = "onnx")]
pub use backends::OnnxBackend;
#[cfg(feature = "tract")]
pub use backends::TractBackend;
pub use cache::{format_size, CachedModelInfo, ModelCache};
pub use compositor::composite;
pub use config::{
    BackendType, ExecutionProvider, ModelConfig, PipelineConfig, PipelineConfigBuilder,
    PngCompression,
};
pub use download::{validate_model_url, ModelDownloader};
pub use error::{ConvertError, Result};
pub use inference::InferenceBackend;
pub use models::{known_models, ModelManager, ModelSource, PreprocessingConfig};
pub use processor::BackgroundRemovalProcessor;
pub use segmentation::{ModelSegmenter, SegmentationModel};
pub use services::ImageIOService;
pub use session::SharedSegmenter;
pub use types::{
    BackgroundColor, MaskStatistics, PipelineState, ProcessingTimings, RemovalOutcome,
    RemovalSummary, SegmentationMask,
};
pub use utils::{InferencePayload, PayloadFormat, SizeBudgetCompressor};

#[cfg(feature = "cli")]
pub use tracing_config::{init_cli_tracing, TracingConfig, TracingFormat, TracingOutput};
