//! Pipeline stage primitives
//!
//! Each submodule implements one stage of the removal pipeline as plain
//! functions over `image` buffers. The processor sequences them.

pub mod compression;
pub mod downscale;
pub mod mask;
pub mod normalize;

pub use compression::{
    encode_jpeg, encode_png, prepare_inference_payload, CompressionAttempt, InferencePayload,
    PayloadFormat, SizeBudgetCompressor,
};
pub use downscale::{downscale_for_inference, inference_dimensions};
pub use mask::{extract_alpha_mask, upscale_mask};
pub use normalize::{flatten_onto, normalize_to_rgb};
