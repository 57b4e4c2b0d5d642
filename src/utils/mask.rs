//! Mask extraction from segmentation output and resampling

use crate::error::{ConvertError, Result};
use crate::types::SegmentationMask;
use image::imageops::{self, FilterType};

/// Decode the segmentation output and take its alpha channel as the mask
///
/// # Errors
/// - Bytes are not a decodable image
/// - Decoded image has no alpha channel
pub fn extract_alpha_mask(encoded: &[u8]) -> Result<SegmentationMask> {
    let decoded = image::load_from_memory(encoded).map_err(|e| {
        ConvertError::segmentation(format!("Unparsable segmentation output: {e}"))
    })?;

    if !decoded.color().has_alpha() {
        return Err(ConvertError::segmentation(format!(
            "Segmentation output has no alpha channel (color type {:?})",
            decoded.color()
        )));
    }

    Ok(SegmentationMask::from_alpha(&decoded.into_rgba8()))
}

/// Resample a mask to exactly `width` x `height` with a smoothing filter.
///
/// Masks already at the target size are returned as-is.
#[must_use]
pub fn upscale_mask(mask: SegmentationMask, width: u32, height: u32) -> SegmentationMask {
    if mask.dimensions() == (width, height) {
        return mask;
    }

    log::debug!(
        "Resampling mask {}x{} -> {width}x{height}",
        mask.width(),
        mask.height()
    );
    let resized = imageops::resize(mask.as_image(), width, height, FilterType::Lanczos3);
    SegmentationMask::from_image(resized)
}
