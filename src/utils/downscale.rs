//! Bounded-resolution copy for inference

use image::imageops::{self, FilterType};
use image::RgbImage;
use std::borrow::Cow;

/// Dimensions after scaling the longer edge down to `max_edge`.
///
/// Images already within the bound keep their size. The shorter edge is
/// rounded to nearest and never drops below one pixel.
#[must_use]
pub fn inference_dimensions(width: u32, height: u32, max_edge: u32) -> (u32, u32) {
    let long_edge = width.max(height);
    if long_edge <= max_edge || long_edge == 0 {
        return (width, height);
    }

    let scale = |edge: u32| -> u32 {
        let scaled = (u64::from(edge) * u64::from(max_edge) + u64::from(long_edge) / 2)
            / u64::from(long_edge);
        (scaled as u32).max(1)
    };

    if width >= height {
        (max_edge, scale(height))
    } else {
        (scale(width), max_edge)
    }
}

/// Copy of `image` whose longer edge equals `max_edge`, or the image itself
/// when it is already small enough
#[must_use]
pub fn downscale_for_inference(image: &RgbImage, max_edge: u32) -> Cow<'_, RgbImage> {
    let (width, height) = image.dimensions();
    let (target_width, target_height) = inference_dimensions(width, height, max_edge);

    if (target_width, target_height) == (width, height) {
        return Cow::Borrowed(image);
    }

    log::debug!("Downscaling {width}x{height} -> {target_width}x{target_height} for inference");
    Cow::Owned(imageops::resize(
        image,
        target_width,
        target_height,
        FilterType::Lanczos3,
    ))
}
