//! Mask application at full resolution

use crate::error::{ConvertError, Result};
use crate::types::{BackgroundColor, SegmentationMask};
use crate::utils::normalize::blend;
use image::{DynamicImage, Rgba, RgbImage, RgbaImage};

/// Apply a full-resolution mask to the original image.
///
/// Without a background color the result is RGBA with alpha taken from the
/// mask. With one, the image is blended over an opaque canvas of that color
/// and the result stays RGB. Consumes the image so the RGB buffer is reused
/// or released here.
///
/// # Errors
/// - Mask dimensions differ from the image
pub fn composite(
    image: RgbImage,
    mask: &SegmentationMask,
    background: Option<BackgroundColor>,
) -> Result<DynamicImage> {
    if image.dimensions() != mask.dimensions() {
        return Err(ConvertError::internal(format!(
            "Mask {}x{} does not match image {}x{}",
            mask.width(),
            mask.height(),
            image.width(),
            image.height()
        )));
    }

    Ok(match background {
        None => DynamicImage::ImageRgba8(apply_alpha(&image, mask)),
        Some(color) => DynamicImage::ImageRgb8(flatten_with_mask(image, mask, color)),
    })
}

fn apply_alpha(image: &RgbImage, mask: &SegmentationMask) -> RgbaImage {
    let (width, height) = image.dimensions();
    let mut out = RgbaImage::new(width, height);
    for ((dst, src), &alpha) in out
        .pixels_mut()
        .zip(image.pixels())
        .zip(mask.as_raw().iter())
    {
        let [r, g, b] = src.0;
        *dst = Rgba([r, g, b, alpha]);
    }
    out
}

fn flatten_with_mask(
    mut image: RgbImage,
    mask: &SegmentationMask,
    color: BackgroundColor,
) -> RgbImage {
    let background = color.to_rgb();
    for (pixel, &alpha) in image.pixels_mut().zip(mask.as_raw().iter()) {
        let alpha = u16::from(alpha);
        for (channel, bg) in pixel.0.iter_mut().zip(background.0.iter()) {
            *channel = blend(*channel, *bg, alpha);
        }
    }
    image
}
