//! Image normalization to opaque RGB

use image::{DynamicImage, Rgb, RgbImage, RgbaImage};

/// Canonicalize any decoded image into an opaque 3-channel raster of the
/// same dimensions.
///
/// Images carrying alpha are flattened onto white using their own alpha as
/// blend weight. An `Rgb8` input is moved through without touching its
/// pixel buffer.
#[must_use]
pub fn normalize_to_rgb(image: DynamicImage) -> RgbImage {
    match image {
        DynamicImage::ImageRgb8(rgb) => rgb,
        other if other.color().has_alpha() => {
            let rgba = other.into_rgba8();
            flatten_onto(&rgba, Rgb([255, 255, 255]))
        },
        other => other.into_rgb8(),
    }
}

/// Alpha-blend an RGBA raster onto a solid color
#[must_use]
pub fn flatten_onto(rgba: &RgbaImage, background: Rgb<u8>) -> RgbImage {
    let (width, height) = rgba.dimensions();
    let mut out = RgbImage::new(width, height);

    for (dst, src) in out.pixels_mut().zip(rgba.pixels()) {
        let alpha = u16::from(src.0[3]);
        for ((d, s), bg) in dst.0.iter_mut().zip(src.0.iter()).zip(background.0.iter()) {
            *d = blend(*s, *bg, alpha);
        }
    }

    out
}

/// `fg * a + bg * (1 - a)` on 8-bit values, rounded to nearest
#[inline]
pub(crate) fn blend(fg: u8, bg: u8, alpha: u16) -> u8 {
    let value = u16::from(fg) * alpha + u16::from(bg) * (255 - alpha) + 127;
    (value / 255) as u8
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{GrayImage, Luma, LumaA, Rgba};

    #[test]
    fn test_rgb_passthrough_keeps_buffer() {
        let rgb = RgbImage::from_fn(7, 5, |x, y| Rgb([x as u8, y as u8, 42]));
        let ptr = rgb.as_raw().as_ptr();
        let expected = rgb.clone();

        let normalized = normalize_to_rgb(DynamicImage::ImageRgb8(rgb));
        assert_eq!(normalized, expected);
        assert_eq!(normalized.as_raw().as_ptr(), ptr);
    }

    #[test]
    fn test_transparent_pixels_become_white() {
        let mut rgba = RgbaImage::from_pixel(4, 4, Rgba([10, 20, 30, 255]));
        rgba.put_pixel(0, 0, Rgba([0, 0, 0, 0]));
        rgba.put_pixel(1, 0, Rgba([0, 0, 0, 128]));

        let rgb = normalize_to_rgb(DynamicImage::ImageRgba8(rgba));
        assert_eq!(rgb.dimensions(), (4, 4));
        assert_eq!(rgb.get_pixel(0, 0), &Rgb([255, 255, 255]));
        assert_eq!(rgb.get_pixel(1, 0), &Rgb([127, 127, 127]));
        assert_eq!(rgb.get_pixel(3, 3), &Rgb([10, 20, 30]));
    }

    #[test]
    fn test_grayscale_converted_directly() {
        let gray = GrayImage::from_pixel(3, 2, Luma([90]));
        let rgb = normalize_to_rgb(DynamicImage::ImageLuma8(gray));
        assert_eq!(rgb.dimensions(), (3, 2));
        assert!(rgb.pixels().all(|p| p.0 == [90, 90, 90]));
    }

    #[test]
    fn test_gray_alpha_flattened() {
        let img = image::GrayAlphaImage::from_pixel(2, 2, LumaA([0, 0]));
        let rgb = normalize_to_rgb(DynamicImage::ImageLumaA8(img));
        assert!(rgb.pixels().all(|p| p.0 == [255, 255, 255]));
    }

    #[test]
    fn test_indexed_png_with_transparency_flattened() {
        // Palette: transparent black, opaque blue; tRNS covers the first entry
        let mut encoded = Vec::new();
        {
            let mut encoder = png::Encoder::new(&mut encoded, 2, 2);
            encoder.set_color(png::ColorType::Indexed);
            encoder.set_depth(png::BitDepth::Eight);
            encoder.set_palette(vec![0, 0, 0, 10, 20, 200]);
            encoder.set_trns(vec![0]);
            let mut writer = encoder.write_header().unwrap();
            writer.write_image_data(&[0, 0, 0, 1]).unwrap();
        }

        let decoded = image::load_from_memory(&encoded).unwrap();
        assert!(decoded.color().has_alpha());

        let rgb = normalize_to_rgb(decoded);
        assert_eq!(rgb.dimensions(), (2, 2));
        assert_eq!(rgb.get_pixel(0, 0), &Rgb([255, 255, 255]));
        assert_eq!(rgb.get_pixel(1, 0), &Rgb([255, 255, 255]));
        assert_eq!(rgb.get_pixel(1, 1), &Rgb([10, 20, 200]));
    }

    #[test]
    fn test_blend_extremes() {
        assert_eq!(blend(200, 10, 255), 200);
        assert_eq!(blend(200, 10, 0), 10);
        for fg in [0u8, 1, 128, 254, 255] {
            for bg in [0u8, 77, 255] {
                assert_eq!(blend(fg, bg, 255), fg);
                assert_eq!(blend(fg, bg, 0), bg);
            }
        }
    }
}
