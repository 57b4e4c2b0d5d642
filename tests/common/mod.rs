//! Shared fixtures: synthetic images and segmentation models that need no
//! real network weights

#![allow(dead_code)]

use convertall_bgremove::{ConvertError, Result, SegmentationModel};
use image::{DynamicImage, ImageFormat, Rgb, RgbImage, Rgba, RgbaImage};
use std::io::Cursor;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

/// What the model was handed on one call
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SeenPayload {
    pub format: ImageFormat,
    pub width: u32,
    pub height: u32,
    pub bytes: usize,
    /// Top-left pixel after decoding
    pub corner: Rgb<u8>,
}

/// Foreground = every pixel clearly darker than white. Records its inputs.
#[derive(Default)]
pub struct DarkSubjectModel {
    seen: Mutex<Vec<SeenPayload>>,
}

impl DarkSubjectModel {
    pub fn seen(&self) -> Vec<SeenPayload> {
        self.seen.lock().unwrap().clone()
    }
}

impl SegmentationModel for DarkSubjectModel {
    fn segment(&self, encoded: &[u8]) -> Result<Vec<u8>> {
        let format =
            image::guess_format(encoded).map_err(|e| ConvertError::segmentation(e.to_string()))?;
        let image = image::load_from_memory(encoded)
            .map_err(|e| ConvertError::segmentation(e.to_string()))?
            .into_rgb8();
        let (width, height) = image.dimensions();

        self.seen.lock().unwrap().push(SeenPayload {
            format,
            width,
            height,
            bytes: encoded.len(),
            corner: *image.get_pixel(0, 0),
        });

        let cutout = RgbaImage::from_fn(width, height, |x, y| {
            let Rgb([r, g, b]) = *image.get_pixel(x, y);
            let luma = (u16::from(r) + u16::from(g) + u16::from(b)) / 3;
            Rgba([r, g, b, if luma < 200 { 255 } else { 0 }])
        });
        Ok(encode_png(&DynamicImage::ImageRgba8(cutout)))
    }

    fn name(&self) -> &str {
        "dark-subject"
    }
}

/// Always answers with bytes that are not an image
pub struct GarbageModel;

impl SegmentationModel for GarbageModel {
    fn segment(&self, _encoded: &[u8]) -> Result<Vec<u8>> {
        Ok(vec![0x42; 16])
    }

    fn name(&self) -> &str {
        "garbage"
    }
}

pub fn encode_png(image: &DynamicImage) -> Vec<u8> {
    let mut buffer = Cursor::new(Vec::new());
    image.write_to(&mut buffer, ImageFormat::Png).unwrap();
    buffer.into_inner()
}

/// White canvas with a dark rectangle covering the middle third
pub fn subject_on_white(width: u32, height: u32) -> RgbImage {
    RgbImage::from_fn(width, height, |x, y| {
        let inside = x >= width / 3 && x < 2 * width / 3 && y >= height / 3 && y < 2 * height / 3;
        if inside {
            Rgb([20, 40, 160])
        } else {
            Rgb([255, 255, 255])
        }
    })
}

/// Busy pattern that compresses poorly, used to exceed size budgets
pub fn noisy(width: u32, height: u32) -> RgbImage {
    let mut state = 0x2545_f491_u32;
    RgbImage::from_fn(width, height, |_, _| {
        state ^= state << 13;
        state ^= state >> 17;
        state ^= state << 5;
        let [a, b, c, _] = state.to_le_bytes();
        Rgb([a, b, c])
    })
}

pub fn save(dir: &Path, name: &str, image: &DynamicImage) -> PathBuf {
    let path = dir.join(name);
    image.save(&path).unwrap();
    path
}
