//! Image file input/output
//!
//! Loading tolerates wrong extensions by falling back to content sniffing,
//! and applies the EXIF orientation so camera photos come out upright.
//! Output is written to a temporary file next to the destination and renamed
//! into place, so a failed encode never exposes a partial file.

use crate::config::PngCompression;
use crate::error::{ConvertError, Result};
use image::codecs::png::{FilterType as PngFilterType, PngEncoder};
use image::{DynamicImage, ImageDecoder, ImageReader, ImageResult};
use std::fs;
use std::io::{BufRead, BufWriter, Cursor, Seek, Write};
use std::path::{Path, PathBuf};
use tempfile::NamedTempFile;

/// Extensions accepted as image input (case-insensitive)
pub const SUPPORTED_EXTENSIONS: &[&str] = &["jpg", "jpeg", "png", "webp", "bmp", "tiff", "heic"];

/// Suffix appended to the input stem for batch outputs
pub const OUTPUT_SUFFIX: &str = "_no_bg";

/// Service for image file operations
pub struct ImageIOService;

impl ImageIOService {
    /// Load an image from a file path
    ///
    /// # Errors
    /// - `Io` when the file is missing or unreadable
    /// - `Decode` when neither the extension nor the content identify a
    ///   decodable image
    pub fn load_image<P: AsRef<Path>>(path: P) -> Result<DynamicImage> {
        let path = path.as_ref();
        if !path.is_file() {
            return Err(ConvertError::file_io_error(
                "read image file",
                path,
                &std::io::Error::new(std::io::ErrorKind::NotFound, "file does not exist"),
            ));
        }

        let by_extension = ImageReader::open(path)
            .map_err(|e| ConvertError::file_io_error("open image file", path, &e))?;

        match decode_oriented(by_extension) {
            Ok(image) => Ok(image),
            Err(extension_err) => {
                log::debug!(
                    "Extension-based loading failed for {}: {extension_err}. Attempting content-based detection.",
                    path.display()
                );
                let data = fs::read(path)
                    .map_err(|e| ConvertError::file_io_error("read image data", path, &e))?;

                let by_content = ImageReader::new(Cursor::new(data.as_slice()))
                    .with_guessed_format()
                    .map_err(|e| ConvertError::file_io_error("read image data", path, &e))?;

                decode_oriented(by_content).map_err(|content_err| {
                    let extension = Self::extension(path).unwrap_or_else(|| "unknown".into());
                    if extension == "heic" {
                        return ConvertError::decode(format!(
                            "HEIC images are accepted but cannot be decoded by this build: {}",
                            path.display()
                        ));
                    }
                    ConvertError::decode(format!(
                        "Failed to load {} ({} bytes) by extension ({extension}: {extension_err}) or content ({content_err})",
                        path.display(),
                        data.len()
                    ))
                })
            },
        }
    }

    /// Decode an image from memory
    ///
    /// # Errors
    /// - `Decode` for unrecognized or corrupt data
    pub fn load_from_bytes(bytes: &[u8]) -> Result<DynamicImage> {
        let reader = ImageReader::new(Cursor::new(bytes))
            .with_guessed_format()
            .map_err(|e| ConvertError::decode(format!("Failed to read image bytes: {e}")))?;
        decode_oriented(reader)
            .map_err(|e| ConvertError::decode(format!("Failed to decode image from bytes: {e}")))
    }

    /// Check whether a path carries an accepted image extension
    pub fn is_supported_format<P: AsRef<Path>>(path: P) -> bool {
        Self::extension(path.as_ref())
            .is_some_and(|ext| SUPPORTED_EXTENSIONS.contains(&ext.as_str()))
    }

    /// Encode `image` as PNG and atomically place it at `path`.
    ///
    /// Parent directories are created. Returns the size of the written file.
    ///
    /// # Errors
    /// - `Encode` when the temp file cannot be created, encoding fails, or
    ///   the rename into place fails
    pub fn write_png_atomic<P: AsRef<Path>>(
        image: &DynamicImage,
        path: P,
        compression: PngCompression,
    ) -> Result<u64> {
        let path = path.as_ref();
        let parent = match path.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
            _ => PathBuf::from("."),
        };
        fs::create_dir_all(&parent).map_err(|e| {
            ConvertError::encode(format!(
                "Failed to create output directory {}: {e}",
                parent.display()
            ))
        })?;

        let temp = NamedTempFile::new_in(&parent).map_err(|e| {
            ConvertError::encode(format!("Failed to create temporary output in {}: {e}", parent.display()))
        })?;

        {
            let mut writer = BufWriter::new(temp.as_file());
            let encoder = PngEncoder::new_with_quality(
                &mut writer,
                compression.to_compression_type(),
                PngFilterType::Adaptive,
            );
            image
                .write_with_encoder(encoder)
                .map_err(|e| ConvertError::encode(format!("Failed to encode PNG: {e}")))?;
            writer
                .flush()
                .map_err(|e| ConvertError::encode(format!("Failed to flush PNG data: {e}")))?;
        }

        let file = temp.persist(path).map_err(|e| {
            ConvertError::encode(format!("Failed to move output into {}: {}", path.display(), e.error))
        })?;
        let size = file
            .metadata()
            .map_err(|e| ConvertError::encode(format!("Failed to stat {}: {e}", path.display())))?
            .len();

        log::debug!("Wrote {} ({size} bytes)", path.display());
        Ok(size)
    }

    /// Output path for a batch item: `<out_dir>/<stem>_no_bg.png`
    pub fn output_path_for<P: AsRef<Path>, Q: AsRef<Path>>(input: P, output_dir: Q) -> PathBuf {
        let stem = input
            .as_ref()
            .file_stem()
            .map_or_else(|| "image".into(), |s| s.to_string_lossy());
        output_dir
            .as_ref()
            .join(format!("{stem}{OUTPUT_SUFFIX}.png"))
    }

    fn extension(path: &Path) -> Option<String> {
        path.extension()
            .and_then(|ext| ext.to_str())
            .map(str::to_lowercase)
    }
}

/// Decode and rotate/flip according to the EXIF orientation tag, if any
fn decode_oriented<R: BufRead + Seek>(reader: ImageReader<R>) -> ImageResult<DynamicImage> {
    let mut decoder = reader.into_decoder()?;
    let orientation = decoder.orientation()?;
    let mut image = DynamicImage::from_decoder(decoder)?;
    image.apply_orientation(orientation);
    Ok(image)
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{Rgb, RgbImage, Rgba, RgbaImage};
    use tempfile::TempDir;

    #[test]
    fn test_supported_extensions() {
        for name in ["a.jpg", "a.JPEG", "a.png", "a.webp", "a.bmp", "a.tiff", "a.HEIC"] {
            assert!(ImageIOService::is_supported_format(name), "{name}");
        }
        for name in ["a.gif", "a.txt", "noext", "a.tif"] {
            assert!(!ImageIOService::is_supported_format(name), "{name}");
        }
    }

    #[test]
    fn test_output_path_for() {
        let path = ImageIOService::output_path_for("/in/photo.final.jpg", "/out");
        assert_eq!(path, PathBuf::from("/out/photo.final_no_bg.png"));
    }

    #[test]
    fn test_load_falls_back_to_content_detection() {
        let temp = TempDir::new().unwrap();
        let mislabeled = temp.path().join("actually_png.jpg");
        RgbImage::from_pixel(3, 2, Rgb([1, 2, 3]))
            .save_with_format(&mislabeled, image::ImageFormat::Png)
            .unwrap();

        let image = ImageIOService::load_image(&mislabeled).unwrap();
        assert_eq!((image.width(), image.height()), (3, 2));
    }

    /// JPEG whose APP1 segment carries EXIF orientation `orientation`
    fn jpeg_with_orientation(source: &RgbImage, orientation: u16) -> Vec<u8> {
        let mut jpeg = Vec::new();
        source
            .write_to(&mut Cursor::new(&mut jpeg), image::ImageFormat::Jpeg)
            .unwrap();

        let mut exif = b"Exif\0\0".to_vec();
        // Little-endian TIFF header, first IFD at offset 8
        exif.extend_from_slice(b"II\x2a\0\x08\0\0\0");
        exif.extend_from_slice(&1u16.to_le_bytes());
        // Orientation tag, SHORT, count 1, value padded to four bytes
        exif.extend_from_slice(&0x0112u16.to_le_bytes());
        exif.extend_from_slice(&3u16.to_le_bytes());
        exif.extend_from_slice(&1u32.to_le_bytes());
        exif.extend_from_slice(&orientation.to_le_bytes());
        exif.extend_from_slice(&[0, 0]);
        exif.extend_from_slice(&0u32.to_le_bytes());

        let mut app1 = vec![0xFF, 0xE1];
        app1.extend_from_slice(&((exif.len() + 2) as u16).to_be_bytes());
        app1.extend_from_slice(&exif);

        // Insert right after SOI
        let mut out = jpeg[..2].to_vec();
        out.extend_from_slice(&app1);
        out.extend_from_slice(&jpeg[2..]);
        out
    }

    #[test]
    fn test_load_applies_exif_orientation() {
        let temp = TempDir::new().unwrap();
        let source = RgbImage::from_fn(40, 20, |x, _| {
            if x < 20 {
                Rgb([250, 10, 10])
            } else {
                Rgb([10, 10, 250])
            }
        });

        let rotated = temp.path().join("phone.jpg");
        fs::write(&rotated, jpeg_with_orientation(&source, 6)).unwrap();
        let image = ImageIOService::load_image(&rotated).unwrap();
        assert_eq!((image.width(), image.height()), (20, 40));
        // Rotated 90 degrees clockwise: the left (red) half ends up on top
        let rgb = image.into_rgb8();
        assert!(rgb.get_pixel(10, 5).0[0] > 200);
        assert!(rgb.get_pixel(10, 35).0[2] > 200);

        let upright = temp.path().join("upright.jpg");
        fs::write(&upright, jpeg_with_orientation(&source, 1)).unwrap();
        let image = ImageIOService::load_image(&upright).unwrap();
        assert_eq!((image.width(), image.height()), (40, 20));

        let from_bytes =
            ImageIOService::load_from_bytes(&jpeg_with_orientation(&source, 6)).unwrap();
        assert_eq!((from_bytes.width(), from_bytes.height()), (20, 40));
    }

    #[test]
    fn test_load_errors() {
        let temp = TempDir::new().unwrap();

        let missing = ImageIOService::load_image(temp.path().join("missing.png")).unwrap_err();
        assert!(matches!(missing, ConvertError::Io(_)));

        let garbage = temp.path().join("garbage.png");
        fs::write(&garbage, b"definitely not an image").unwrap();
        let err = ImageIOService::load_image(&garbage).unwrap_err();
        assert!(matches!(err, ConvertError::Decode(_)));

        let heic = temp.path().join("photo.heic");
        fs::write(&heic, b"\0\0\0\x18ftypheic").unwrap();
        let err = ImageIOService::load_image(&heic).unwrap_err();
        assert!(matches!(err, ConvertError::Decode(ref msg) if msg.contains("HEIC")));
    }

    #[test]
    fn test_write_png_atomic() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("nested/out.png");
        let image = DynamicImage::ImageRgba8(RgbaImage::from_pixel(4, 4, Rgba([9, 8, 7, 128])));

        let size = ImageIOService::write_png_atomic(&image, &path, PngCompression::Best).unwrap();
        assert_eq!(size, fs::metadata(&path).unwrap().len());

        let reloaded = image::open(&path).unwrap().into_rgba8();
        assert_eq!(reloaded.get_pixel(0, 0), &Rgba([9, 8, 7, 128]));

        let leftovers: Vec<_> = fs::read_dir(path.parent().unwrap())
            .unwrap()
            .filter_map(std::result::Result::ok)
            .filter(|entry| entry.path() != path)
            .collect();
        assert!(leftovers.is_empty());
    }

    #[test]
    fn test_write_png_atomic_leaves_nothing_on_failure() {
        let temp = TempDir::new().unwrap();
        // Destination is an existing directory, so the rename fails
        let target = temp.path().join("taken");
        fs::create_dir(&target).unwrap();
        fs::write(target.join("keep"), b"x").unwrap();
        let image = DynamicImage::ImageRgb8(RgbImage::new(2, 2));

        let err = ImageIOService::write_png_atomic(&image, &target, PngCompression::Fast).unwrap_err();
        assert!(matches!(err, ConvertError::Encode(_)));

        let entries: Vec<_> = fs::read_dir(temp.path()).unwrap().collect();
        assert_eq!(entries.len(), 1);
    }
}
