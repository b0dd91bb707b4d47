//! Shrinking of oversized images.

use crate::{FileValidationError, FileValidationResult};
use image::codecs::jpeg::JpegEncoder;
use image::imageops::FilterType;
use image::{DynamicImage, ImageReader};
use serde::{Deserialize, Serialize};
use std::fs;
use std::io::Write;
use std::path::Path;

pub const JPEG_QUALITY: u8 = 85;

/// Dimensions after normalization.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImageInfo {
    pub width: u32,
    pub height: u32,
    pub resized: bool,
}

/// If either side of the image at `path` exceeds `max`, resize it to fit a
/// `max` x `max` box keeping its aspect ratio and rewrite it as JPEG.
///
/// The format is detected from the content, not the extension.
pub(crate) fn shrink_to_fit(path: &Path, max: u32) -> FileValidationResult<ImageInfo> {
    let (width, height) = open_reader(path)?
        .into_dimensions()
        .map_err(image_error)?;

    if width <= max && height <= max {
        return Ok(ImageInfo {
            width,
            height,
            resized: false,
        });
    }

    let decoded = open_reader(path)?.decode().map_err(image_error)?;
    let resized = decoded.resize(max, max, FilterType::Lanczos3);
    let rgb = DynamicImage::ImageRgb8(resized.to_rgb8());

    let mut encoded = Vec::new();
    rgb.write_with_encoder(JpegEncoder::new_with_quality(&mut encoded, JPEG_QUALITY))
        .map_err(image_error)?;
    replace_contents(path, &encoded)?;

    Ok(ImageInfo {
        width: rgb.width(),
        height: rgb.height(),
        resized: true,
    })
}

fn open_reader(path: &Path) -> FileValidationResult<ImageReader<std::io::BufReader<fs::File>>> {
    Ok(ImageReader::open(path)?.with_guessed_format()?)
}

fn image_error(err: image::ImageError) -> FileValidationError {
    FileValidationError::Image(err.to_string())
}

/// Write to a sibling temp file, then rename over `path`.
fn replace_contents(path: &Path, bytes: &[u8]) -> FileValidationResult<()> {
    let dir = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    };
    let file_name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    let tmp_path = dir.join(format!(".{file_name}.resize.{}", std::process::id()));

    let result = (|| -> std::io::Result<()> {
        let mut file = fs::OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&tmp_path)?;
        file.write_all(bytes)?;
        file.sync_all()?;
        fs::rename(&tmp_path, path)
    })();

    if let Err(err) = result {
        let _ = fs::remove_file(&tmp_path);
        return Err(err.into());
    }
    Ok(())
}
