//! Image thumbnails and header dimensions via the `image` crate.

use std::io::Cursor;
use std::path::{Path, PathBuf};

use image::imageops::FilterType;
use image::{ImageFormat, ImageReader};

#[derive(Debug, thiserror::Error)]
pub enum ThumbnailError {
    #[error("image decode/encode failed: {0}")]
    Image(#[from] image::ImageError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Where the thumbnail for `file_id` lives.
pub fn thumbnail_path(thumbnail_dir: &Path, file_id: &str) -> PathBuf {
    thumbnail_dir.join(format!("{file_id}.jpg"))
}

/// Read dimensions from the image header without decoding pixels.
pub fn image_dimensions(bytes: &[u8]) -> Option<(u32, u32)> {
    ImageReader::new(Cursor::new(bytes))
        .with_guessed_format()
        .ok()?
        .into_dimensions()
        .ok()
}

/// Decode `bytes`, scale down to `width` (never up) and write a JPEG to
/// `output`. Returns the source dimensions.
pub fn write_image_thumbnail(
    bytes: &[u8],
    output: &Path,
    width: u32,
) -> Result<(u32, u32), ThumbnailError> {
    let img = image::load_from_memory(bytes)?;
    let dims = (img.width(), img.height());

    let thumb = if img.width() > width {
        img.resize(width, u32::MAX, FilterType::Triangle)
    } else {
        img
    };

    if let Some(parent) = output.parent() {
        std::fs::create_dir_all(parent)?;
    }
    thumb.to_rgb8().save_with_format(output, ImageFormat::Jpeg)?;
    Ok(dims)
}
