use std::io::Cursor;

use image::imageops::{self, FilterType};
use image::{DynamicImage, ImageFormat};

use crate::error::NormalizeError;

/// Largest square edge the normalizer will produce.
pub const MAX_IMAGE_SIZE: u32 = 4096;

/// Decode `bytes`, crop the largest centred square, resize it to
/// `size × size` and re-encode as an RGB PNG.
pub fn normalize(bytes: &[u8], size: u32) -> Result<Vec<u8>, NormalizeError> {
    if size == 0 || size > MAX_IMAGE_SIZE {
        return Err(NormalizeError::InvalidSize {
            size,
            max: MAX_IMAGE_SIZE,
        });
    }

    let decoded = image::load_from_memory(bytes).map_err(NormalizeError::InvalidImage)?;
    let rgb = decoded.to_rgb8();
    let (left, top, side) = center_square(rgb.width(), rgb.height());
    if side == 0 {
        return Err(NormalizeError::EmptyImage);
    }

    let cropped = imageops::crop_imm(&rgb, left, top, side, side).to_image();
    let resized = imageops::resize(&cropped, size, size, FilterType::CatmullRom);

    let mut out = Vec::new();
    DynamicImage::ImageRgb8(resized)
        .write_to(&mut Cursor::new(&mut out), ImageFormat::Png)
        .map_err(NormalizeError::Encode)?;
    Ok(out)
}

/// Offsets and edge of the largest square centred in a `width × height` frame.
pub fn center_square(width: u32, height: u32) -> (u32, u32, u32) {
    let side = width.min(height);
    ((width - side) / 2, (height - side) / 2, side)
}
