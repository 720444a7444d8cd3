use std::io::Cursor;

use image::{DynamicImage, ImageFormat, Rgb, RgbImage};
use sha2::{Digest, Sha256};

use crate::error::GenerationError;

/// Image-to-image backend used by the pipeline.
///
/// Implementations block until the image is available.
pub trait ImageProvider: Send + Sync {
    fn name(&self) -> &str;
    fn generate(&self, image: &[u8], prompt: &str, size: u32) -> Result<Vec<u8>, GenerationError>;
}

/// Offline provider: returns a flat PNG whose colour is derived from the prompt.
#[derive(Debug, Clone, Copy, Default)]
pub struct DryrunProvider;

impl ImageProvider for DryrunProvider {
    fn name(&self) -> &str {
        "dryrun"
    }

    fn generate(&self, image: &[u8], prompt: &str, size: u32) -> Result<Vec<u8>, GenerationError> {
        tracing::debug!(input_bytes = image.len(), size, "dryrun generation");
        let (r, g, b) = color_from_prompt(prompt);
        let canvas = RgbImage::from_pixel(size, size, Rgb([r, g, b]));
        let mut out = Vec::new();
        DynamicImage::ImageRgb8(canvas)
            .write_to(&mut Cursor::new(&mut out), ImageFormat::Png)
            .map_err(|err| GenerationError::new(format!("dryrun encode failed: {err}")))?;
        Ok(out)
    }
}

fn color_from_prompt(prompt: &str) -> (u8, u8, u8) {
    let digest = Sha256::digest(prompt.as_bytes());
    (digest[0], digest[1], digest[2])
}
