use std::io::Cursor;

use image::{ImageFormat, Rgb, RgbImage};
use sha2::{Digest, Sha256};
use skinswap_contracts::{AspectRatio, BackendError, ImageData, RequestPayload};

use crate::backend::ImageBackend;

/// Offline backend that paints a flat PNG in a colour derived from the request.
pub struct DryrunBackend;

impl DryrunBackend {
    fn dims(aspect_ratio: AspectRatio) -> (u32, u32) {
        match aspect_ratio {
            AspectRatio::Square => (64, 64),
            AspectRatio::Portrait => (48, 64),
            AspectRatio::Landscape => (64, 48),
            AspectRatio::Tall => (36, 64),
            AspectRatio::Wide => (64, 36),
        }
    }
}

impl ImageBackend for DryrunBackend {
    fn name(&self) -> &str {
        "dryrun"
    }

    fn submit(&self, payload: &RequestPayload) -> Result<ImageData, BackendError> {
        let (width, height) = Self::dims(payload.aspect_ratio);
        let (r, g, b) = color_from_payload(payload);
        let mut canvas = RgbImage::new(width, height);
        for pixel in canvas.pixels_mut() {
            *pixel = Rgb([r, g, b]);
        }
        let mut encoded = Cursor::new(Vec::new());
        canvas
            .write_to(&mut encoded, ImageFormat::Png)
            .map_err(|err| BackendError::service(format!("dryrun encode failed: {err}")))?;
        Ok(ImageData::new("image/png", encoded.into_inner()))
    }
}

fn color_from_payload(payload: &RequestPayload) -> (u8, u8, u8) {
    let mut hasher = Sha256::new();
    hasher.update(payload.instruction.as_bytes());
    hasher.update(payload.aspect_ratio.as_str().as_bytes());
    for image in payload.images() {
        hasher.update(&image.bytes);
    }
    let digest = hasher.finalize();
    (digest[0], digest[1], digest[2])
}

#[cfg(test)]
mod tests {
    use skinswap_contracts::{build_request, StudioMode};

    use super::*;

    #[test]
    fn dryrun_renders_png_matching_aspect() -> anyhow::Result<()> {
        let source = ImageData::new("image/png", vec![1, 2, 3]);
        let payload = build_request(
            StudioMode::Refine,
            &source,
            None,
            "",
            0.5,
            AspectRatio::Wide,
        )?;
        let image = DryrunBackend.submit(&payload)?;
        assert_eq!(image.mime_type, "image/png");
        let decoded = image::load_from_memory(&image.bytes)?;
        assert_eq!((decoded.width(), decoded.height()), (64, 36));
        Ok(())
    }

    #[test]
    fn dryrun_is_deterministic_per_payload() -> anyhow::Result<()> {
        let source = ImageData::new("image/png", vec![7]);
        let payload = build_request(
            StudioMode::Derive,
            &source,
            None,
            "glass",
            0.3,
            AspectRatio::Square,
        )?;
        assert_eq!(DryrunBackend.submit(&payload)?, DryrunBackend.submit(&payload)?);
        Ok(())
    }
}
