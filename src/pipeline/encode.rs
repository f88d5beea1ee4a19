//! Image encoding: `DynamicImage` → base64 JPEG wrapped in `ImageData`.
//!
//! JPEG rather than PNG: a 2000 px scan of a bill is several megabytes as
//! PNG, over the provider's base64 image limit, while JPEG at quality 85
//! keeps printed digits sharp at a fraction of the size. JPEG has no alpha
//! channel, so RGBA / palette images are flattened to RGB first.

use crate::vlm::ImageData;
use base64::{engine::general_purpose::STANDARD, Engine as _};
use image::codecs::jpeg::JpegEncoder;
use image::DynamicImage;
use tracing::debug;

/// Encode a page image as a base64 JPEG ready for the VLM API.
pub fn encode_page(img: &DynamicImage, quality: u8) -> Result<ImageData, image::ImageError> {
    let rgb = img.to_rgb8();

    let mut buf = Vec::new();
    JpegEncoder::new_with_quality(&mut buf, quality.clamp(1, 100)).encode_image(&rgb)?;

    let b64 = STANDARD.encode(&buf);
    debug!("Encoded image → {} bytes base64", b64.len());

    Ok(ImageData::new(b64, "image/jpeg"))
}
