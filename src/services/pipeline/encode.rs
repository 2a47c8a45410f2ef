use image::codecs::jpeg::JpegEncoder;
use image::codecs::png::{CompressionType, FilterType as PngFilter, PngEncoder};
use image::codecs::webp::WebPEncoder;
use image::DynamicImage;

use super::TransformError;
use crate::models::request::{OutputFormat, DEFAULT_QUALITY};

/// Clamp a requested quality into [1, 100]; absent or zero means the default.
pub fn resolve_quality(requested: Option<u8>) -> u8 {
    match requested {
        None | Some(0) => DEFAULT_QUALITY,
        Some(quality) => quality.min(100),
    }
}

/// Encode `image` as `format`.
///
/// `quality` only affects JPEG. PNG and WebP are lossless; `compress`
/// selects the slowest, smallest PNG compression level.
pub fn encode(
    image: &DynamicImage,
    format: OutputFormat,
    quality: u8,
    compress: bool,
) -> Result<Vec<u8>, TransformError> {
    let mut buffer = Vec::new();

    let result = match format {
        OutputFormat::Jpeg => {
            // JPEG has no alpha channel.
            let rgb = DynamicImage::ImageRgb8(image.to_rgb8());
            rgb.write_with_encoder(JpegEncoder::new_with_quality(&mut buffer, quality.clamp(1, 100)))
        }
        OutputFormat::Png => {
            let compression = if compress {
                CompressionType::Best
            } else {
                CompressionType::Default
            };
            image.write_with_encoder(PngEncoder::new_with_quality(
                &mut buffer,
                compression,
                PngFilter::Adaptive,
            ))
        }
        OutputFormat::Webp => {
            let rgba = DynamicImage::ImageRgba8(image.to_rgba8());
            rgba.write_with_encoder(WebPEncoder::new_lossless(&mut buffer))
        }
    };

    result.map_err(|e| TransformError::Encode(format!("{format}: {e}")))?;
    Ok(buffer)
}
