//! Ordered image transformation.
//!
//! Every request runs the same fixed sequence, skipping the steps whose
//! block is absent:
//!
//! | Step | Module | Failure |
//! |---|---|---|
//! | Decode | [`TransformationPipeline::decode`] | [`TransformError::Decode`] |
//! | Crop | [`crop`] | never (box is clamped to the source) |
//! | Resize | [`resize`] | [`TransformError::Validation`] above [`MAX_DIMENSION`] |
//! | Watermark | [`watermark`] | never |
//! | Encode | [`encode`] | [`TransformError::Encode`] |
//!
//! The pipeline holds no state. CPU cost dominates for large images, so async
//! callers run [`Transformer::process`] on the blocking pool.

pub mod crop;
pub mod encode;
pub mod resize;
pub mod watermark;

use image::{DynamicImage, ImageFormat};

use crate::models::request::{AdvancedProcessingRequest, OutputFormat, MAX_DIMENSION};

#[derive(Debug, thiserror::Error)]
pub enum TransformError {
    #[error("decode error: {0}")]
    Decode(String),

    #[error("validation error: {0}")]
    Validation(String),

    #[error("encode error: {0}")]
    Encode(String),
}

/// Encoded output of a full decode → transform → encode run.
#[derive(Debug, Clone)]
pub struct TransformOutput {
    pub bytes: Vec<u8>,
    pub format: OutputFormat,
    pub width: u32,
    pub height: u32,
    /// Quality actually applied; only set for lossy formats.
    pub quality: Option<u8>,
}

/// Capability to turn source bytes into transformed, encoded bytes.
///
/// Implementations must be safe to call from many worker threads at once.
pub trait Transformer: Send + Sync {
    fn process(
        &self,
        source: &[u8],
        request: &AdvancedProcessingRequest,
    ) -> Result<TransformOutput, TransformError>;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct TransformationPipeline;

impl TransformationPipeline {
    pub fn new() -> Self {
        Self
    }

    /// Sniff the container format and decode the first frame.
    pub fn decode(&self, source: &[u8]) -> Result<(DynamicImage, ImageFormat), TransformError> {
        let format = image::guess_format(source)
            .map_err(|e| TransformError::Decode(format!("unrecognized image data: {e}")))?;
        let image = image::load_from_memory_with_format(source, format)
            .map_err(|e| TransformError::Decode(e.to_string()))?;
        Ok((image, format))
    }

    /// Apply crop, resize and watermark in that order and resolve the output format.
    pub fn transform(
        &self,
        image: DynamicImage,
        source_format: ImageFormat,
        request: &AdvancedProcessingRequest,
    ) -> Result<(DynamicImage, OutputFormat), TransformError> {
        let mut image = image;

        if let Some(spec) = &request.crop {
            image = crop::apply(&image, spec);
        }

        if let Some(spec) = &request.resize {
            let (width, height) = resize::target_dimensions(spec);
            if width > MAX_DIMENSION || height > MAX_DIMENSION {
                return Err(TransformError::Validation(format!(
                    "resize target {width}x{height} exceeds {MAX_DIMENSION}px"
                )));
            }
            image = resize::apply(&image, spec);
        }

        if let Some(spec) = &request.watermark {
            image = watermark::apply(image, spec);
        }

        let requested = request.resize.as_ref().and_then(|r| r.format.as_deref());
        Ok((image, OutputFormat::resolve(requested, source_format)))
    }
}

impl Transformer for TransformationPipeline {
    fn process(
        &self,
        source: &[u8],
        request: &AdvancedProcessingRequest,
    ) -> Result<TransformOutput, TransformError> {
        let (image, source_format) = self.decode(source)?;
        let (image, format) = self.transform(image, source_format, request)?;

        let quality = encode::resolve_quality(request.resize.as_ref().and_then(|r| r.quality));
        let bytes = encode::encode(&image, format, quality, request.compress)?;

        Ok(TransformOutput {
            bytes,
            format,
            width: image.width(),
            height: image.height(),
            quality: format.is_lossy().then_some(quality),
        })
    }
}
