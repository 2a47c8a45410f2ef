use garde::Validate;
use image::ImageFormat;
use serde::{Deserialize, Serialize};
use strum::{AsRefStr, Display, EnumString};

/// JPEG quality used when a request does not name one.
pub const DEFAULT_QUALITY: u8 = 85;

/// Upper bound for any requested output side, in pixels.
pub const MAX_DIMENSION: u32 = 10_000;

/// Upper bound for watermark text, in characters.
pub const MAX_WATERMARK_TEXT: usize = 256;

/// The full set of operations applied to one source image.
///
/// Immutable once attached to a job: the cache key is derived from it, so a
/// request must never change between submission and execution.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, Validate)]
pub struct AdvancedProcessingRequest {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    #[garde(dive)]
    pub resize: Option<ResizeSpec>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    #[garde(dive)]
    pub crop: Option<CropSpec>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    #[garde(dive)]
    pub watermark: Option<WatermarkSpec>,

    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    #[garde(skip)]
    pub compress: bool,
}

impl AdvancedProcessingRequest {
    /// Shorthand for a resize-only request, as produced by the simple resize endpoint.
    pub fn resize(width: u32, height: u32, quality: Option<u8>, format: Option<String>) -> Self {
        Self {
            resize: Some(ResizeSpec {
                width,
                height,
                quality,
                format,
            }),
            ..Default::default()
        }
    }

    /// Run the derived validation rules and flatten the report into one message.
    pub fn check(&self) -> Result<(), String> {
        self.validate().map_err(|report| report.to_string())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Validate)]
pub struct ResizeSpec {
    #[garde(range(min = 1, max = MAX_DIMENSION))]
    pub width: u32,

    #[garde(range(min = 1, max = MAX_DIMENSION))]
    pub height: u32,

    /// Lossy quality in [1, 100]; `None` or 0 selects [`DEFAULT_QUALITY`].
    #[serde(default, skip_serializing_if = "Option::is_none")]
    #[garde(range(min = 0, max = 100))]
    pub quality: Option<u8>,

    /// Requested output format name. Unknown names fall back to PNG.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    #[garde(skip)]
    pub format: Option<String>,
}

/// Crop box in source pixel coordinates. Boxes reaching past the source are
/// clamped by the pipeline rather than rejected.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Validate)]
pub struct CropSpec {
    #[serde(default)]
    #[garde(skip)]
    pub x: u32,

    #[serde(default)]
    #[garde(skip)]
    pub y: u32,

    #[garde(range(min = 1))]
    pub width: u32,

    #[garde(range(min = 1))]
    pub height: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Validate)]
pub struct WatermarkSpec {
    #[serde(default)]
    #[garde(length(max = MAX_WATERMARK_TEXT))]
    pub text: String,

    /// Image watermarks are accepted on the wire but not rendered.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    #[garde(skip)]
    pub image_url: Option<String>,

    #[serde(default)]
    #[garde(skip)]
    pub position: WatermarkPosition,

    /// Clamped to [0, 1] when rendered.
    #[serde(default = "default_opacity")]
    #[garde(skip)]
    pub opacity: f64,
}

fn default_opacity() -> f64 {
    0.5
}

/// Anchor point for watermark text.
///
/// Deserialization is lenient: any unrecognized name becomes
/// [`WatermarkPosition::BottomRight`].
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize, EnumString, Display, AsRefStr,
)]
#[serde(rename_all = "kebab-case", from = "String")]
#[strum(serialize_all = "kebab-case")]
pub enum WatermarkPosition {
    TopLeft,
    TopRight,
    BottomLeft,
    #[default]
    BottomRight,
    Center,
}

impl From<String> for WatermarkPosition {
    fn from(value: String) -> Self {
        value.trim().to_ascii_lowercase().parse().unwrap_or_default()
    }
}

/// Encodings the pipeline can produce.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Display, AsRefStr)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum OutputFormat {
    Jpeg,
    Png,
    Webp,
}

impl OutputFormat {
    /// Parse a user-supplied format name; `jpg` is accepted as an alias.
    pub fn parse(name: &str) -> Option<Self> {
        match name.trim().to_ascii_lowercase().as_str() {
            "jpeg" | "jpg" => Some(Self::Jpeg),
            "png" => Some(Self::Png),
            "webp" => Some(Self::Webp),
            _ => None,
        }
    }

    pub fn from_image_format(format: ImageFormat) -> Option<Self> {
        match format {
            ImageFormat::Jpeg => Some(Self::Jpeg),
            ImageFormat::Png => Some(Self::Png),
            ImageFormat::WebP => Some(Self::Webp),
            _ => None,
        }
    }

    /// Pick the output format: the requested one when present, otherwise the
    /// source's own. Anything unrecognized resolves to lossless PNG.
    pub fn resolve(requested: Option<&str>, source: ImageFormat) -> Self {
        match requested.map(str::trim).filter(|name| !name.is_empty()) {
            Some(name) => Self::parse(name).unwrap_or(Self::Png),
            None => Self::from_image_format(source).unwrap_or(Self::Png),
        }
    }

    pub fn extension(self) -> &'static str {
        match self {
            Self::Jpeg => "jpg",
            Self::Png => "png",
            Self::Webp => "webp",
        }
    }

    pub fn content_type(self) -> &'static str {
        match self {
            Self::Jpeg => "image/jpeg",
            Self::Png => "image/png",
            Self::Webp => "image/webp",
        }
    }

    pub fn is_lossy(self) -> bool {
        matches!(self, Self::Jpeg)
    }
}
