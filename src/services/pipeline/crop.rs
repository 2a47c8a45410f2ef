use image::DynamicImage;

use crate::models::request::CropSpec;

/// Effective crop box after clamping to the source bounds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CropRect {
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
}

/// Clamp a requested box into a `source_width` x `source_height` image.
///
/// The origin is pulled inside the image and the extent truncated to what
/// remains, with every side at least one pixel.
pub fn clamp_crop(spec: &CropSpec, source_width: u32, source_height: u32) -> CropRect {
    let x = spec.x.min(source_width.saturating_sub(1));
    let y = spec.y.min(source_height.saturating_sub(1));
    let width = spec.width.max(1).min(source_width.saturating_sub(x).max(1));
    let height = spec.height.max(1).min(source_height.saturating_sub(y).max(1));
    CropRect {
        x,
        y,
        width,
        height,
    }
}

pub fn apply(image: &DynamicImage, spec: &CropSpec) -> DynamicImage {
    if image.width() == 0 || image.height() == 0 {
        return image.clone();
    }
    let rect = clamp_crop(spec, image.width(), image.height());
    image.crop_imm(rect.x, rect.y, rect.width, rect.height)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn spec(x: u32, y: u32, width: u32, height: u32) -> CropSpec {
        CropSpec {
            x,
            y,
            width,
            height,
        }
    }

    #[test]
    fn box_larger_than_source_becomes_whole_source() {
        let rect = clamp_crop(&spec(0, 0, 3000, 3000), 1920, 1080);
        assert_eq!(
            rect,
            CropRect {
                x: 0,
                y: 0,
                width: 1920,
                height: 1080
            }
        );
    }

    #[test]
    fn box_overhanging_the_edge_is_truncated() {
        let rect = clamp_crop(&spec(1800, 1000, 500, 500), 1920, 1080);
        assert_eq!((rect.x, rect.y, rect.width, rect.height), (1800, 1000, 120, 80));
    }

    #[test]
    fn origin_outside_source_never_yields_an_empty_region() {
        let rect = clamp_crop(&spec(5000, 5000, 10, 10), 100, 50);
        assert_eq!((rect.x, rect.y), (99, 49));
        assert_eq!((rect.width, rect.height), (1, 1));

        let rect = clamp_crop(&spec(10, 10, 0, 0), 100, 50);
        assert_eq!((rect.width, rect.height), (1, 1));
    }

    #[test]
    fn box_inside_source_is_untouched() {
        let rect = clamp_crop(&spec(10, 20, 30, 40), 100, 100);
        assert_eq!((rect.x, rect.y, rect.width, rect.height), (10, 20, 30, 40));
    }
}
