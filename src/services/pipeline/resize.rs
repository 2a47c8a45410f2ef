use image::imageops::FilterType;
use image::DynamicImage;

use crate::models::request::ResizeSpec;

/// Requested output size with each side floored to one pixel.
pub fn target_dimensions(spec: &ResizeSpec) -> (u32, u32) {
    (spec.width.max(1), spec.height.max(1))
}

/// Resample to exactly the target size. Aspect ratio is not preserved.
pub fn apply(image: &DynamicImage, spec: &ResizeSpec) -> DynamicImage {
    let (width, height) = target_dimensions(spec);
    if (image.width(), image.height()) == (width, height) {
        return image.clone();
    }
    image.resize_exact(width, height, FilterType::Lanczos3)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::pipeline::tests::gradient;

    #[test]
    fn zero_sides_are_floored_to_one() {
        let spec = ResizeSpec {
            width: 0,
            height: 0,
            quality: None,
            format: None,
        };
        assert_eq!(target_dimensions(&spec), (1, 1));
        let resized = apply(&gradient(20, 20), &spec);
        assert_eq!((resized.width(), resized.height()), (1, 1));
    }

    #[test]
    fn upscale_and_downscale_are_exact() {
        let source = gradient(100, 60);
        for (width, height) in [(250, 10), (3, 400), (99, 61)] {
            let spec = ResizeSpec {
                width,
                height,
                quality: None,
                format: None,
            };
            let resized = apply(&source, &spec);
            assert_eq!((resized.width(), resized.height()), (width, height));
        }
    }
}
