use font8x8::{UnicodeFonts, BASIC_FONTS};
use image::{DynamicImage, Pixel, Rgba, RgbaImage};

use crate::models::request::{WatermarkPosition, WatermarkSpec};

/// Distance between the text box and the image edge.
const PADDING: u32 = 10;
const GLYPH_SIZE: u32 = 8;
const TEXT_RGB: [u8; 3] = [200, 200, 200];

/// Opacity actually used for rendering. NaN renders nothing.
pub fn clamp_opacity(opacity: f64) -> f64 {
    if opacity.is_nan() {
        0.0
    } else {
        opacity.clamp(0.0, 1.0)
    }
}

/// Alpha byte the text is blended with.
pub fn alpha(opacity: f64) -> u8 {
    (clamp_opacity(opacity) * 255.0).round() as u8
}

/// Glyphs are scaled up on larger images so the mark stays legible.
fn glyph_scale(width: u32, height: u32) -> u32 {
    (width.min(height) / 200).clamp(1, 8)
}

/// Top-left corner of a `text_width` x `text_height` box at `position`.
pub fn anchor(
    position: WatermarkPosition,
    width: u32,
    height: u32,
    text_width: u32,
    text_height: u32,
) -> (u32, u32) {
    let right = width.saturating_sub(text_width.saturating_add(PADDING));
    let bottom = height.saturating_sub(text_height.saturating_add(PADDING));
    match position {
        WatermarkPosition::TopLeft => (PADDING, PADDING),
        WatermarkPosition::TopRight => (right, PADDING),
        WatermarkPosition::BottomLeft => (PADDING, bottom),
        WatermarkPosition::BottomRight => (right, bottom),
        WatermarkPosition::Center => (
            width.saturating_sub(text_width) / 2,
            height.saturating_sub(text_height) / 2,
        ),
    }
}

/// Render the watermark text onto the image. Empty text is a no-op, as is
/// an image-only watermark.
pub fn apply(image: DynamicImage, spec: &WatermarkSpec) -> DynamicImage {
    if spec.text.is_empty() {
        if spec.image_url.is_some() {
            tracing::debug!("image watermarks are not rendered");
        }
        return image;
    }

    let mut canvas: RgbaImage = image.into_rgba8();
    draw_text(&mut canvas, &spec.text, spec.position, alpha(spec.opacity));
    DynamicImage::ImageRgba8(canvas)
}

fn draw_text(canvas: &mut RgbaImage, text: &str, position: WatermarkPosition, alpha: u8) {
    if alpha == 0 {
        return;
    }

    let (width, height) = canvas.dimensions();
    let scale = glyph_scale(width, height);
    let cell = GLYPH_SIZE * scale;

    let glyphs: Vec<[u8; 8]> = text
        .chars()
        .map(|c| BASIC_FONTS.get(c).or_else(|| BASIC_FONTS.get('?')).unwrap_or([0; 8]))
        .collect();
    let text_width = cell.saturating_mul(glyphs.len() as u32);
    let (origin_x, origin_y) = anchor(position, width, height, text_width, cell);
    let color = Rgba([TEXT_RGB[0], TEXT_RGB[1], TEXT_RGB[2], alpha]);

    for (index, glyph) in glyphs.iter().enumerate() {
        let glyph_x = origin_x.saturating_add(cell.saturating_mul(index as u32));
        if glyph_x >= width {
            break;
        }
        for (row, bits) in glyph.iter().enumerate() {
            for col in 0..GLYPH_SIZE {
                // font8x8 stores the leftmost pixel in the lowest bit.
                if bits & (1 << col) == 0 {
                    continue;
                }
                let x0 = glyph_x + col * scale;
                let y0 = origin_y + row as u32 * scale;
                for dy in 0..scale {
                    for dx in 0..scale {
                        let (x, y) = (x0 + dx, y0 + dy);
                        if x < width && y < height {
                            canvas.get_pixel_mut(x, y).blend(&color);
                        }
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::pipeline::tests::gradient;

    fn spec(text: &str, position: WatermarkPosition, opacity: f64) -> WatermarkSpec {
        WatermarkSpec {
            text: text.into(),
            image_url: None,
            position,
            opacity,
        }
    }

    #[test]
    fn opacity_is_clamped_to_unit_interval() {
        assert_eq!(clamp_opacity(1.5), 1.0);
        assert_eq!(clamp_opacity(-0.2), 0.0);
        assert_eq!(clamp_opacity(0.25), 0.25);
        assert_eq!(clamp_opacity(f64::NAN), 0.0);
    }

    #[test]
    fn opacity_above_one_renders_like_one() {
        let base = gradient(300, 200);
        let over = apply(base.clone(), &spec("SAMPLE", WatermarkPosition::Center, 1.5));
        let full = apply(base.clone(), &spec("SAMPLE", WatermarkPosition::Center, 1.0));
        assert_eq!(over.to_rgba8(), full.to_rgba8());
        assert_ne!(full.to_rgba8(), base.to_rgba8());
    }

    #[test]
    fn negative_opacity_renders_nothing() {
        let base = gradient(300, 200);
        let marked = apply(base.clone(), &spec("SAMPLE", WatermarkPosition::TopLeft, -0.2));
        assert_eq!(marked.to_rgba8(), base.to_rgba8());
    }

    #[test]
    fn empty_text_leaves_image_untouched() {
        let base = gradient(50, 50);
        let marked = apply(base.clone(), &spec("", WatermarkPosition::Center, 1.0));
        assert_eq!(marked, base);
    }

    #[test]
    fn anchors_keep_text_inside_the_image() {
        assert_eq!(anchor(WatermarkPosition::TopLeft, 400, 300, 80, 16), (10, 10));
        assert_eq!(anchor(WatermarkPosition::TopRight, 400, 300, 80, 16), (310, 10));
        assert_eq!(anchor(WatermarkPosition::BottomLeft, 400, 300, 80, 16), (10, 274));
        assert_eq!(anchor(WatermarkPosition::BottomRight, 400, 300, 80, 16), (310, 274));
        assert_eq!(anchor(WatermarkPosition::Center, 400, 300, 80, 16), (160, 142));
        assert_eq!(anchor(WatermarkPosition::BottomRight, 20, 20, 80, 16), (0, 0));
    }

    #[test]
    fn text_lands_in_the_requested_corner() {
        let base = DynamicImage::ImageRgba8(RgbaImage::from_pixel(400, 400, Rgba([0, 0, 0, 255])));
        let marked = apply(base, &spec("MMMM", WatermarkPosition::TopLeft, 1.0)).to_rgba8();

        let lit = |x0: u32, y0: u32, x1: u32, y1: u32| {
            (y0..y1).any(|y| (x0..x1).any(|x| marked.get_pixel(x, y)[0] > 0))
        };
        assert!(lit(0, 0, 200, 200));
        assert!(!lit(200, 200, 400, 400));
    }
}
