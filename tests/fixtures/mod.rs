//! Image fixtures generated in memory.
#![allow(dead_code)]

use image::codecs::jpeg::JpegEncoder;
use image::{DynamicImage, ImageFormat, Rgb, RgbImage};
use std::io::Cursor;

fn gradient(width: u32, height: u32) -> DynamicImage {
    DynamicImage::ImageRgb8(RgbImage::from_fn(width, height, |x, y| {
        Rgb([(x * 7 % 256) as u8, (y * 5 % 256) as u8, ((x ^ y) % 256) as u8])
    }))
}

pub fn png_bytes(width: u32, height: u32) -> Vec<u8> {
    let mut out = Cursor::new(Vec::new());
    gradient(width, height)
        .write_to(&mut out, ImageFormat::Png)
        .expect("encode png fixture");
    out.into_inner()
}

pub fn jpeg_bytes(width: u32, height: u32) -> Vec<u8> {
    let mut out = Vec::new();
    gradient(width, height)
        .write_with_encoder(JpegEncoder::new_with_quality(&mut out, 90))
        .expect("encode jpeg fixture");
    out
}

/// A valid PNG signature followed by garbage: passes format sniffing and
/// fails decoding.
pub fn corrupt_png() -> Vec<u8> {
    let mut bytes = png_bytes(16, 16);
    bytes.truncate(33);
    bytes.extend_from_slice(&[0xde, 0xad, 0xbe, 0xef].repeat(8));
    bytes
}
