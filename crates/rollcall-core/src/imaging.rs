//! Image decoding helpers shared by the detector and the matcher.

use image::{DynamicImage, GrayImage, ImageReader, Luma};
use std::io::Cursor;
use std::path::Path;

/// File extensions accepted for uploaded photos.
pub const ALLOWED_EXTENSIONS: [&str; 4] = ["png", "jpg", "jpeg", "gif"];

/// Decode an image file, guessing the format from its contents.
pub fn open(path: &Path) -> Result<DynamicImage, image::ImageError> {
    ImageReader::open(path)?.with_guessed_format()?.decode()
}

/// Decode an in-memory encoded image.
pub fn decode(bytes: &[u8]) -> Result<DynamicImage, image::ImageError> {
    ImageReader::new(Cursor::new(bytes))
        .with_guessed_format()?
        .decode()
}

/// Single-channel 8-bit view of any decoded image, with BT.601 luma weights
/// (`0.299 R + 0.587 G + 0.114 B`). Alpha is ignored.
pub fn to_gray(image: &DynamicImage) -> GrayImage {
    if let DynamicImage::ImageLuma8(gray) = image {
        return gray.clone();
    }
    let rgb = image.to_rgb8();
    GrayImage::from_fn(rgb.width(), rgb.height(), |x, y| {
        let [r, g, b] = rgb.get_pixel(x, y).0;
        let luma = (299 * r as u32 + 587 * g as u32 + 114 * b as u32 + 500) / 1000;
        Luma([luma as u8])
    })
}

/// Bilinear resize with pixel-center alignment and no antialiasing.
///
/// Source coordinates are clamped at the border, so upscaling repeats edge
/// pixels instead of fading them out.
pub fn resize_linear(src: &GrayImage, width: u32, height: u32) -> GrayImage {
    let (src_w, src_h) = src.dimensions();
    if src_w == 0 || src_h == 0 || width == 0 || height == 0 {
        return GrayImage::new(width, height);
    }

    let taps = |dst: u32, src_len: u32, dst_len: u32| -> (u32, u32, f32) {
        let pos = (dst as f32 + 0.5) * (src_len as f32 / dst_len as f32) - 0.5;
        let lo = pos.floor();
        if lo < 0.0 {
            return (0, 0, 0.0);
        }
        let lo_idx = lo as u32;
        if lo_idx >= src_len - 1 {
            return (src_len - 1, src_len - 1, 0.0);
        }
        (lo_idx, lo_idx + 1, pos - lo)
    };

    let cols: Vec<_> = (0..width).map(|x| taps(x, src_w, width)).collect();
    let rows: Vec<_> = (0..height).map(|y| taps(y, src_h, height)).collect();

    GrayImage::from_fn(width, height, |x, y| {
        let (x0, x1, fx) = cols[x as usize];
        let (y0, y1, fy) = rows[y as usize];
        let px = |xx: u32, yy: u32| src.get_pixel(xx, yy).0[0] as f32;
        let top = px(x0, y0) * (1.0 - fx) + px(x1, y0) * fx;
        let bottom = px(x0, y1) * (1.0 - fx) + px(x1, y1) * fx;
        let v = top * (1.0 - fy) + bottom * fy;
        Luma([v.round().clamp(0.0, 255.0) as u8])
    })
}

/// Whether the file name carries one of [`ALLOWED_EXTENSIONS`] (case-insensitive).
pub fn is_allowed_extension(path: &Path) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| {
            ALLOWED_EXTENSIONS
                .iter()
                .any(|allowed| ext.eq_ignore_ascii_case(allowed))
        })
        .unwrap_or(false)
}
