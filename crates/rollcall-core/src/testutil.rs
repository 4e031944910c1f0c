//! Shared fixtures for unit tests: a toy cascade and synthetic photos.

use crate::cascade::HaarCascade;
use image::{DynamicImage, Rgb, RgbImage};
use std::path::{Path, PathBuf};

/// Single-stage cascade that fires on a bright-over-dark horizontal edge.
pub const EDGE_CASCADE_XML: &str = include_str!("../testdata/edge_cascade.xml");

pub fn edge_cascade() -> HaarCascade {
    HaarCascade::from_xml_str(EDGE_CASCADE_XML).unwrap()
}

/// Flat background with a textured bright-over-dark block in the middle,
/// which the edge cascade reports as a face.
pub fn face_image(width: u32, height: u32, seed: u32) -> DynamicImage {
    let (x0, x1) = (width / 5, width * 4 / 5);
    let (y0, y1) = (height / 5, height * 4 / 5);
    let mid = (y0 + y1) / 2;

    let img = RgbImage::from_fn(width, height, |x, y| {
        if x < x0 || x >= x1 || y < y0 || y >= y1 {
            return Rgb([128, 128, 128]);
        }
        let texture = ((x * 7 + y * 13 + seed * 5) % 23) as u8;
        let v = if y < mid { 200 + texture } else { 40 + texture };
        Rgb([v, v, v])
    });
    DynamicImage::ImageRgb8(img)
}

/// A second identity: a narrower, taller block with a harder edge, on a
/// darker background. Its intensities share no histogram bins with
/// [`face_image`], so the two score below the acceptance threshold.
pub fn other_face_image(width: u32, height: u32, seed: u32) -> DynamicImage {
    let (x0, x1) = (width / 4, width * 3 / 4);
    let (y0, y1) = (height / 6, height * 5 / 6);
    let mid = (y0 + y1) / 2;

    let img = RgbImage::from_fn(width, height, |x, y| {
        if x < x0 || x >= x1 || y < y0 || y >= y1 {
            return Rgb([100, 100, 100]);
        }
        let texture = ((x * 11 + y * 3 + seed * 7) % 23) as u8;
        let v = if y < mid { 232 + texture } else { texture };
        Rgb([v, v, v])
    });
    DynamicImage::ImageRgb8(img)
}

pub fn flat_image(width: u32, height: u32, value: u8) -> DynamicImage {
    DynamicImage::ImageRgb8(RgbImage::from_pixel(width, height, Rgb([value, value, value])))
}

/// Write `image` as PNG into `dir` and return its path.
pub fn save_png(dir: &Path, name: &str, image: &DynamicImage) -> PathBuf {
    let path = dir.join(name);
    image.save(&path).unwrap();
    path
}
