//! Appearance-based face matcher.
//!
//! Compares two face crops with a blend of grayscale histogram correlation
//! and normalized template correlation. No learned embedding is involved.

use crate::detector::{FaceDetector, PRESENCE_MIN_SIZE};
use crate::imaging;
use crate::types::{MatchResult, Reference};
use image::imageops;
use image::{DynamicImage, GrayImage};
use std::path::Path;
use thiserror::Error;

// --- Named constants ---
/// Side length of the canonical descriptor crop.
pub const DESCRIPTOR_SIZE: u32 = 100;
/// Similarity a query must exceed to count as a match.
pub const DEFAULT_ACCEPTANCE_THRESHOLD: f32 = 0.6;
const HISTOGRAM_BINS: usize = 256;
const HISTOGRAM_WEIGHT: f64 = 0.6;
const TEMPLATE_WEIGHT: f64 = 0.4;

#[derive(Error, Debug)]
pub enum MatchError {
    #[error("could not read image: {0}")]
    Decode(#[from] image::ImageError),
}

/// Canonical 100×100 grayscale crop of the first detected face.
#[derive(Debug, Clone)]
pub struct FaceDescriptor {
    pixels: GrayImage,
}

impl FaceDescriptor {
    pub fn pixels(&self) -> &GrayImage {
        &self.pixels
    }

    /// 256-bin intensity histogram.
    pub fn histogram(&self) -> [f64; HISTOGRAM_BINS] {
        let mut hist = [0.0f64; HISTOGRAM_BINS];
        for p in self.pixels.pixels() {
            hist[p.0[0] as usize] += 1.0;
        }
        hist
    }
}

/// Matcher borrowing a shared detector for descriptor extraction.
pub struct FaceMatcher<'a> {
    detector: &'a FaceDetector,
}

impl<'a> FaceMatcher<'a> {
    pub fn new(detector: &'a FaceDetector) -> Self {
        Self { detector }
    }

    /// Crop and normalize the first face of `image`; `None` if there is none.
    pub fn extract_descriptor(&self, image: &DynamicImage) -> Option<FaceDescriptor> {
        let gray = imaging::to_gray(image);
        let regions = self.detector.single_pass(&gray, PRESENCE_MIN_SIZE);
        let region = regions.first()?;

        // Regions are averaged window hits and may overhang the border by a pixel.
        let x = region.x.max(0) as u32;
        let y = region.y.max(0) as u32;
        let w = (region.width.max(0) as u32).min(gray.width().saturating_sub(x));
        let h = (region.height.max(0) as u32).min(gray.height().saturating_sub(y));
        if w == 0 || h == 0 {
            return None;
        }

        let crop = imageops::crop_imm(&gray, x, y, w, h).to_image();
        let pixels = imaging::resize_linear(&crop, DESCRIPTOR_SIZE, DESCRIPTOR_SIZE);
        Some(FaceDescriptor { pixels })
    }

    /// Descriptor of an image file: `Ok(None)` when no face was found.
    pub fn try_extract_descriptor_from_file(
        &self,
        path: &Path,
    ) -> Result<Option<FaceDescriptor>, MatchError> {
        let image = imaging::open(path)?;
        Ok(self.extract_descriptor(&image))
    }

    pub fn extract_descriptor_from_file(&self, path: &Path) -> Option<FaceDescriptor> {
        self.try_extract_descriptor_from_file(path)
            .unwrap_or_else(|e| {
                tracing::warn!(path = %path.display(), error = %e, "descriptor extraction failed");
                None
            })
    }

    /// Similarity of two images in [0, 1]; 0.0 if either has no face.
    pub fn similarity(&self, a: &DynamicImage, b: &DynamicImage) -> f32 {
        match (self.extract_descriptor(a), self.extract_descriptor(b)) {
            (Some(da), Some(db)) => descriptor_similarity(&da, &db),
            _ => 0.0,
        }
    }

    /// Similarity of two image files; unreadable files score 0.0.
    pub fn similarity_files(&self, a: &Path, b: &Path) -> f32 {
        match (
            self.extract_descriptor_from_file(a),
            self.extract_descriptor_from_file(b),
        ) {
            (Some(da), Some(db)) => descriptor_similarity(&da, &db),
            _ => 0.0,
        }
    }

    /// Score `query` against every reference and report the best one.
    ///
    /// A match requires a similarity strictly above `threshold`; ties keep
    /// the earlier reference.
    pub fn identify(&self, query: &Path, references: &[Reference], threshold: f32) -> MatchResult {
        let Some(query_descriptor) = self.extract_descriptor_from_file(query) else {
            tracing::debug!(query = %query.display(), "query has no descriptor");
            return MatchResult::no_match(0.0);
        };

        let mut best_sim = 0.0f32;
        let mut best_idx: Option<usize> = None;

        for (i, reference) in references.iter().enumerate() {
            let sim = match self.extract_descriptor_from_file(&reference.photo) {
                Some(d) => descriptor_similarity(&query_descriptor, &d),
                None => 0.0,
            };
            tracing::trace!(reference = reference.id, similarity = sim, "compared reference");
            if best_idx.is_none() || sim > best_sim {
                best_sim = sim;
                best_idx = Some(i);
            }
        }

        match best_idx {
            Some(idx) if best_sim > threshold => MatchResult {
                matched: true,
                similarity: best_sim,
                reference_id: Some(references[idx].id),
                label: Some(references[idx].label.clone()),
            },
            _ => MatchResult::no_match(best_sim),
        }
    }
}

/// Blend histogram correlation and template correlation, clamped to [0, 1].
pub fn descriptor_similarity(a: &FaceDescriptor, b: &FaceDescriptor) -> f32 {
    let hist = histogram_correlation(&a.histogram(), &b.histogram());
    let template = template_score(&a.pixels, &b.pixels);
    blend(hist, template)
}

/// `0.6·hist + 0.4·template`; negative evidence floors at zero.
pub fn blend(histogram_correlation: f64, template_score: f64) -> f32 {
    let combined = HISTOGRAM_WEIGHT * histogram_correlation + TEMPLATE_WEIGHT * template_score;
    combined.clamp(0.0, 1.0) as f32
}

/// Pearson correlation of two histograms; 1.0 when either is constant.
pub fn histogram_correlation(a: &[f64], b: &[f64]) -> f64 {
    let n = a.len().min(b.len());
    if n == 0 {
        return 1.0;
    }
    let mean_a = a[..n].iter().sum::<f64>() / n as f64;
    let mean_b = b[..n].iter().sum::<f64>() / n as f64;

    let (mut num, mut den_a, mut den_b) = (0.0f64, 0.0f64, 0.0f64);
    for (x, y) in a[..n].iter().zip(&b[..n]) {
        let (da, db) = (x - mean_a, y - mean_b);
        num += da * db;
        den_a += da * da;
        den_b += db * db;
    }

    let den = den_a * den_b;
    if den.abs() > f64::EPSILON {
        num / den.sqrt()
    } else {
        1.0
    }
}

/// Normalized correlation coefficient of two equally sized grids.
///
/// This is the single position of a template slide when template and image
/// have the same size. Returns 0.0 when either grid is constant or the sizes
/// differ.
pub fn template_score(a: &GrayImage, b: &GrayImage) -> f64 {
    if a.dimensions() != b.dimensions() || a.as_raw().is_empty() {
        return 0.0;
    }
    let n = a.as_raw().len() as f64;
    let mean_a = a.as_raw().iter().map(|&v| v as f64).sum::<f64>() / n;
    let mean_b = b.as_raw().iter().map(|&v| v as f64).sum::<f64>() / n;

    let (mut num, mut den_a, mut den_b) = (0.0f64, 0.0f64, 0.0f64);
    for (&x, &y) in a.as_raw().iter().zip(b.as_raw()) {
        let (da, db) = (x as f64 - mean_a, y as f64 - mean_b);
        num += da * db;
        den_a += da * da;
        den_b += db * db;
    }

    let den = (den_a * den_b).sqrt();
    if den > f64::EPSILON {
        num / den
    } else {
        0.0
    }
}
