//! SSD face detector via ONNX Runtime.
//!
//! Runs the 300×300 ResNet-10 SSD face detector (the model OpenCV ships as
//! `res10_300x300_ssd`), exported to ONNX. The network emits a
//! `[1, 1, N, 7]` tensor of `(image_id, label, confidence, x1, y1, x2, y2)`
//! rows with coordinates normalized to the input image.

use crate::types::FaceRegion;
use image::imageops::FilterType;
use image::DynamicImage;
use ndarray::Array4;
use ort::session::Session;
use ort::value::TensorRef;
use std::path::Path;
use thiserror::Error;

// --- Named constants (no magic numbers) ---
const SSD_INPUT_SIZE: u32 = 300;
/// Per-channel mean in B, G, R order, subtracted at scale 1.0.
const SSD_MEAN_BGR: [f32; 3] = [104.0, 117.0, 123.0];
const SSD_CONFIDENCE_THRESHOLD: f32 = 0.5;
const SSD_ROW_LEN: usize = 7;

#[derive(Error, Debug)]
pub enum DnnError {
    #[error("model file not found: {0}")]
    ModelNotFound(String),
    #[error("inference failed: {0}")]
    InferenceFailed(String),
    #[error("ort: {0}")]
    Ort(#[from] ort::Error),
}

/// SSD-based face detector.
pub struct SsdFaceDetector {
    session: Session,
}

impl SsdFaceDetector {
    /// Load the SSD ONNX model from the given path.
    pub fn load(model_path: &Path) -> Result<Self, DnnError> {
        if !model_path.exists() {
            return Err(DnnError::ModelNotFound(model_path.display().to_string()));
        }

        let session = Session::builder()?
            .with_intra_threads(2)?
            .commit_from_file(model_path)?;

        tracing::info!(
            path = %model_path.display(),
            inputs = ?session.inputs().iter().map(|i| (i.name(), i.dtype())).collect::<Vec<_>>(),
            outputs = ?session.outputs().iter().map(|o| o.name()).collect::<Vec<_>>(),
            "loaded SSD face model"
        );

        Ok(Self { session })
    }

    /// Detect faces, returning regions whose confidence exceeds 0.5.
    pub fn detect(&mut self, image: &DynamicImage) -> Result<Vec<FaceRegion>, DnnError> {
        let input = preprocess(image);

        let outputs = self.session.run(ort::inputs![TensorRef::from_array_view(input.view())?])?;

        let (_, raw) = outputs[0]
            .try_extract_tensor::<f32>()
            .map_err(|e| DnnError::InferenceFailed(format!("detection output: {e}")))?;

        if raw.len() % SSD_ROW_LEN != 0 {
            return Err(DnnError::InferenceFailed(format!(
                "expected rows of {SSD_ROW_LEN} values, got {} values",
                raw.len()
            )));
        }

        Ok(decode_detections(
            raw,
            image.width(),
            image.height(),
            SSD_CONFIDENCE_THRESHOLD,
        ))
    }
}

/// Resize to 300×300 and build a mean-subtracted BGR NCHW tensor.
fn preprocess(image: &DynamicImage) -> Array4<f32> {
    let size = SSD_INPUT_SIZE as usize;
    let resized = image
        .resize_exact(SSD_INPUT_SIZE, SSD_INPUT_SIZE, FilterType::Triangle)
        .to_rgb8();

    let mut tensor = Array4::<f32>::zeros((1, 3, size, size));
    for (x, y, pixel) in resized.enumerate_pixels() {
        let [r, g, b] = pixel.0;
        let (x, y) = (x as usize, y as usize);
        tensor[[0, 0, y, x]] = b as f32 - SSD_MEAN_BGR[0];
        tensor[[0, 1, y, x]] = g as f32 - SSD_MEAN_BGR[1];
        tensor[[0, 2, y, x]] = r as f32 - SSD_MEAN_BGR[2];
    }
    tensor
}

/// Map SSD output rows above `threshold` to pixel-space regions.
fn decode_detections(raw: &[f32], width: u32, height: u32, threshold: f32) -> Vec<FaceRegion> {
    let (w, h) = (width as f32, height as f32);
    raw.chunks_exact(SSD_ROW_LEN)
        .filter(|row| row[2] > threshold)
        .map(|row| {
            let x1 = (row[3].clamp(0.0, 1.0) * w).round() as i32;
            let y1 = (row[4].clamp(0.0, 1.0) * h).round() as i32;
            let x2 = (row[5].clamp(0.0, 1.0) * w).round() as i32;
            let y2 = (row[6].clamp(0.0, 1.0) * h).round() as i32;
            FaceRegion {
                x: x1,
                y: y1,
                width: (x2 - x1).max(0),
                height: (y2 - y1).max(0),
                confidence: Some(row[2]),
            }
        })
        .collect()
}
