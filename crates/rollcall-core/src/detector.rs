//! Face presence and region detection.
//!
//! An optional deep (SSD) pass runs first when its model loaded; the Haar
//! cascade is the always-available fallback and is retried over several
//! scale factors, keeping the first pass that finds anything.

use crate::cascade::{CascadeError, CascadeParams, HaarCascade};
use crate::dnn::SsdFaceDetector;
use crate::imaging;
use crate::types::{DetectionReport, FaceRegion};
use image::DynamicImage;
use std::path::Path;
use std::sync::Mutex;
use thiserror::Error;

/// Scale factors tried in order by the presence and region sweeps.
pub const SWEEP_SCALE_FACTORS: [f64; 3] = [1.1, 1.2, 1.3];
pub const MIN_NEIGHBORS: usize = 5;
/// Minimum face size for the has-face check.
pub const PRESENCE_MIN_SIZE: u32 = 30;
/// Minimum face size when returning regions to draw.
pub const REGION_MIN_SIZE: u32 = 50;
/// Scale factor of single-pass detections (report and descriptor extraction).
pub const SINGLE_PASS_SCALE_FACTOR: f64 = 1.1;

#[derive(Error, Debug)]
pub enum DetectorError {
    #[error("could not read image: {0}")]
    Decode(#[from] image::ImageError),
}

/// Detection capability, fixed at construction.
pub enum DetectorMode {
    CascadeOnly,
    CascadeWithDeepFallback(Mutex<SsdFaceDetector>),
}

/// Cascade face detector with an optional deep first pass.
///
/// Immutable after construction and safe to share between threads.
pub struct FaceDetector {
    cascade: HaarCascade,
    mode: DetectorMode,
}

impl FaceDetector {
    /// Load the cascade (required) and the deep model (optional).
    ///
    /// A missing or broken deep model only downgrades the detector to
    /// cascade-only mode.
    pub fn load(cascade_path: &Path, dnn_model: Option<&Path>) -> Result<Self, CascadeError> {
        let cascade = HaarCascade::load(cascade_path)?;
        Ok(Self::new(cascade, dnn_model))
    }

    /// Build from a parsed cascade, trying to load the deep model if given.
    pub fn new(cascade: HaarCascade, dnn_model: Option<&Path>) -> Self {
        let Some(model_path) = dnn_model else {
            tracing::info!("no deep face model configured; using Haar cascade only");
            return Self::cascade_only(cascade);
        };

        match SsdFaceDetector::load(model_path) {
            Ok(ssd) => Self::with_deep_detector(cascade, ssd),
            Err(e) => {
                tracing::warn!(
                    path = %model_path.display(),
                    error = %e,
                    "deep face model unavailable; using Haar cascade only"
                );
                Self::cascade_only(cascade)
            }
        }
    }

    pub fn cascade_only(cascade: HaarCascade) -> Self {
        Self {
            cascade,
            mode: DetectorMode::CascadeOnly,
        }
    }

    pub fn with_deep_detector(cascade: HaarCascade, ssd: SsdFaceDetector) -> Self {
        Self {
            cascade,
            mode: DetectorMode::CascadeWithDeepFallback(Mutex::new(ssd)),
        }
    }

    pub fn mode(&self) -> &DetectorMode {
        &self.mode
    }

    pub fn has_deep_detector(&self) -> bool {
        matches!(self.mode, DetectorMode::CascadeWithDeepFallback(_))
    }

    /// Whether the image contains at least one face.
    pub fn has_face(&self, image: &DynamicImage) -> bool {
        if self.deep_pass(image) == Some(true) {
            tracing::debug!("face found by deep detector");
            return true;
        }

        let gray = imaging::to_gray(image);
        let regions = first_success(&SWEEP_SCALE_FACTORS, |scale_factor| {
            self.cascade.detect_multi_scale(
                &gray,
                &CascadeParams::new(scale_factor, MIN_NEIGHBORS, PRESENCE_MIN_SIZE),
            )
        });
        !regions.is_empty()
    }

    /// Decode `path` and check it for a face; unreadable files are an error.
    pub fn try_has_face_in_file(&self, path: &Path) -> Result<bool, DetectorError> {
        let image = imaging::open(path)?;
        Ok(self.has_face(&image))
    }

    pub fn try_has_face_in_bytes(&self, bytes: &[u8]) -> Result<bool, DetectorError> {
        let image = imaging::decode(bytes)?;
        Ok(self.has_face(&image))
    }

    /// Like [`try_has_face_in_file`](Self::try_has_face_in_file), failing closed.
    pub fn has_face_in_file(&self, path: &Path) -> bool {
        self.try_has_face_in_file(path).unwrap_or_else(|e| {
            tracing::warn!(path = %path.display(), error = %e, "face check failed");
            false
        })
    }

    pub fn has_face_in_bytes(&self, bytes: &[u8]) -> bool {
        self.try_has_face_in_bytes(bytes).unwrap_or_else(|e| {
            tracing::warn!(len = bytes.len(), error = %e, "face check failed");
            false
        })
    }

    /// Face regions from the first scale factor that finds any.
    ///
    /// Regions from different scale factors are never merged.
    pub fn find_face_regions(&self, image: &DynamicImage) -> Vec<FaceRegion> {
        let gray = imaging::to_gray(image);
        first_success(&SWEEP_SCALE_FACTORS, |scale_factor| {
            self.cascade.detect_multi_scale(
                &gray,
                &CascadeParams::new(scale_factor, MIN_NEIGHBORS, REGION_MIN_SIZE),
            )
        })
    }

    pub fn try_find_face_regions_in_file(&self, path: &Path) -> Result<Vec<FaceRegion>, DetectorError> {
        let image = imaging::open(path)?;
        Ok(self.find_face_regions(&image))
    }

    pub fn find_face_regions_in_file(&self, path: &Path) -> Vec<FaceRegion> {
        self.try_find_face_regions_in_file(path).unwrap_or_else(|e| {
            tracing::warn!(path = %path.display(), error = %e, "region detection failed");
            Vec::new()
        })
    }

    pub fn find_face_regions_in_bytes(&self, bytes: &[u8]) -> Vec<FaceRegion> {
        match imaging::decode(bytes) {
            Ok(image) => self.find_face_regions(&image),
            Err(e) => {
                tracing::warn!(len = bytes.len(), error = %e, "region detection failed");
                Vec::new()
            }
        }
    }

    /// Single-pass detection wrapped for callers that render bounding boxes.
    pub fn detection_report(&self, image: &DynamicImage) -> DetectionReport {
        let faces = self.single_pass(&imaging::to_gray(image), REGION_MIN_SIZE);
        if faces.is_empty() {
            DetectionReport::failed("No faces detected")
        } else {
            DetectionReport::found(faces)
        }
    }

    pub fn detection_report_for_file(&self, path: &Path) -> DetectionReport {
        match imaging::open(path) {
            Ok(image) => self.detection_report(&image),
            Err(e) => {
                tracing::warn!(path = %path.display(), error = %e, "detection report failed");
                DetectionReport::failed("Could not read image")
            }
        }
    }

    /// One cascade pass at [`SINGLE_PASS_SCALE_FACTOR`].
    pub(crate) fn single_pass(&self, gray: &image::GrayImage, min_size: u32) -> Vec<FaceRegion> {
        self.cascade.detect_multi_scale(
            gray,
            &CascadeParams::new(SINGLE_PASS_SCALE_FACTOR, MIN_NEIGHBORS, min_size),
        )
    }

    /// Best-effort deep pass: `None` when unavailable or failed.
    fn deep_pass(&self, image: &DynamicImage) -> Option<bool> {
        let DetectorMode::CascadeWithDeepFallback(ssd) = &self.mode else {
            return None;
        };
        let mut ssd = match ssd.lock() {
            Ok(guard) => guard,
            Err(_) => {
                tracing::warn!("deep detector lock poisoned; falling back to Haar cascade");
                return None;
            }
        };
        match ssd.detect(image) {
            Ok(regions) => Some(!regions.is_empty()),
            Err(e) => {
                tracing::warn!(error = %e, "deep detection failed; falling back to Haar cascade");
                None
            }
        }
    }
}

/// Run `pass` for each scale factor in order and return the first non-empty result.
fn first_success<F>(scale_factors: &[f64], mut pass: F) -> Vec<FaceRegion>
where
    F: FnMut(f64) -> Vec<FaceRegion>,
{
    for &scale_factor in scale_factors {
        let regions = pass(scale_factor);
        if !regions.is_empty() {
            tracing::debug!(scale_factor, count = regions.len(), "cascade found faces");
            return regions;
        }
    }
    Vec::new()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::{edge_cascade, face_image, flat_image, save_png};
    use image::{DynamicImage, GrayImage, Luma};

    fn detector() -> FaceDetector {
        FaceDetector::cascade_only(edge_cascade())
    }

    #[test]
    fn test_missing_deep_model_falls_back_to_cascade() {
        let det = FaceDetector::new(edge_cascade(), Some(Path::new("/nonexistent/ssd.onnx")));
        assert!(!det.has_deep_detector());
        assert!(matches!(det.mode(), DetectorMode::CascadeOnly));
        assert!(det.has_face(&face_image(160, 160, 0)));
    }

    #[test]
    fn test_no_deep_model_configured() {
        let det = FaceDetector::new(edge_cascade(), None);
        assert!(!det.has_deep_detector());
    }

    #[test]
    fn test_load_requires_cascade() {
        let result = FaceDetector::load(Path::new("/nonexistent/cascade.xml"), None);
        assert!(matches!(result, Err(CascadeError::NotFound(_))));
    }

    #[test]
    fn test_has_face_on_face_image() {
        assert!(detector().has_face(&face_image(160, 160, 3)));
    }

    #[test]
    fn test_no_face_in_flat_image() {
        let det = detector();
        let img = flat_image(160, 160, 90);
        assert!(!det.has_face(&img));
        assert!(det.find_face_regions(&img).is_empty());
    }

    #[test]
    fn test_no_face_in_dark_over_bright_image() {
        // Inverted edge: the cascade must not fire.
        let det = detector();
        let img = DynamicImage::ImageLuma8(GrayImage::from_fn(160, 160, |_, y| {
            Luma([if y < 80 { 40 } else { 220 }])
        }));
        assert!(!det.has_face(&img));
        assert!(det.find_face_regions(&img).is_empty());
    }

    #[test]
    fn test_find_face_regions_respects_region_min_size() {
        let regions = detector().find_face_regions(&face_image(160, 160, 0));
        assert!(!regions.is_empty());
        assert!(regions
            .iter()
            .all(|r| r.width >= REGION_MIN_SIZE as i32 && r.height >= REGION_MIN_SIZE as i32));
        assert!(regions.iter().all(|r| r.confidence.is_none()));
    }

    #[test]
    fn test_unreadable_bytes_fail_closed() {
        let det = detector();
        assert!(!det.has_face_in_bytes(b"not an image"));
        assert!(det.find_face_regions_in_bytes(b"not an image").is_empty());
        assert!(matches!(
            det.try_has_face_in_bytes(b"not an image"),
            Err(DetectorError::Decode(_))
        ));
    }

    #[test]
    fn test_missing_file_fails_closed() {
        let det = detector();
        let path = Path::new("/nonexistent/rollcall/query.png");
        assert!(!det.has_face_in_file(path));
        assert!(det.find_face_regions_in_file(path).is_empty());
        assert!(det.try_find_face_regions_in_file(path).is_err());
    }

    #[test]
    fn test_file_entry_points() {
        let dir = tempfile::tempdir().unwrap();
        let face = save_png(dir.path(), "face.png", &face_image(160, 160, 1));
        let blank = save_png(dir.path(), "blank.png", &flat_image(160, 160, 200));
        let det = detector();
        assert!(det.has_face_in_file(&face));
        assert!(!det.has_face_in_file(&blank));
        assert!(!det.find_face_regions_in_file(&face).is_empty());
    }

    #[test]
    fn test_detection_report() {
        let det = detector();

        let report = det.detection_report(&face_image(160, 160, 0));
        assert!(report.success);
        assert_eq!(report.total_faces, report.faces.len());
        assert!(report.total_faces >= 1);

        let report = det.detection_report(&flat_image(160, 160, 0));
        assert!(!report.success);
        assert_eq!(report.error.as_deref(), Some("No faces detected"));

        let report = det.detection_report_for_file(Path::new("/nonexistent/x.png"));
        assert!(!report.success);
        assert_eq!(report.error.as_deref(), Some("Could not read image"));
    }

    #[test]
    fn test_first_success_stops_at_first_hit() {
        let mut tried = Vec::new();
        let regions = first_success(&SWEEP_SCALE_FACTORS, |s| {
            tried.push(s);
            if s >= 1.2 {
                vec![FaceRegion::new(s as i32, 0, 10, 10)]
            } else {
                Vec::new()
            }
        });
        assert_eq!(tried, vec![1.1, 1.2]);
        // Only the 1.2 pass is returned; the 1.3 pass never runs, nothing merges.
        assert_eq!(regions.len(), 1);
    }

    #[test]
    fn test_first_success_all_empty() {
        let mut calls = 0;
        let regions = first_success(&SWEEP_SCALE_FACTORS, |_| {
            calls += 1;
            Vec::new()
        });
        assert!(regions.is_empty());
        assert_eq!(calls, 3);
    }

    #[test]
    fn test_detector_is_send_sync() {
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<FaceDetector>();
    }
}
