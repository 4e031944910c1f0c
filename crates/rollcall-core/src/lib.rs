//! rollcall-core — Face detection and matching for attendance tracking.
//!
//! Detects faces with a Haar cascade (optionally preceded by an SSD model via
//! ONNX Runtime) and compares faces with a histogram/template-correlation blend.

pub mod cascade;
pub mod detector;
pub mod dnn;
pub mod imaging;
pub mod matcher;
pub mod types;

#[cfg(test)]
pub(crate) mod testutil;

pub use cascade::{CascadeParams, HaarCascade};
pub use detector::{DetectorMode, FaceDetector};
pub use imaging::is_allowed_extension;
pub use matcher::{FaceDescriptor, FaceMatcher, DEFAULT_ACCEPTANCE_THRESHOLD};
pub use types::{DetectionReport, FaceRegion, MatchResult, Reference};

use std::path::PathBuf;

/// File name of the frontal-face cascade inside the model directory.
pub const CASCADE_FILE_NAME: &str = "haarcascade_frontalface_default.xml";
/// File name of the optional SSD face model inside the model directory.
pub const DNN_MODEL_FILE_NAME: &str = "res10_300x300_ssd.onnx";

/// Default model directory: `$XDG_DATA_HOME/rollcall/models`.
pub fn default_model_dir() -> PathBuf {
    std::env::var("XDG_DATA_HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| {
            let home = std::env::var("HOME").unwrap_or_else(|_| "/tmp".to_string());
            PathBuf::from(home).join(".local/share")
        })
        .join("rollcall")
        .join("models")
}
