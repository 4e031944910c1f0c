use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Axis-aligned face rectangle in image pixel coordinates.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct FaceRegion {
    pub x: i32,
    pub y: i32,
    pub width: i32,
    pub height: i32,
    /// Only set by the deep detector; cascade hits are boolean.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub confidence: Option<f32>,
}

impl FaceRegion {
    pub fn new(x: i32, y: i32, width: i32, height: i32) -> Self {
        Self {
            x,
            y,
            width,
            height,
            confidence: None,
        }
    }

    pub fn area(&self) -> i64 {
        self.width as i64 * self.height as i64
    }
}

/// Aggregate detection result for callers that draw bounding boxes.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DetectionReport {
    pub success: bool,
    pub faces: Vec<FaceRegion>,
    pub total_faces: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl DetectionReport {
    pub fn found(faces: Vec<FaceRegion>) -> Self {
        Self {
            success: true,
            total_faces: faces.len(),
            faces,
            error: None,
        }
    }

    pub fn failed(error: impl Into<String>) -> Self {
        Self {
            success: false,
            faces: Vec::new(),
            total_faces: 0,
            error: Some(error.into()),
        }
    }
}

/// A known identity with its reference photo on disk.
#[derive(Debug, Clone)]
pub struct Reference {
    pub id: i64,
    pub label: String,
    pub photo: PathBuf,
}

/// Result of matching a query image against a gallery of references.
#[derive(Debug, Clone, PartialEq)]
pub struct MatchResult {
    pub matched: bool,
    /// Similarity of the best-scoring reference, in [0, 1].
    pub similarity: f32,
    /// ID of the matched reference (if any).
    pub reference_id: Option<i64>,
    /// Label of the matched reference (if any).
    pub label: Option<String>,
}

impl MatchResult {
    pub fn no_match(similarity: f32) -> Self {
        Self {
            matched: false,
            similarity,
            reference_id: None,
            label: None,
        }
    }
}
