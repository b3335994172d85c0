//! Detection results produced by the frame classifier.

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::CrowdLevel;

/// One accepted person detection.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct Detection {
    /// Bounding box `[x1, y1, x2, y2]` in integer pixels of the normalized frame
    pub bbox: [i32; 4],
    /// Confidence rounded to 3 decimals
    pub confidence: f64,
    /// Bounding box area in square pixels
    pub area: i64,
}

/// Normalized classification of a single frame.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct FrameClassification {
    pub count: u32,
    pub level: CrowdLevel,
    pub detections: Vec<Detection>,
}

impl FrameClassification {
    /// Result used when the detector is unavailable: no usable signal.
    pub fn unavailable() -> Self {
        Self {
            count: 0,
            level: CrowdLevel::Error,
            detections: Vec::new(),
        }
    }

    pub fn is_unavailable(&self) -> bool {
        self.level.is_sentinel()
    }
}
