//! Person detector provider trait.

use image::RgbImage;

use crate::error::MediaResult;

/// A person box in pixel coordinates of the frame it was detected on.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RawDetection {
    pub x1: f32,
    pub y1: f32,
    pub x2: f32,
    pub y2: f32,
    pub confidence: f32,
}

impl RawDetection {
    pub fn new(x1: f32, y1: f32, x2: f32, y2: f32, confidence: f32) -> Self {
        Self {
            x1,
            y1,
            x2,
            y2,
            confidence,
        }
    }

    pub fn area(&self) -> f32 {
        (self.x2 - self.x1).max(0.0) * (self.y2 - self.y1).max(0.0)
    }

    /// Intersection over union with `other`.
    pub fn iou(&self, other: &RawDetection) -> f32 {
        let x1 = self.x1.max(other.x1);
        let y1 = self.y1.max(other.y1);
        let x2 = self.x2.min(other.x2);
        let y2 = self.y2.min(other.y2);

        let intersection = (x2 - x1).max(0.0) * (y2 - y1).max(0.0);
        let union = self.area() + other.area() - intersection;

        if union > 0.0 {
            intersection / union
        } else {
            0.0
        }
    }
}

/// Person detection provider.
///
/// Implementations are blocking (CPU-bound inference); async callers should
/// run them on the blocking pool.
pub trait PersonDetector: Send + Sync {
    /// Detect persons in `frame`.
    fn detect(&self, frame: &RgbImage) -> MediaResult<Vec<RawDetection>>;

    /// Provider name for logging.
    fn name(&self) -> &'static str;
}
