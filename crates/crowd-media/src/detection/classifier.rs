//! Frame classifier: person count and crowd level for one frame.

use std::sync::Arc;

use crowd_models::{round_to, Detection, FrameClassification};
use image::RgbImage;
use tracing::{trace, warn};

use super::object_detector::ObjectDetector;
use super::provider::PersonDetector;
use crate::config::DetectionConfig;
use crate::error::MediaResult;
use crate::imaging::normalize_frame;

/// Classifies frames into a person count and crowd level.
///
/// When no detector could be loaded the classifier stays usable and every
/// frame yields [`FrameClassification::unavailable`].
#[derive(Clone)]
pub struct FrameClassifier {
    detector: Option<Arc<dyn PersonDetector>>,
    config: DetectionConfig,
}

impl FrameClassifier {
    /// Build a classifier around the YOLOv8 model named in `config`.
    pub fn from_config(config: DetectionConfig) -> Self {
        let detector = match ObjectDetector::new(&config) {
            Ok(detector) => Some(Arc::new(detector) as Arc<dyn PersonDetector>),
            Err(e) => {
                warn!(
                    model_path = %config.model_path,
                    error = %e,
                    "Person detector unavailable; frames will be classified as error"
                );
                None
            }
        };
        Self { detector, config }
    }

    pub fn new(detector: Option<Arc<dyn PersonDetector>>, config: DetectionConfig) -> Self {
        Self { detector, config }
    }

    /// Whether a detector is loaded.
    pub fn is_available(&self) -> bool {
        self.detector.is_some()
    }

    pub fn detector_name(&self) -> Option<&'static str> {
        self.detector.as_ref().map(|d| d.name())
    }

    pub fn config(&self) -> &DetectionConfig {
        &self.config
    }

    /// Classify one frame.
    ///
    /// The frame is downscaled to the configured target size first; returned
    /// boxes are in pixels of that normalized frame. Detector failures are
    /// returned as errors.
    pub fn classify(&self, frame: RgbImage) -> MediaResult<FrameClassification> {
        let Some(detector) = self.detector.as_ref() else {
            return Ok(FrameClassification::unavailable());
        };

        let frame = normalize_frame(frame, self.config.target_size);
        let raw = detector.detect(&frame)?;
        let raw_count = raw.len();

        let detections: Vec<Detection> = raw
            .into_iter()
            .filter_map(|d| {
                let bbox = [d.x1 as i32, d.y1 as i32, d.x2 as i32, d.y2 as i32];
                // Inverted boxes have no area
                let width = (bbox[2] - bbox[0]).max(0) as i64;
                let height = (bbox[3] - bbox[1]).max(0) as i64;
                let area = width * height;
                (area >= self.config.min_bbox_area).then(|| Detection {
                    bbox,
                    confidence: round_to(d.confidence as f64, 3),
                    area,
                })
            })
            .collect();

        let count = detections.len() as u32;
        trace!(
            raw = raw_count,
            kept = count,
            width = frame.width(),
            height = frame.height(),
            "Frame classified"
        );

        Ok(FrameClassification {
            count,
            level: self.config.thresholds.level_for(count),
            detections,
        })
    }
}
