//! Detection configuration.

use crowd_models::CrowdThresholds;
use tracing::warn;

/// Tunables for the person detector and frame classifier.
#[derive(Debug, Clone)]
pub struct DetectionConfig {
    /// Path to the YOLOv8 ONNX model
    pub model_path: String,
    /// Minimum class score for a candidate box
    pub confidence_threshold: f32,
    /// IoU above which overlapping boxes are suppressed
    pub iou_threshold: f32,
    /// Detections with a smaller box area (px²) are discarded
    pub min_bbox_area: i64,
    /// Frames larger than this on their longest side are downscaled
    pub target_size: u32,
    /// Cap on detections kept per frame after NMS
    pub max_detections: usize,
    /// Crowd level thresholds
    pub thresholds: CrowdThresholds,
}

impl Default for DetectionConfig {
    fn default() -> Self {
        Self {
            model_path: "models/yolov8n.onnx".to_string(),
            confidence_threshold: 0.25,
            iou_threshold: 0.7,
            min_bbox_area: 200,
            target_size: 640,
            max_detections: 100,
            thresholds: CrowdThresholds::default(),
        }
    }
}

impl DetectionConfig {
    /// Create config from environment variables.
    pub fn from_env() -> Self {
        let defaults = Self::default();

        let low = env_parse("CROWD_THRESHOLD_LOW", CrowdThresholds::DEFAULT_LOW);
        let medium = env_parse("CROWD_THRESHOLD_MEDIUM", CrowdThresholds::DEFAULT_MEDIUM);
        let high = env_parse("CROWD_THRESHOLD_HIGH", CrowdThresholds::DEFAULT_HIGH);
        let thresholds = CrowdThresholds::new(low, medium, high).unwrap_or_else(|e| {
            warn!("{}; using defaults", e);
            CrowdThresholds::default()
        });

        Self {
            model_path: std::env::var("MODEL_PATH").unwrap_or(defaults.model_path),
            confidence_threshold: env_parse("CONFIDENCE_THRESHOLD", defaults.confidence_threshold),
            iou_threshold: env_parse("IOU_THRESHOLD", defaults.iou_threshold),
            min_bbox_area: env_parse("MIN_BBOX_AREA", defaults.min_bbox_area),
            target_size: env_parse("TARGET_SIZE", defaults.target_size).max(1),
            max_detections: env_parse("MAX_DETECTIONS", defaults.max_detections),
            thresholds,
        }
    }
}

fn env_parse<T: std::str::FromStr>(key: &str, default: T) -> T {
    std::env::var(key)
        .ok()
        .and_then(|s| s.trim().parse().ok())
        .unwrap_or(default)
}
