//! Shared data models for the crowd analysis service.
//!
//! This crate provides Serde-serializable types for:
//! - Video analysis tasks and their status records
//! - Crowd levels and the thresholds that derive them
//! - Per-frame detections and classification results

pub mod crowd;
pub mod detection;
pub mod task;
pub mod utils;

// Re-export common types
pub use crowd::{CrowdLevel, CrowdThresholds, ThresholdError};
pub use detection::{Detection, FrameClassification};
pub use task::{AnalysisSummary, CountRange, PeakFrame, TaskId, TaskRecord, TaskStatus, TimelineEntry};
pub use utils::round_to;
