//! Person detection and frame classification.
//!
//! | Component | Role |
//! |-----------|------|
//! | [`PersonDetector`] | Raw person boxes for one frame |
//! | [`ObjectDetector`] | YOLOv8 ONNX implementation of `PersonDetector` |
//! | [`FrameClassifier`] | Normalize, detect, filter, and grade a frame |

pub mod classifier;
pub mod object_detector;
pub mod provider;

pub use classifier::FrameClassifier;
pub use object_detector::ObjectDetector;
pub use provider::{PersonDetector, RawDetection};
