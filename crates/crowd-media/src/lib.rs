//! Video and image access plus person detection.
//!
//! This crate provides:
//! - FFprobe metadata (frame rate, frame count) for uploaded videos
//! - A sequential FFmpeg rawvideo frame source
//! - Image decoding and bounded-dimension normalization
//! - YOLOv8 ONNX person detection and the frame classifier built on it

pub mod config;
pub mod detection;
pub mod error;
pub mod frames;
pub mod imaging;
pub mod probe;

pub use config::DetectionConfig;
pub use detection::{FrameClassifier, ObjectDetector, PersonDetector, RawDetection};
pub use error::{MediaError, MediaResult};
pub use frames::{FfmpegFrameSource, FfmpegVideoOpener, FrameRead, FrameSource, VideoOpener};
pub use imaging::{decode_base64_image, decode_image, normalize_frame, strip_data_uri};
pub use probe::{probe_video, VideoInfo};
