//! Person detection using a YOLOv8 ONNX model.
//!
//! Uses ONNX Runtime with automatic execution provider selection:
//! - CUDA on Linux with NVIDIA GPU (when the `cuda` feature is enabled)
//! - CoreML on macOS
//! - CPU fallback on all platforms

use std::path::Path;
use std::sync::Mutex;

use image::imageops::FilterType;
use image::RgbImage;
use ndarray::Array;
use ort::session::builder::GraphOptimizationLevel;
use ort::session::Session;
use ort::value::{Tensor, Value};
use tracing::{debug, info};

use super::provider::{PersonDetector, RawDetection};
use crate::config::DetectionConfig;
use crate::error::{MediaError, MediaResult};

/// COCO class id for "person".
pub const PERSON_CLASS: usize = 0;

/// Square input edge the exported YOLOv8 graph expects.
pub const MODEL_INPUT_SIZE: u32 = 640;

const NUM_CLASSES: usize = 80;
const NUM_FEATURES: usize = 4 + NUM_CLASSES;
/// Anchor columns for [`MODEL_INPUT_SIZE`]: strides 8, 16 and 32.
const NUM_BOXES: usize = num_boxes(MODEL_INPUT_SIZE);

const fn num_boxes(input_size: u32) -> usize {
    let s = input_size as usize;
    (s / 8) * (s / 8) + (s / 16) * (s / 16) + (s / 32) * (s / 32)
}

/// YOLOv8 person detector.
pub struct ObjectDetector {
    session: Mutex<Session>,
    confidence_threshold: f32,
    iou_threshold: f32,
    max_detections: usize,
}

impl ObjectDetector {
    /// Load the model named by `config.model_path`.
    ///
    /// Returns an error if the model file doesn't exist or cannot be loaded.
    pub fn new(config: &DetectionConfig) -> MediaResult<Self> {
        let model_path = Path::new(&config.model_path);
        if !model_path.exists() {
            return Err(MediaError::model_not_found(&config.model_path));
        }

        let session = Mutex::new(create_session(model_path)?);
        info!(
            model_path = %config.model_path,
            confidence_threshold = config.confidence_threshold,
            iou_threshold = config.iou_threshold,
            "Person detector initialized"
        );

        Ok(Self {
            session,
            confidence_threshold: config.confidence_threshold,
            iou_threshold: config.iou_threshold,
            max_detections: config.max_detections,
        })
    }

    fn preprocess(&self, frame: &RgbImage) -> MediaResult<Value> {
        let size = MODEL_INPUT_SIZE as usize;
        let shape = vec![1usize, 3, size, size];
        Tensor::from_array((shape, input_tensor_data(frame).into_boxed_slice()))
            .map(Value::from)
            .map_err(|e| MediaError::internal(format!("Failed to create tensor: {}", e)))
    }

    fn run_inference(&self, input: Value) -> MediaResult<Vec<f32>> {
        let mut session = self
            .session
            .lock()
            .map_err(|_| MediaError::internal("Session lock poisoned"))?;

        let outputs = session
            .run(ort::inputs![input])
            .map_err(|e| MediaError::detection_failed(format!("ONNX inference failed: {}", e)))?;

        // YOLOv8 output is [1, 84, 8400]
        let output = outputs
            .get("output0")
            .ok_or_else(|| MediaError::detection_failed("Missing output0 tensor"))?;

        let tensor = output
            .try_extract_tensor::<f32>()
            .map_err(|e| MediaError::detection_failed(format!("Failed to extract tensor: {}", e)))?;

        Ok(tensor.1.iter().copied().collect())
    }

    fn postprocess(
        &self,
        outputs: &[f32],
        frame_width: u32,
        frame_height: u32,
    ) -> MediaResult<Vec<RawDetection>> {
        let candidates =
            decode_person_boxes(outputs, frame_width, frame_height, self.confidence_threshold)?;
        let mut kept = non_maximum_suppression(candidates, self.iou_threshold);
        kept.truncate(self.max_detections);
        Ok(kept)
    }
}

/// Resize to the square model input, scale to [0, 1], lay out as CHW.
fn input_tensor_data(frame: &RgbImage) -> Vec<f32> {
    let size = MODEL_INPUT_SIZE;
    let resized = image::imageops::resize(frame, size, size, FilterType::Triangle);

    let mut chw_data: Vec<f32> = Vec::with_capacity(3 * (size * size) as usize);
    for c in 0..3 {
        for pixel in resized.pixels() {
            chw_data.push(pixel[c] as f32 / 255.0);
        }
    }
    chw_data
}

/// Decode person candidates from raw YOLOv8 output, in frame pixels.
///
/// Each of the [`NUM_BOXES`] columns holds `cx, cy, w, h` in model-input
/// pixels followed by 80 class scores.
fn decode_person_boxes(
    outputs: &[f32],
    frame_width: u32,
    frame_height: u32,
    confidence_threshold: f32,
) -> MediaResult<Vec<RawDetection>> {
    if outputs.len() != NUM_FEATURES * NUM_BOXES {
        return Err(MediaError::detection_failed(format!(
            "Unexpected output size: expected {}, got {}",
            NUM_FEATURES * NUM_BOXES,
            outputs.len()
        )));
    }

    let output_array = Array::from_shape_vec((NUM_FEATURES, NUM_BOXES), outputs.to_vec())
        .map_err(|e| MediaError::internal(format!("Failed to reshape output: {}", e)))?;
    let transposed = output_array.t();

    let input_size = MODEL_INPUT_SIZE as f32;
    let scale_w = frame_width as f32 / input_size;
    let scale_h = frame_height as f32 / input_size;
    let max_x = frame_width as f32;
    let max_y = frame_height as f32;

    let mut candidates = Vec::new();
    for i in 0..NUM_BOXES {
        let mut best_class = 0;
        let mut best_score = 0.0f32;
        for c in 0..NUM_CLASSES {
            let score = transposed[[i, 4 + c]];
            if score > best_score {
                best_score = score;
                best_class = c;
            }
        }

        if best_class != PERSON_CLASS || best_score < confidence_threshold {
            continue;
        }

        let cx = transposed[[i, 0]];
        let cy = transposed[[i, 1]];
        let w = transposed[[i, 2]];
        let h = transposed[[i, 3]];

        candidates.push(RawDetection::new(
            ((cx - w / 2.0) * scale_w).clamp(0.0, max_x),
            ((cy - h / 2.0) * scale_h).clamp(0.0, max_y),
            ((cx + w / 2.0) * scale_w).clamp(0.0, max_x),
            ((cy + h / 2.0) * scale_h).clamp(0.0, max_y),
            best_score,
        ));
    }

    Ok(candidates)
}

impl PersonDetector for ObjectDetector {
    fn detect(&self, frame: &RgbImage) -> MediaResult<Vec<RawDetection>> {
        let (width, height) = frame.dimensions();
        if width == 0 || height == 0 {
            return Err(MediaError::invalid_image("frame has no pixels"));
        }

        let input = self.preprocess(frame)?;
        let outputs = self.run_inference(input)?;
        let detections = self.postprocess(&outputs, width, height)?;

        debug!(count = detections.len(), "Person detection completed");
        Ok(detections)
    }

    fn name(&self) -> &'static str {
        "yolov8"
    }
}

/// Greedy NMS: keep the highest-confidence box, drop any box overlapping a
/// kept one by more than `iou_threshold`. Output is sorted by confidence.
pub fn non_maximum_suppression(
    mut detections: Vec<RawDetection>,
    iou_threshold: f32,
) -> Vec<RawDetection> {
    detections.sort_by(|a, b| b.confidence.total_cmp(&a.confidence));

    let mut keep: Vec<RawDetection> = Vec::new();
    let mut suppressed = vec![false; detections.len()];

    for i in 0..detections.len() {
        if suppressed[i] {
            continue;
        }
        keep.push(detections[i]);

        for j in (i + 1)..detections.len() {
            if !suppressed[j] && detections[i].iou(&detections[j]) > iou_threshold {
                suppressed[j] = true;
            }
        }
    }

    keep
}

/// Create ONNX Runtime session with automatic execution provider selection.
fn create_session(model_path: &Path) -> MediaResult<Session> {
    let model_bytes = std::fs::read(model_path)
        .map_err(|e| MediaError::internal(format!("Failed to read model file: {}", e)))?;

    let builder = Session::builder()
        .map_err(|e| MediaError::internal(format!("Failed to create session builder: {}", e)))?
        .with_optimization_level(GraphOptimizationLevel::Level3)
        .map_err(|e| MediaError::internal(format!("Failed to set optimization level: {}", e)))?;

    #[cfg(all(target_os = "linux", feature = "cuda"))]
    {
        use ort::execution_providers::CUDAExecutionProvider;
        if let Ok(cuda_builder) = builder
            .clone()
            .with_execution_providers([CUDAExecutionProvider::default().build()])
        {
            if let Ok(session) = cuda_builder.commit_from_memory(&model_bytes) {
                info!("Using CUDA execution provider for person detection");
                return Ok(session);
            }
        }
        debug!("CUDA execution provider not available, trying alternatives");
    }

    #[cfg(target_os = "macos")]
    {
        use ort::execution_providers::CoreMLExecutionProvider;
        if let Ok(coreml_builder) = builder
            .clone()
            .with_execution_providers([CoreMLExecutionProvider::default().build()])
        {
            if let Ok(session) = coreml_builder.commit_from_memory(&model_bytes) {
                info!("Using CoreML execution provider for person detection");
                return Ok(session);
            }
        }
        debug!("CoreML execution provider not available, using CPU");
    }

    info!("Using CPU execution provider for person detection");
    builder
        .commit_from_memory(&model_bytes)
        .map_err(|e| MediaError::internal(format!("Failed to load ONNX model: {}", e)))
}
