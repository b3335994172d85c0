//! HTTP-level tests against the full router with fake detection components.

use std::collections::VecDeque;
use std::io::Cursor;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use axum::body::{to_bytes, Body};
use axum::http::{header, Request, StatusCode};
use axum::Router;
use base64::Engine;
use image::{ImageOutputFormat, Rgb, RgbImage};
use serde_json::{json, Value};
use tempfile::TempDir;
use tower::ServiceExt;

use crowd_api::{create_router, ApiConfig, AppState};
use crowd_media::{
    DetectionConfig, FrameClassifier, FrameRead, FrameSource, MediaResult, PersonDetector,
    RawDetection, VideoOpener,
};
use crowd_worker::WorkerConfig;

const BOUNDARY: &str = "crowd-test-boundary";

/// Emits as many 20x20 boxes as the frame's first red value.
struct PixelCountDetector;

impl PersonDetector for PixelCountDetector {
    fn detect(&self, frame: &RgbImage) -> MediaResult<Vec<RawDetection>> {
        let n = frame.get_pixel(0, 0).0[0] as usize;
        Ok((0..n)
            .map(|i| RawDetection::new(0.0, i as f32, 20.0, i as f32 + 20.0, 0.9))
            .collect())
    }

    fn name(&self) -> &'static str {
        "pixel-count"
    }
}

/// Plays back one frame per listed person count, at 1 fps.
struct CountsOpener(Vec<u8>);

struct CountsSource(VecDeque<u8>, u64);

#[async_trait]
impl FrameSource for CountsSource {
    fn frame_rate(&self) -> u32 {
        1
    }

    fn total_frames(&self) -> u64 {
        self.1
    }

    async fn next_frame(&mut self) -> MediaResult<FrameRead> {
        Ok(match self.0.pop_front() {
            Some(n) => FrameRead::Frame(RgbImage::from_pixel(64, 64, Rgb([n, 0, 0]))),
            None => FrameRead::EndOfStream,
        })
    }

    async fn close(&mut self) {}
}

#[async_trait]
impl VideoOpener for CountsOpener {
    async fn open(&self, path: &Path) -> MediaResult<Box<dyn FrameSource>> {
        assert!(path.exists(), "upload should be on disk while analyzed");
        Ok(Box::new(CountsSource(
            self.0.iter().copied().collect(),
            self.0.len() as u64,
        )))
    }
}

struct TestApp {
    router: Router,
    state: AppState,
    _work_dir: TempDir,
}

fn test_app(model_loaded: bool) -> TestApp {
    let work_dir = tempfile::tempdir().unwrap();
    let worker_config = WorkerConfig {
        work_dir: work_dir.path().to_path_buf(),
        ..WorkerConfig::default()
    };
    let detector: Option<Arc<dyn PersonDetector>> = if model_loaded {
        Some(Arc::new(PixelCountDetector))
    } else {
        None
    };
    let classifier = FrameClassifier::new(detector, DetectionConfig::default());
    let state = AppState::with_components(
        ApiConfig::default(),
        &worker_config,
        classifier,
        Arc::new(CountsOpener(vec![2, 10, 5])),
    );

    TestApp {
        router: create_router(state.clone(), None),
        state,
        _work_dir: work_dir,
    }
}

async fn send(router: &Router, request: Request<Body>) -> (StatusCode, Value) {
    let response = router.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    let body = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
    (status, body)
}

fn get(uri: &str) -> Request<Body> {
    Request::builder().uri(uri).body(Body::empty()).unwrap()
}

fn post_json(uri: &str, body: Value) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri(uri)
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from(body.to_string()))
        .unwrap()
}

fn post_multipart(uri: &str, parts: &[(&str, Option<&str>, &[u8])]) -> Request<Body> {
    let mut body = Vec::new();
    for (name, filename, data) in parts {
        body.extend_from_slice(format!("--{BOUNDARY}\r\n").as_bytes());
        match filename {
            Some(filename) => body.extend_from_slice(
                format!(
                    "Content-Disposition: form-data; name=\"{name}\"; filename=\"{filename}\"\r\n\
                     Content-Type: application/octet-stream\r\n\r\n"
                )
                .as_bytes(),
            ),
            None => body.extend_from_slice(
                format!("Content-Disposition: form-data; name=\"{name}\"\r\n\r\n").as_bytes(),
            ),
        }
        body.extend_from_slice(data);
        body.extend_from_slice(b"\r\n");
    }
    body.extend_from_slice(format!("--{BOUNDARY}--\r\n").as_bytes());

    Request::builder()
        .method("POST")
        .uri(uri)
        .header(
            header::CONTENT_TYPE,
            format!("multipart/form-data; boundary={BOUNDARY}"),
        )
        .body(Body::from(body))
        .unwrap()
}

fn png_with_people(n: u8) -> Vec<u8> {
    let img = RgbImage::from_pixel(32, 32, Rgb([n, 0, 0]));
    let mut buf = Cursor::new(Vec::new());
    img.write_to(&mut buf, ImageOutputFormat::Png).unwrap();
    buf.into_inner()
}

async fn wait_for_terminal(router: &Router, task_id: &str) -> Value {
    for _ in 0..100 {
        let (status, body) = send(router, get(&format!("/video-status/{task_id}"))).await;
        assert_eq!(status, StatusCode::OK);
        if body["status"] != "processing" {
            return body;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    panic!("task {task_id} did not finish");
}

#[tokio::test]
async fn test_health_reports_model_state() {
    let app = test_app(true);
    let (status, body) = send(&app.router, get("/health")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "healthy");
    assert_eq!(body["model_loaded"], true);
    assert_eq!(body["tasks"]["processing"], 0);

    let app = test_app(false);
    let (_, body) = send(&app.router, get("/health")).await;
    assert_eq!(body["model_loaded"], false);
}

#[tokio::test]
async fn test_unknown_task_is_404() {
    let app = test_app(true);
    let (status, body) = send(&app.router, get("/video-status/does-not-exist")).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body, json!({ "error": "Task not found" }));
}

#[tokio::test]
async fn test_detect_json_without_image() {
    let app = test_app(true);
    let (status, body) = send(&app.router, post_json("/detect", json!({}))).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"], "No image data provided");
}

#[tokio::test]
async fn test_detect_json_invalid_image() {
    let app = test_app(true);
    let (status, body) = send(
        &app.router,
        post_json("/detect", json!({ "image": "data:image/png;base64,bm90IGFuIGltYWdl" })),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"], "Invalid image");
}

#[tokio::test]
async fn test_detect_json_base64_image() {
    let app = test_app(true);
    let encoded = base64::engine::general_purpose::STANDARD.encode(png_with_people(3));
    let (status, body) = send(
        &app.router,
        post_json(
            "/detect",
            json!({ "image": format!("data:image/png;base64,{encoded}") }),
        ),
    )
    .await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["count"], 3);
    assert_eq!(body["level"], "Low");
    assert_eq!(body["detections"].as_array().unwrap().len(), 3);
    assert_eq!(body["detections"][0]["bbox"], json!([0, 0, 20, 20]));
    assert_eq!(body["detections"][0]["area"], 400);
}

#[tokio::test]
async fn test_detect_multipart_image() {
    let app = test_app(true);
    let png = png_with_people(16);
    let (status, body) = send(
        &app.router,
        post_multipart("/detect", &[("image", Some("frame.png"), &png)]),
    )
    .await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["count"], 16);
    assert_eq!(body["level"], "Medium");
}

#[tokio::test]
async fn test_detect_without_model() {
    let app = test_app(false);
    let (status, body) = send(&app.router, post_json("/detect", json!({ "image": "x" }))).await;
    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(body["error"], "Model not loaded");
}

#[tokio::test]
async fn test_detect_video_requires_bus_id() {
    let app = test_app(true);
    let (status, body) = send(
        &app.router,
        post_multipart("/detect-video", &[("video", Some("clip.mp4"), b"fake video")]),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"], "Missing video or busId");
    assert!(app.state.registry.is_empty().await);
}

#[tokio::test]
async fn test_detect_video_requires_video() {
    let app = test_app(true);
    let (status, body) = send(
        &app.router,
        post_multipart("/detect-video", &[("busId", None, b"bus-12")]),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"], "Missing video or busId");
}

#[tokio::test]
async fn test_detect_video_without_model() {
    let app = test_app(false);
    let (status, body) = send(
        &app.router,
        post_multipart(
            "/detect-video",
            &[("video", Some("clip.mp4"), b"fake video"), ("busId", None, b"bus-12")],
        ),
    )
    .await;
    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(body["error"], "Model not loaded");
}

#[tokio::test]
async fn test_video_analysis_lifecycle() {
    let app = test_app(true);
    let (status, body) = send(
        &app.router,
        post_multipart(
            "/detect-video",
            &[("video", Some("clip.mp4"), b"fake video"), ("busId", None, b"bus-12")],
        ),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "processing");
    let task_id = body["task_id"].as_str().unwrap().to_string();

    let record = wait_for_terminal(&app.router, &task_id).await;
    assert_eq!(record["status"], "completed");
    assert_eq!(record["bus_id"], "bus-12");
    assert_eq!(record["filename"], "clip.mp4");
    assert_eq!(record["file_size"], 10);
    assert_eq!(record["progress"], 100);
    assert_eq!(record["fps"], 1);
    assert_eq!(record["max_count"], 10);
    assert_eq!(record["max_level"], "Low");
    assert_eq!(record["max_timestamp"], 1.0);
    assert_eq!(record["total_frames_processed"], 3);
    assert_eq!(record["unique_count_values"], 3);
    assert_eq!(record["count_range"], json!({ "min": 2, "max": 10 }));
    assert!(record.get("error").is_none());
    assert!(record["completed_at"].is_string());

    let counts: Vec<u64> = record["timeline"]
        .as_array()
        .unwrap()
        .iter()
        .map(|e| e["count"].as_u64().unwrap())
        .collect();
    assert_eq!(counts, vec![2, 10, 5]);

    // Terminal records read back unchanged
    let (_, again) = send(&app.router, get(&format!("/video-status/{task_id}"))).await;
    assert_eq!(again, record);

    // The upload is gone once the task finishes
    let leftovers = std::fs::read_dir(&app.state.work_dir).unwrap().count();
    assert_eq!(leftovers, 0);
}

#[tokio::test]
async fn test_security_and_request_id_headers() {
    let app = test_app(true);
    let response = app
        .router
        .clone()
        .oneshot(
            Request::builder()
                .uri("/health")
                .header("X-Request-ID", "req-123")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.headers()["X-Request-ID"], "req-123");
    assert_eq!(response.headers()["X-Content-Type-Options"], "nosniff");
}
