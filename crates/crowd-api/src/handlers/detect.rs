//! Single image person counting.

use axum::body::Bytes;
use axum::extract::{FromRequest, Multipart, Request, State};
use axum::http::header::CONTENT_TYPE;
use axum::Json;
use crowd_media::{decode_base64_image, decode_image, FrameClassifier};
use crowd_models::FrameClassification;
use image::RgbImage;
use serde::Deserialize;
use tracing::{debug, info};

use crate::error::{ApiError, ApiResult};
use crate::state::AppState;

const NO_IMAGE: &str = "No image data provided";
const INVALID_IMAGE: &str = "Invalid image";

/// JSON form of a detect request.
#[derive(Debug, Deserialize)]
pub struct DetectRequest {
    /// Base64 image, optionally as a `data:` URI
    pub image: Option<String>,
}

/// Count persons in one image.
///
/// Accepts `multipart/form-data` with an `image` file field, or JSON
/// `{"image": "data:image/jpeg;base64,..."}`.
pub async fn detect(
    State(state): State<AppState>,
    request: Request,
) -> ApiResult<Json<FrameClassification>> {
    if !state.classifier.is_available() {
        return Err(ApiError::ModelNotLoaded);
    }

    let frame = if is_multipart(&request) {
        let multipart = Multipart::from_request(request, &state)
            .await
            .map_err(|e| ApiError::bad_request(e.body_text()))?;
        image_from_multipart(multipart).await?
    } else {
        let body = Bytes::from_request(request, &state)
            .await
            .map_err(|e| ApiError::bad_request(e.body_text()))?;
        image_from_json(&body)?
    };

    let (width, height) = frame.dimensions();
    let result = classify(state.classifier.clone(), frame).await?;

    info!(
        width,
        height,
        count = result.count,
        level = %result.level,
        "Image classified"
    );
    Ok(Json(result))
}

fn is_multipart(request: &Request) -> bool {
    request
        .headers()
        .get(CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .map(|ct| ct.starts_with("multipart/form-data"))
        .unwrap_or(false)
}

async fn image_from_multipart(mut multipart: Multipart) -> ApiResult<RgbImage> {
    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| ApiError::bad_request(format!("Failed to read multipart field: {e}")))?
    {
        if field.name() != Some("image") {
            continue;
        }
        let bytes = field
            .bytes()
            .await
            .map_err(|e| ApiError::bad_request(format!("Failed to read image: {e}")))?;
        if bytes.is_empty() {
            return Err(ApiError::bad_request(NO_IMAGE));
        }
        return decode_image(&bytes).map_err(|e| {
            debug!("Image decode failed: {}", e);
            ApiError::bad_request(INVALID_IMAGE)
        });
    }
    Err(ApiError::bad_request(NO_IMAGE))
}

fn image_from_json(body: &[u8]) -> ApiResult<RgbImage> {
    let request: DetectRequest =
        serde_json::from_slice(body).map_err(|_| ApiError::bad_request(NO_IMAGE))?;
    let data = request
        .image
        .filter(|s| !s.trim().is_empty())
        .ok_or_else(|| ApiError::bad_request(NO_IMAGE))?;

    decode_base64_image(&data).map_err(|e| {
        debug!("Image decode failed: {}", e);
        ApiError::bad_request(INVALID_IMAGE)
    })
}

async fn classify(classifier: FrameClassifier, frame: RgbImage) -> ApiResult<FrameClassification> {
    let result = tokio::task::spawn_blocking(move || classifier.classify(frame))
        .await
        .map_err(|e| ApiError::internal(format!("classification task failed: {e}")))?;
    Ok(result?)
}
