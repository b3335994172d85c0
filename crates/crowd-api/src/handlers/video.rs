//! Video analysis submission and status.

use std::path::Path as FsPath;

use axum::extract::{Multipart, Path, State};
use axum::Json;
use crowd_models::{TaskId, TaskRecord, TaskStatus};
use crowd_worker::VideoSubmission;
use serde::Serialize;
use tempfile::TempPath;
use tokio::io::AsyncWriteExt;
use tracing::{debug, info};

use crate::error::{ApiError, ApiResult};
use crate::state::AppState;

const MISSING_FIELDS: &str = "Missing video or busId";

/// Response to an accepted submission.
#[derive(Debug, Serialize)]
pub struct SubmitVideoResponse {
    pub task_id: TaskId,
    pub status: TaskStatus,
}

/// An upload streamed to disk.
struct StoredUpload {
    path: TempPath,
    filename: Option<String>,
    size: u64,
}

/// Accept a video for background analysis.
///
/// Multipart fields: `video` (file) and `busId` (text). The upload is written
/// to the work directory; the request returns once the task is registered.
pub async fn detect_video(
    State(state): State<AppState>,
    mut multipart: Multipart,
) -> ApiResult<Json<SubmitVideoResponse>> {
    if !state.classifier.is_available() {
        return Err(ApiError::ModelNotLoaded);
    }

    let mut upload: Option<StoredUpload> = None;
    let mut bus_id: Option<String> = None;

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| ApiError::bad_request(format!("Failed to read multipart field: {e}")))?
    {
        match field.name() {
            Some("video") => {
                let filename = field.file_name().map(|s| s.to_string());
                let stored = store_upload(
                    field,
                    &state.work_dir,
                    filename,
                    state.config.max_body_size as u64,
                )
                .await?;
                upload = Some(stored);
            }
            Some("busId") => {
                let text = field
                    .text()
                    .await
                    .map_err(|e| ApiError::bad_request(format!("Failed to read busId: {e}")))?;
                bus_id = Some(text.trim().to_string());
            }
            _ => {}
        }
    }

    let (Some(upload), Some(bus_id)) = (upload, bus_id.filter(|b| !b.is_empty())) else {
        return Err(ApiError::bad_request(MISSING_FIELDS));
    };
    if upload.size == 0 {
        return Err(ApiError::bad_request(MISSING_FIELDS));
    }

    let filename = upload.filename.clone();
    let size = upload.size;
    let task_id = state
        .executor
        .submit(VideoSubmission {
            bus_id: bus_id.clone(),
            filename: upload.filename,
            file_size: upload.size,
            video: upload.path,
        })
        .await?;

    info!(
        task_id = %task_id,
        bus_id = %bus_id,
        filename = filename.as_deref().unwrap_or(""),
        size,
        "Video analysis submitted"
    );

    Ok(Json(SubmitVideoResponse {
        task_id,
        status: TaskStatus::Processing,
    }))
}

/// Current record of an analysis task.
pub async fn video_status(
    State(state): State<AppState>,
    Path(task_id): Path<String>,
) -> ApiResult<Json<TaskRecord>> {
    let record = state.registry.read(&TaskId::from_string(task_id)).await?;
    debug!(
        task_id = %record.task_id,
        status = %record.status,
        progress = record.progress,
        "Status read"
    );
    Ok(Json(record))
}

/// Stream one multipart field into a temporary file in `work_dir`.
///
/// The file is removed when the returned path (or this future, on error) is
/// dropped.
async fn store_upload(
    mut field: axum::extract::multipart::Field<'_>,
    work_dir: &FsPath,
    filename: Option<String>,
    max_size: u64,
) -> ApiResult<StoredUpload> {
    let suffix = filename
        .as_deref()
        .and_then(|name| FsPath::new(name).extension())
        .and_then(|ext| ext.to_str())
        .filter(|ext| ext.len() <= 8 && ext.chars().all(|c| c.is_ascii_alphanumeric()))
        .map(|ext| format!(".{}", ext))
        .unwrap_or_default();

    let temp = tempfile::Builder::new()
        .prefix("upload-")
        .suffix(&suffix)
        .tempfile_in(work_dir)
        .map_err(|e| ApiError::internal(format!("Failed to create upload file: {e}")))?;
    let (file, path) = temp.into_parts();
    let mut file = tokio::fs::File::from_std(file);

    let mut size: u64 = 0;
    while let Some(chunk) = field
        .chunk()
        .await
        .map_err(|e| ApiError::bad_request(format!("Failed to read video chunk: {e}")))?
    {
        size += chunk.len() as u64;
        if size > max_size {
            return Err(ApiError::payload_too_large(format!(
                "Video exceeds maximum of {}MB",
                max_size / (1024 * 1024)
            )));
        }
        file.write_all(&chunk)
            .await
            .map_err(|e| ApiError::internal(format!("Failed to write upload: {e}")))?;
    }
    file.flush()
        .await
        .map_err(|e| ApiError::internal(format!("Failed to write upload: {e}")))?;

    Ok(StoredUpload {
        path,
        filename,
        size,
    })
}
