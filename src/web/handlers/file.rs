use axum::{
    extract::{DefaultBodyLimit, Multipart, Path, State},
    http::header,
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use serde::Serialize;
use std::path::Path as FsPath;
use std::sync::Arc;
use tracing::info;

use crate::schedule::TaskStatus;
use crate::utils::http::{attachment_disposition, content_type_for, is_plain_file_name};
use crate::web::error::ApiError;
use crate::web::upload::{UploadForm, DOCUMENT_UPLOAD};
use crate::AppContext;

pub fn file_router(ctx: Arc<AppContext>) -> Router {
    Router::new()
        .route("/convert", post(convert_file))
        .route("/status/:task_id", get(task_status))
        .route("/download/:file_id", get(download_file))
        // leave room for the multipart framing around a full-size document
        .layer(DefaultBodyLimit::max(DOCUMENT_UPLOAD.max_bytes + 1024 * 1024))
        .with_state(ctx)
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct ConvertResponse {
    success: bool,
    message: String,
    task_id: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct StatusResponse {
    success: bool,
    status: TaskStatus,
    progress: u8,
    message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    download_url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
}

// Accept a document and start converting it in the background
async fn convert_file(
    State(ctx): State<Arc<AppContext>>,
    mut multipart: Multipart,
) -> Result<Json<ConvertResponse>, ApiError> {
    let mut form = UploadForm::parse(&mut multipart, &ctx.config.temp_dir(), &[("file", DOCUMENT_UPLOAD)]).await?;

    let Some(file) = form.take_file("file") else {
        return Err(ApiError::BadRequest("No file was uploaded".to_string()));
    };
    let Some(target_format) = form.field("targetFormat").map(|f| f.to_ascii_lowercase()) else {
        file.discard().await;
        return Err(ApiError::BadRequest("Target format is required".to_string()));
    };

    let task_id = match ctx
        .scheduler
        .submit(file.path.clone(), file.original_name.clone(), target_format.clone())
        .await
    {
        Ok(task_id) => task_id,
        Err(e) => {
            file.discard().await;
            return Err(ApiError::BadRequest(e.to_string()));
        }
    };

    info!(
        "Task {} converting {} ({} bytes) to {}",
        task_id, file.original_name, file.size, target_format
    );
    Ok(Json(ConvertResponse {
        success: true,
        message: "File received, conversion started".to_string(),
        task_id,
    }))
}

async fn task_status(
    State(ctx): State<Arc<AppContext>>,
    Path(task_id): Path<String>,
) -> Result<Json<StatusResponse>, ApiError> {
    let task = ctx
        .task_manager
        .get(&task_id)
        .await
        .ok_or_else(|| ApiError::NotFound("Conversion task not found".to_string()))?;

    Ok(Json(StatusResponse {
        success: true,
        status: task.status,
        progress: task.progress,
        message: task.message,
        download_url: task.download_url,
        error: task.error,
    }))
}

async fn download_file(
    State(ctx): State<Arc<AppContext>>,
    Path(file_id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    if !is_plain_file_name(&file_id) {
        return Err(ApiError::BadRequest("Invalid file name".to_string()));
    }

    let path = ctx.config.processed_dir().join(&file_id);
    let bytes = match tokio::fs::read(&path).await {
        Ok(bytes) => bytes,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            return Err(ApiError::NotFound("File does not exist or has been removed".to_string()));
        }
        Err(e) => return Err(ApiError::internal("Failed to read file", e)),
    };

    let download_name = match ctx.task_manager.find_by_output(&file_id).await {
        Some(task) => renamed_download(&task.original_name, &file_id),
        None => file_id.clone(),
    };

    Ok((
        [
            (header::CONTENT_TYPE, content_type_for(&file_id)),
            (header::CONTENT_DISPOSITION, attachment_disposition(&download_name)),
        ],
        bytes,
    ))
}

/// The uploaded name with the extension of the produced file: `report.docx` + `x-1.txt` → `report.txt`.
fn renamed_download(original_name: &str, file_id: &str) -> String {
    let stem = FsPath::new(original_name)
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| "download".to_string());
    match FsPath::new(file_id).extension() {
        Some(ext) => format!("{}.{}", stem, ext.to_string_lossy()),
        None => stem,
    }
}
