use axum::{
    Json,
    body::{Body, Bytes},
    extract::{Path, Query, State, rejection::QueryRejection},
    http::{HeaderMap, StatusCode, header},
    response::{IntoResponse, Response},
};
use serde::de::DeserializeOwned;
use tracing::info;
use uuid::Uuid;

use super::{
    models::{DownloadRequest, FormatsRequest, HealthResponse, TaskAccepted, TaskSnapshot},
    state::AppState,
    utils::{content_disposition, file_body, parse_content_type},
    validation::{RequestValidationError, validate_download, validate_formats},
};
use crate::api::error::ApiError;
use crate::catalog::VideoInfo;
use crate::error::ServiceError;
use crate::tasks::TaskStatus;

const FORMAT_ID_HEADER: &str = "x-format-id";

pub async fn health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "healthy".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
    })
}

/// `POST {prefix}/videos/formats`
///
/// Resolve the catalog for a URL. Served from the result cache when a
/// previous call for the same normalized URL is still fresh.
pub async fn fetch_formats(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Json<VideoInfo>, ApiError> {
    let request: FormatsRequest = read_json(&headers, &body)?;
    let request = validate_formats(&request).map_err(invalid)?;

    let info = state.orchestrator.resolve(&request.url).await?;
    Ok(Json(VideoInfo::clone(&info)))
}

/// `POST {prefix}/videos/download`
///
/// Merged selectors are downloaded to a temp file first so the container is a
/// proper MP4; the response then carries `Content-Length`. Everything else is
/// piped straight from the engine's stdout.
pub async fn download_post(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Response, ApiError> {
    let request: DownloadRequest = read_json(&headers, &body)?;
    serve_download(&state, request).await
}

/// `GET {prefix}/videos/download?url=..&format_id=..` for browser navigation.
pub async fn download_get(
    State(state): State<AppState>,
    query: Result<Query<DownloadRequest>, QueryRejection>,
) -> Result<Response, ApiError> {
    let Query(request) = query.map_err(|e| ApiError::InvalidPayload(e.body_text()))?;
    serve_download(&state, request).await
}

async fn serve_download(state: &AppState, request: DownloadRequest) -> Result<Response, ApiError> {
    let request = validate_download(&request).map_err(invalid)?;
    let orchestrator = &state.orchestrator;

    let plan = orchestrator
        .plan_download(&request.url, &request.format_id)
        .await?;
    info!(filename = %plan.filename, format_id = %request.format_id, merged = plan.merged, "Streaming download");

    if plan.merged {
        let merged = orchestrator
            .download_merged_to_file(&request.url, &request.format_id)
            .await?;
        let chunk_size = orchestrator.engine_config().stream_chunk_size.as_usize();
        let body = file_body(&merged.path, merged.temp_dir.clone(), chunk_size).await?;
        return attachment(
            body,
            &plan.filename,
            &plan.content_type,
            Some(&request.format_id),
            Some(merged.size),
        );
    }

    let stream = orchestrator
        .open_stream(&request.url, &request.format_id)
        .await?;
    attachment(
        Body::from_stream(stream.into_stream()),
        &plan.filename,
        &plan.content_type,
        Some(&request.format_id),
        None,
    )
}

/// `POST {prefix}/videos/download/tasks`
///
/// Start a progress-tracked download and return its id right away. Clients
/// poll the task and fetch `/file` once it reports `completed`.
pub async fn create_download_task(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<impl IntoResponse, ApiError> {
    let request: DownloadRequest = read_json(&headers, &body)?;
    let request = validate_download(&request).map_err(invalid)?;
    let orchestrator = &state.orchestrator;

    let plan = orchestrator
        .plan_download(&request.url, &request.format_id)
        .await?;

    let task_id = Uuid::new_v4().to_string();
    orchestrator.create_task(&task_id, &plan.filename, &plan.content_type);
    if let Err(err) =
        orchestrator.start_tracked_merge_download(&request.url, &request.format_id, &task_id)
    {
        orchestrator.remove_task(&task_id);
        return Err(err.into());
    }

    info!(task_id = %task_id, format_id = %request.format_id, "Download task accepted");
    Ok((StatusCode::ACCEPTED, Json(TaskAccepted { task_id })))
}

pub async fn get_download_task(
    State(state): State<AppState>,
    Path(task_id): Path<String>,
) -> Result<Json<TaskSnapshot>, ApiError> {
    let task = state
        .orchestrator
        .get_task(&task_id)
        .ok_or_else(|| task_not_found(&task_id))?;
    Ok(Json(TaskSnapshot::from(&task)))
}

/// `GET {prefix}/videos/download/tasks/{id}/file`
///
/// Hands the finished file over exactly once: the task is removed before
/// streaming starts and its temp dir goes away with the response body.
pub async fn download_task_file(
    State(state): State<AppState>,
    Path(task_id): Path<String>,
) -> Result<Response, ApiError> {
    let orchestrator = &state.orchestrator;
    let task = orchestrator
        .get_task(&task_id)
        .ok_or_else(|| task_not_found(&task_id))?;
    if task.status != TaskStatus::Completed {
        return Err(ServiceError::NotFound("Download task not completed".to_string()).into());
    }

    let task = orchestrator
        .remove_task(&task_id)
        .ok_or_else(|| task_not_found(&task_id))?;
    let (Some(path), Some(temp_dir)) = (task.file_path.as_ref(), task.temp_dir.clone()) else {
        return Err(ServiceError::Internal(format!("completed task {task_id} has no file")).into());
    };

    let chunk_size = orchestrator.engine_config().stream_chunk_size.as_usize();
    let body = file_body(path, temp_dir, chunk_size).await?;
    attachment(
        body,
        &task.filename,
        &task.content_type,
        None,
        Some(task.file_size),
    )
}

pub async fn delete_download_task(
    State(state): State<AppState>,
    Path(task_id): Path<String>,
) -> Result<StatusCode, ApiError> {
    let task = state
        .orchestrator
        .remove_task(&task_id)
        .ok_or_else(|| task_not_found(&task_id))?;
    if let Some(dir) = &task.temp_dir {
        crate::tasks::remove_temp_dir(dir);
    }
    info!(task_id = %task_id, status = ?task.status, "Download task deleted");
    Ok(StatusCode::NO_CONTENT)
}

fn read_json<T: DeserializeOwned>(headers: &HeaderMap, body: &[u8]) -> Result<T, ApiError> {
    let content_type = headers
        .get(header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .ok_or_else(|| ApiError::InvalidPayload("missing Content-Type header".into()))?;
    parse_content_type(content_type)?;

    Ok(serde_json::from_slice(body)?)
}

fn invalid(err: RequestValidationError) -> ApiError {
    ApiError::InvalidPayload(err.to_string())
}

fn task_not_found(task_id: &str) -> ApiError {
    ServiceError::NotFound(format!("Download task '{task_id}' not found")).into()
}

fn attachment(
    body: Body,
    filename: &str,
    content_type: &str,
    format_id: Option<&str>,
    content_length: Option<u64>,
) -> Result<Response, ApiError> {
    let mut builder = Response::builder()
        .status(StatusCode::OK)
        .header(header::CONTENT_TYPE, content_type)
        .header(header::CONTENT_DISPOSITION, content_disposition(filename));
    if let Some(format_id) = format_id {
        builder = builder.header(FORMAT_ID_HEADER, format_id);
    }
    if let Some(length) = content_length {
        builder = builder.header(header::CONTENT_LENGTH, length);
    }

    builder
        .body(body)
        .map_err(|e| ServiceError::Internal(format!("Failed to build download response: {e}")).into())
}
