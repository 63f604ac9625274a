//! Wire models for the mediagate HTTP API.
//!
//! Requests are plain JSON objects (or query strings for the browser-friendly
//! `GET /videos/download`):
//!
//! ```json
//! { "url": "https://www.youtube.com/watch?v=dQw4w9WgXcQ", "format_id": "22" }
//! ```
//!
//! `POST /videos/formats` answers with a [`crate::catalog::VideoInfo`]; the
//! task endpoints answer with [`TaskAccepted`] and [`TaskSnapshot`]. Every
//! failure is an [`ErrorResponse`] carrying one of the stable service codes.

use serde::{Deserialize, Serialize};

use crate::tasks::{DownloadTask, TaskPhase, TaskStatus};

#[derive(Debug, Deserialize, Clone)]
pub struct FormatsRequest {
    pub url: String,
}

#[derive(Debug, Deserialize, Clone)]
pub struct DownloadRequest {
    pub url: String,
    pub format_id: String,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub struct TaskAccepted {
    pub task_id: String,
}

/// Client view of a tracked download. Filesystem paths are not exposed.
#[derive(Debug, Serialize, Clone)]
pub struct TaskSnapshot {
    pub task_id: String,
    pub status: TaskStatus,
    pub phase: TaskPhase,
    pub progress: f64,
    pub speed: String,
    pub eta: String,
    pub filename: String,
    pub content_type: String,
    pub file_size: u64,
    pub downloaded_bytes: u64,
    pub total_bytes: u64,
    pub error: Option<String>,
    pub created_at: chrono::DateTime<chrono::Utc>,
}

impl From<&DownloadTask> for TaskSnapshot {
    fn from(task: &DownloadTask) -> Self {
        Self {
            task_id: task.task_id.clone(),
            status: task.status,
            phase: task.phase,
            progress: (task.progress * 10.0).round() / 10.0,
            speed: task.speed.clone(),
            eta: task.eta.clone(),
            filename: task.filename.clone(),
            content_type: task.content_type.clone(),
            file_size: task.file_size,
            downloaded_bytes: task.downloaded_bytes,
            total_bytes: task.total_bytes,
            error: task.error.clone(),
            created_at: task.created_at,
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
}

#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub code: &'static str,
    pub message: String,
}
