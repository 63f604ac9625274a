//! In-memory registry of tracked merge downloads.
//!
//! A task is created by the caller, driven forward by the progress reader of
//! the engine process, and polled by clients until they fetch the file. The
//! lifecycle only moves forward:
//!
//! ```text
//! pending -> downloading -> merging -> completed
//!               |             |
//!               +-> completed +-> failed
//!               +-> failed
//! pending -> failed
//! ```

use std::collections::HashMap;
use std::path::PathBuf;
use std::time::Duration;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::Serialize;
use tracing::{debug, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskStatus {
    Pending,
    Downloading,
    Merging,
    Completed,
    Failed,
}

impl TaskStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, TaskStatus::Completed | TaskStatus::Failed)
    }

    pub fn can_transition_to(self, next: TaskStatus) -> bool {
        use TaskStatus::*;
        matches!(
            (self, next),
            (Pending, Downloading)
                | (Pending, Failed)
                | (Downloading, Merging)
                | (Downloading, Completed)
                | (Downloading, Failed)
                | (Merging, Completed)
                | (Merging, Failed)
        )
    }
}

/// Which stream the engine is currently fetching.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskPhase {
    #[default]
    #[serde(rename = "")]
    Idle,
    Video,
    Audio,
    Merge,
}

#[derive(Debug, Clone)]
pub struct DownloadTask {
    pub task_id: String,
    pub status: TaskStatus,
    pub phase: TaskPhase,
    pub progress: f64,
    pub speed: String,
    pub eta: String,
    pub file_path: Option<PathBuf>,
    pub temp_dir: Option<PathBuf>,
    pub filename: String,
    pub content_type: String,
    pub file_size: u64,
    pub downloaded_bytes: u64,
    pub total_bytes: u64,
    pub error: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl DownloadTask {
    pub fn new(task_id: &str, filename: &str, content_type: &str) -> Self {
        Self {
            task_id: task_id.to_string(),
            status: TaskStatus::Pending,
            phase: TaskPhase::Idle,
            progress: 0.0,
            speed: String::new(),
            eta: String::new(),
            file_path: None,
            temp_dir: None,
            filename: filename.to_string(),
            content_type: content_type.to_string(),
            file_size: 0,
            downloaded_bytes: 0,
            total_bytes: 0,
            error: None,
            created_at: Utc::now(),
        }
    }

    fn transition(&mut self, next: TaskStatus) -> bool {
        if self.status == next {
            return true;
        }
        if !self.status.can_transition_to(next) {
            debug!(task_id = %self.task_id, from = ?self.status, to = ?next, "Ignoring invalid task transition");
            return false;
        }
        self.status = next;
        true
    }

    pub fn start(&mut self, phase: TaskPhase) -> bool {
        if !self.transition(TaskStatus::Downloading) {
            return false;
        }
        self.phase = phase;
        true
    }

    /// Raise progress; a lower value than the current one is ignored.
    pub fn advance(&mut self, progress: f64) {
        if self.status.is_terminal() {
            return;
        }
        let progress = progress.clamp(0.0, 100.0);
        if progress > self.progress {
            self.progress = progress;
        }
    }

    pub fn begin_merge(&mut self, progress: f64) -> bool {
        if !self.transition(TaskStatus::Merging) {
            return false;
        }
        self.phase = TaskPhase::Merge;
        self.advance(progress);
        self.speed.clear();
        self.eta.clear();
        true
    }

    pub fn complete(&mut self, file_path: PathBuf, temp_dir: PathBuf, file_size: u64) -> bool {
        if !self.transition(TaskStatus::Completed) {
            return false;
        }
        self.file_path = Some(file_path);
        self.temp_dir = Some(temp_dir);
        self.file_size = file_size;
        self.progress = 100.0;
        self.speed.clear();
        self.eta.clear();
        true
    }

    pub fn fail(&mut self, message: impl Into<String>) -> bool {
        if !self.transition(TaskStatus::Failed) {
            return false;
        }
        self.error = Some(message.into());
        self.speed.clear();
        self.eta.clear();
        true
    }

    pub fn age(&self, now: DateTime<Utc>) -> Duration {
        (now - self.created_at).to_std().unwrap_or_default()
    }
}

/// Process-wide task table guarded by a single lock.
#[derive(Default)]
pub struct TaskRegistry {
    tasks: Mutex<HashMap<String, DownloadTask>>,
}

impl TaskRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn create(&self, task_id: &str, filename: &str, content_type: &str) -> DownloadTask {
        let task = DownloadTask::new(task_id, filename, content_type);
        self.tasks.lock().insert(task_id.to_string(), task.clone());
        debug!(task_id, filename, "Download task created");
        task
    }

    /// Current state of a task.
    pub fn get(&self, task_id: &str) -> Option<DownloadTask> {
        self.tasks.lock().get(task_id).cloned()
    }

    /// Apply `f` to a task under the registry lock.
    pub fn update<R>(&self, task_id: &str, f: impl FnOnce(&mut DownloadTask) -> R) -> Option<R> {
        self.tasks.lock().get_mut(task_id).map(f)
    }

    /// Drop a task from the table. Its temp directory is left to the caller.
    pub fn remove(&self, task_id: &str) -> Option<DownloadTask> {
        self.tasks.lock().remove(task_id)
    }

    pub fn len(&self) -> usize {
        self.tasks.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Remove tasks older than `max_age` and delete their temp directories.
    pub fn sweep_stale(&self, max_age: Duration) -> usize {
        self.sweep_stale_at(max_age, Utc::now())
    }

    fn sweep_stale_at(&self, max_age: Duration, now: DateTime<Utc>) -> usize {
        let stale: Vec<DownloadTask> = {
            let mut tasks = self.tasks.lock();
            let ids: Vec<String> = tasks
                .values()
                .filter(|task| task.age(now) > max_age)
                .map(|task| task.task_id.clone())
                .collect();
            ids.iter().filter_map(|id| tasks.remove(id)).collect()
        };

        for task in &stale {
            if let Some(dir) = &task.temp_dir {
                remove_temp_dir(dir);
            }
        }

        if !stale.is_empty() {
            info!(removed = stale.len(), "Swept stale download tasks");
        }
        stale.len()
    }
}

/// Best-effort recursive delete; a directory that is already gone is fine.
pub fn remove_temp_dir(dir: &std::path::Path) {
    match std::fs::remove_dir_all(dir) {
        Ok(()) => debug!(path = %dir.display(), "Removed temp dir"),
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => {}
        Err(err) => warn!(path = %dir.display(), error = %err, "Failed to remove temp dir"),
    }
}
