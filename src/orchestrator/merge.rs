use std::path::{Path, PathBuf};
use std::process::{ExitStatus, Stdio};
use std::sync::Arc;
use std::time::Duration;

use tempfile::TempDir;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::Child;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use super::Orchestrator;
use crate::engine::progress::ProgressTracker;
use crate::engine::stderr::{self, STDERR_CAP, StderrTail};
use crate::error::{Result, ServiceError, excerpt};
use crate::tasks::{TaskRegistry, remove_temp_dir};
use crate::url_gate::log_safe;

const TEMP_DIR_PREFIX: &str = "ytdl_";
/// How long the progress reader may lag behind process exit.
const READER_GRACE: Duration = Duration::from_secs(5);
const LOGGED_STDERR_CHARS: usize = 500;

/// Merged output produced by the engine. The caller owns `temp_dir` and must
/// remove it once the file has been delivered.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MergedFile {
    pub path: PathBuf,
    pub temp_dir: PathBuf,
    pub size: u64,
}

impl MergedFile {
    pub fn cleanup(&self) {
        remove_temp_dir(&self.temp_dir);
    }
}

fn timeout_message(limit: Duration) -> String {
    let secs = limit.as_secs();
    let span = if secs % 3600 == 0 {
        format!("{}-hour", secs / 3600)
    } else if secs % 60 == 0 {
        format!("{}-minute", secs / 60)
    } else {
        format!("{secs}-second")
    };
    format!("Download timed out ({span} limit)")
}

fn new_temp_dir() -> Result<TempDir> {
    tempfile::Builder::new()
        .prefix(TEMP_DIR_PREFIX)
        .tempdir()
        .map_err(|e| ServiceError::extraction("Failed to create temp dir", e))
}

/// `{dir}/{12 hex chars}.%(ext)s`
fn output_template(dir: &Path) -> PathBuf {
    let id = Uuid::new_v4().simple().to_string();
    dir.join(format!("{}.%(ext)s", &id[..12]))
}

/// The single visible file the engine left in `dir`, if any.
async fn find_output(dir: &Path) -> std::io::Result<Option<(PathBuf, u64)>> {
    let mut entries = tokio::fs::read_dir(dir).await?;
    let mut found: Vec<(PathBuf, u64)> = Vec::new();
    while let Some(entry) = entries.next_entry().await? {
        if entry.file_name().to_string_lossy().starts_with('.') {
            continue;
        }
        let meta = entry.metadata().await?;
        if meta.is_file() {
            found.push((entry.path(), meta.len()));
        }
    }
    found.sort();
    Ok(found.into_iter().next())
}

enum Waited {
    Exited(ExitStatus),
    TimedOut,
}

async fn wait_with_limit(child: &mut Child, limit: Duration) -> Result<Waited> {
    match tokio::time::timeout(limit, child.wait()).await {
        Ok(status) => status
            .map(Waited::Exited)
            .map_err(|e| ServiceError::extraction("Failed to wait for extraction engine", e)),
        Err(_) => {
            if let Err(err) = child.kill().await {
                warn!(error = %err, "Failed to kill timed out engine process");
            }
            Ok(Waited::TimedOut)
        }
    }
}

impl Orchestrator {
    /// Download a merged selection into a fresh temp directory and wait for it.
    pub async fn download_merged_to_file(&self, url: &str, format_id: &str) -> Result<MergedFile> {
        let url = self.validate_request(url, format_id)?;
        let safe_url = log_safe(&url);
        let limit = Duration::from_secs(self.engine.config().merge_timeout_secs);

        // Removed on drop unless handed to the caller
        let temp_dir = new_temp_dir()?;
        let commands = self.engine.commands();
        let args = commands.merge_args(&url, format_id, &output_template(temp_dir.path()), false);
        let mut command = commands.command(&args);
        command.stdout(Stdio::null()).stderr(Stdio::piped());

        info!(url = %safe_url, format_id, "Merged download started");
        let mut child = command
            .spawn()
            .map_err(|e| ServiceError::extraction("Failed to start extraction engine", e))?;
        let stderr_task = child
            .stderr
            .take()
            .map(|pipe| tokio::spawn(stderr::drain(pipe, STDERR_CAP)));

        let waited = wait_with_limit(&mut child, limit).await?;
        let status = match waited {
            Waited::Exited(status) => status,
            Waited::TimedOut => {
                // Grandchildren may still hold stderr open
                if let Some(task) = stderr_task {
                    task.abort();
                }
                warn!(url = %safe_url, limit_secs = limit.as_secs(), "Merged download timed out");
                return Err(ServiceError::ExtractionFailed(timeout_message(limit)));
            }
        };
        let tail = match stderr_task {
            Some(task) => task.await.unwrap_or_else(|_| StderrTail::new(0)),
            None => StderrTail::new(0),
        };

        if !status.success() {
            let stderr_text = tail.to_string_lossy();
            let logged: String = stderr_text.trim().chars().take(LOGGED_STDERR_CHARS).collect();
            error!(url = %safe_url, code = ?status.code(), stderr = %logged, "Merged download failed");
            return Err(ServiceError::ExtractionFailed(format!(
                "Download failed: {}",
                excerpt(stderr_text.trim())
            )));
        }

        let Some((path, size)) = find_output(temp_dir.path())
            .await
            .map_err(|e| ServiceError::extraction("Failed to inspect download output", e))?
        else {
            return Err(ServiceError::ExtractionFailed(
                "Download produced no output file".to_string(),
            ));
        };

        let temp_dir = temp_dir.keep();
        info!(url = %safe_url, bytes = size, "Merged download complete");
        Ok(MergedFile {
            path,
            temp_dir,
            size,
        })
    }

    /// Validate, mark the task as downloading and run the tracked download on
    /// a background task. Returns as soon as the process has been scheduled.
    pub fn start_tracked_merge_download(
        self: &Arc<Self>,
        url: &str,
        format_id: &str,
        task_id: &str,
    ) -> Result<()> {
        let url = self.admit_tracked(url, format_id, task_id)?;

        let this = Arc::clone(self);
        let format_id = format_id.to_string();
        let task_id = task_id.to_string();
        tokio::spawn(async move {
            this.run_tracked(&url, &format_id, &task_id).await;
        });
        Ok(())
    }

    /// Same as [`Orchestrator::start_tracked_merge_download`] but runs to
    /// completion on the current task.
    pub async fn download_merged_with_progress(&self, url: &str, format_id: &str, task_id: &str) -> Result<()> {
        let url = self.admit_tracked(url, format_id, task_id)?;
        self.run_tracked(&url, format_id, task_id).await;
        Ok(())
    }

    fn admit_tracked(&self, url: &str, format_id: &str, task_id: &str) -> Result<String> {
        if self.tasks.get(task_id).is_none() {
            return Err(ServiceError::NotFound(format!("Download task '{task_id}' not found")));
        }
        match self.validate_request(url, format_id) {
            Ok(url) => Ok(url),
            Err(err) => {
                self.tasks.update(task_id, |t| t.fail(err.message()));
                Err(err)
            }
        }
    }

    async fn run_tracked(&self, url: &str, format_id: &str, task_id: &str) {
        let safe_url = log_safe(url);
        let tracker = ProgressTracker::new(format_id);
        self.tasks.update(task_id, |t| t.start(tracker.initial_phase()));

        let temp_dir = match new_temp_dir() {
            Ok(dir) => dir,
            Err(err) => {
                self.tasks.update(task_id, |t| t.fail(err.message()));
                return;
            }
        };

        let commands = self.engine.commands();
        let args = commands.merge_args(url, format_id, &output_template(temp_dir.path()), true);
        let mut command = commands.command(&args);
        command.stdout(Stdio::piped()).stderr(Stdio::null());

        info!(url = %safe_url, format_id, task_id, "Progress-tracked download started");
        let mut child = match command.spawn() {
            Ok(child) => child,
            Err(err) => {
                error!(url = %safe_url, task_id, error = %err, "Failed to start extraction engine");
                self.tasks.update(task_id, |t| t.fail("Download failed"));
                return;
            }
        };

        let reader = child.stdout.take().map(|stdout| {
            let registry = Arc::clone(&self.tasks);
            let task_id = task_id.to_string();
            tokio::spawn(read_progress(stdout, registry, task_id, tracker))
        });

        let limit = Duration::from_secs(self.engine.config().merge_timeout_secs);
        let waited = wait_with_limit(&mut child, limit).await;

        if let Some(reader) = reader {
            if tokio::time::timeout(READER_GRACE, reader).await.is_err() {
                debug!(task_id, "Progress reader still running after engine exit");
            }
        }

        let failure = match waited {
            Ok(Waited::Exited(status)) if status.success() => None,
            Ok(Waited::Exited(status)) => {
                error!(url = %safe_url, task_id, code = ?status.code(), "Progress download failed");
                Some("Download failed".to_string())
            }
            Ok(Waited::TimedOut) => {
                warn!(url = %safe_url, task_id, "Progress download timed out");
                Some(timeout_message(limit))
            }
            Err(err) => Some(err.message().to_string()),
        };

        if let Some(message) = failure {
            drop(temp_dir);
            self.tasks.update(task_id, |t| t.fail(message));
            return;
        }

        let (path, size) = match find_output(temp_dir.path()).await {
            Ok(Some(found)) => found,
            Ok(None) | Err(_) => {
                drop(temp_dir);
                self.tasks.update(task_id, |t| t.fail("Download produced no output"));
                return;
            }
        };

        let dir = temp_dir.keep();
        let completed = self
            .tasks
            .update(task_id, |t| t.complete(path.clone(), dir.clone(), size));
        if completed == Some(true) {
            info!(url = %safe_url, task_id, bytes = size, "Progress download complete");
        } else {
            // Task vanished or was already finalized; nobody will collect the file
            remove_temp_dir(&dir);
        }
    }
}

async fn read_progress(
    stdout: tokio::process::ChildStdout,
    registry: Arc<TaskRegistry>,
    task_id: String,
    mut tracker: ProgressTracker,
) {
    let mut lines = BufReader::new(stdout).lines();
    while let Ok(Some(line)) = lines.next_line().await {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        registry.update(&task_id, |task| tracker.apply(line, task));
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::super::testing::{OUTPUT_PRELUDE, fake_engine, fake_engine_with};
    use super::*;
    use crate::tasks::{TaskPhase, TaskStatus};

    const URL: &str = "https://video.example.com/watch?v=1";
    const MERGED: &str = "137+140";

    #[test]
    fn test_timeout_message() {
        assert_eq!(
            timeout_message(Duration::from_secs(3600)),
            "Download timed out (1-hour limit)"
        );
        assert_eq!(timeout_message(Duration::from_secs(120)), "Download timed out (2-minute limit)");
        assert_eq!(timeout_message(Duration::from_secs(5)), "Download timed out (5-second limit)");
    }

    #[tokio::test]
    async fn test_merged_to_file_returns_single_output() {
        let script = format!("{OUTPUT_PRELUDE}printf 'merged' > \"$out\"\ntouch \"$(dirname \"$out\")/.hidden\"\n");
        let (_dir, orchestrator) = fake_engine(&script);

        let merged = orchestrator.download_merged_to_file(URL, MERGED).await.unwrap();
        assert_eq!(merged.size, 6);
        assert_eq!(merged.path.extension().and_then(|e| e.to_str()), Some("mp4"));
        assert!(merged.temp_dir.file_name().unwrap().to_string_lossy().starts_with("ytdl_"));
        assert_eq!(std::fs::read(&merged.path).unwrap(), b"merged");

        merged.cleanup();
        assert!(!merged.temp_dir.exists());
    }

    #[tokio::test]
    async fn test_merged_to_file_failure_carries_stderr() {
        let (_dir, orchestrator) = fake_engine("echo 'ERROR: ffmpeg not found' >&2\nexit 1\n");
        let err = orchestrator.download_merged_to_file(URL, MERGED).await.unwrap_err();
        assert_eq!(
            err,
            ServiceError::ExtractionFailed("Download failed: ERROR: ffmpeg not found".to_string())
        );
    }

    #[tokio::test]
    async fn test_merged_to_file_without_output() {
        let (_dir, orchestrator) = fake_engine("exit 0\n");
        let err = orchestrator.download_merged_to_file(URL, MERGED).await.unwrap_err();
        assert_eq!(err.message(), "Download produced no output file");
    }

    #[tokio::test]
    async fn test_merged_to_file_timeout_kills_engine() {
        let (_dir, orchestrator) =
            fake_engine_with("exec sleep 30\n", |c| c.engine.merge_timeout_secs = 1);
        let started = std::time::Instant::now();
        let err = orchestrator.download_merged_to_file(URL, MERGED).await.unwrap_err();
        assert_eq!(err.message(), "Download timed out (1-second limit)");
        assert!(started.elapsed() < Duration::from_secs(20));
    }

    #[tokio::test]
    async fn test_tracked_download_completes() {
        let script = format!(
            "{OUTPUT_PRELUDE}\
echo '[download] Destination: video.f137.mp4'
echo '[download]  50.0% of 10.00MiB at 1.00MiB/s ETA 00:05'
echo '[download] 100.0% of 10.00MiB at 1.00MiB/s ETA 00:00'
echo '[download] Destination: audio.f140.m4a'
echo '[download] 100.0% of 1.00MiB at 1.00MiB/s ETA 00:00'
echo '[Merger] Merging formats into \"out.mp4\"'
printf 'final' > \"$out\"
exit 0
"
        );
        let (_dir, orchestrator) = fake_engine(&script);
        orchestrator.create_task("t1", "Clip.mp4", "video/mp4");

        orchestrator
            .download_merged_with_progress(URL, MERGED, "t1")
            .await
            .unwrap();

        let task = orchestrator.get_task("t1").unwrap();
        assert_eq!(task.status, TaskStatus::Completed);
        assert_eq!(task.progress, 100.0);
        assert_eq!(task.phase, TaskPhase::Merge);
        assert_eq!(task.file_size, 5);
        assert_eq!(task.total_bytes, 11 * 1024 * 1024);
        assert!(task.speed.is_empty());

        let dir = task.temp_dir.clone().unwrap();
        assert!(dir.exists());
        assert!(task.file_path.unwrap().starts_with(&dir));
        remove_temp_dir(&dir);
    }

    #[tokio::test]
    async fn test_tracked_download_failure_marks_task() {
        let (_dir, orchestrator) = fake_engine("echo '[download]  10.0%'\nexit 2\n");
        orchestrator.create_task("t1", "Clip.mp4", "video/mp4");

        orchestrator
            .download_merged_with_progress(URL, "22", "t1")
            .await
            .unwrap();

        let task = orchestrator.get_task("t1").unwrap();
        assert_eq!(task.status, TaskStatus::Failed);
        assert_eq!(task.error.as_deref(), Some("Download failed"));
        assert!(task.temp_dir.is_none());
    }

    #[tokio::test]
    async fn test_tracked_download_rejects_bad_selector() {
        let (_dir, orchestrator) = fake_engine("exit 0\n");
        orchestrator.create_task("t1", "Clip.mp4", "video/mp4");

        let err = orchestrator
            .start_tracked_merge_download(URL, "137+140 --exec x", "t1")
            .unwrap_err();
        assert_eq!(err.code(), "INVALID_URL");

        let task = orchestrator.get_task("t1").unwrap();
        assert_eq!(task.status, TaskStatus::Failed);
        assert_eq!(task.error.as_deref(), Some("Invalid format_id"));
    }

    #[tokio::test]
    async fn test_background_tracked_download() {
        let script = format!("{OUTPUT_PRELUDE}printf 'x' > \"$out\"\n");
        let (_dir, orchestrator) = fake_engine(&script);
        orchestrator.create_task("bg", "Clip.mp4", "video/mp4");
        orchestrator.start_tracked_merge_download(URL, MERGED, "bg").unwrap();

        let mut status = TaskStatus::Pending;
        for _ in 0..100 {
            status = orchestrator.get_task("bg").unwrap().status;
            if status.is_terminal() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(50)).await;
        }
        assert_eq!(status, TaskStatus::Completed);

        let task = orchestrator.remove_task("bg").unwrap();
        remove_temp_dir(&task.temp_dir.unwrap());
    }

    #[tokio::test]
    async fn test_unknown_task_is_rejected() {
        let (_dir, orchestrator) = fake_engine("exit 0\n");
        let err = orchestrator
            .start_tracked_merge_download(URL, MERGED, "nope")
            .unwrap_err();
        assert_eq!(err.code(), "NOT_FOUND");
    }
}
