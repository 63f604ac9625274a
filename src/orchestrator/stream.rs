use std::io;
use std::process::Stdio;

use bytes::Bytes;
use futures::Stream;
use tokio::io::AsyncReadExt;
use tokio::process::{Child, ChildStdout};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::{CancellationToken, DropGuard};
use tracing::{debug, error, info};

use super::Orchestrator;
use crate::engine::stderr::{self, STDERR_CAP, StderrTail};
use crate::error::{Result, ServiceError};
use crate::url_gate::log_safe;

/// How a piped engine run ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamOutcome {
    pub exit_code: Option<i32>,
    /// The consumer went away or cancelled before EOF.
    pub cancelled: bool,
}

/// Live byte stream from an engine process writing to stdout.
///
/// Dropping the handle (or the stream from [`MediaStream::into_stream`])
/// terminates and reaps the process.
pub struct MediaStream {
    rx: mpsc::Receiver<io::Result<Bytes>>,
    cancel: CancellationToken,
    guard: DropGuard,
    supervisor: JoinHandle<StreamOutcome>,
}

impl MediaStream {
    pub async fn next_chunk(&mut self) -> Option<io::Result<Bytes>> {
        self.rx.recv().await
    }

    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    /// Cancel the download and wait until the process has been reaped.
    pub async fn cancel_and_wait(self) -> StreamOutcome {
        let MediaStream {
            rx,
            guard,
            supervisor,
            ..
        } = self;
        drop(guard);
        drop(rx);
        supervisor.await.unwrap_or(StreamOutcome {
            exit_code: None,
            cancelled: true,
        })
    }

    /// Wait for EOF, discarding remaining output, and report how the run ended.
    pub async fn finish(mut self) -> StreamOutcome {
        while self.rx.recv().await.is_some() {}
        let MediaStream { guard, supervisor, .. } = self;
        let outcome = supervisor.await.unwrap_or(StreamOutcome {
            exit_code: None,
            cancelled: true,
        });
        drop(guard);
        outcome
    }

    /// Adapt into a `Stream` suitable for an HTTP response body.
    pub fn into_stream(self) -> impl Stream<Item = io::Result<Bytes>> + Send + 'static {
        let MediaStream { rx, guard, .. } = self;
        futures::stream::unfold((rx, guard), |(mut rx, guard)| async move {
            rx.recv().await.map(|chunk| (chunk, (rx, guard)))
        })
    }
}

impl Orchestrator {
    /// Start a single-stream download piped from the engine's stdout.
    pub async fn open_stream(&self, url: &str, format_id: &str) -> Result<MediaStream> {
        let url = self.validate_request(url, format_id)?;
        let config = self.engine.config();

        let commands = self.engine.commands();
        let args = commands.stream_args(&url, format_id);
        let mut command = commands.command(&args);
        command.stdout(Stdio::piped()).stderr(Stdio::piped());

        let mut child = command
            .spawn()
            .map_err(|e| ServiceError::extraction("Failed to start extraction engine", e))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| ServiceError::Internal("engine stdout was not captured".to_string()))?;
        let stderr_pipe = child
            .stderr
            .take()
            .ok_or_else(|| ServiceError::Internal("engine stderr was not captured".to_string()))?;

        let safe_url = log_safe(&url);
        info!(url = %safe_url, format_id, pid = ?child.id(), "Streaming download started");

        let stderr_task = tokio::spawn(stderr::drain(stderr_pipe, STDERR_CAP));
        let (tx, rx) = mpsc::channel(config.stream_channel_capacity.max(1));
        let cancel = CancellationToken::new();

        let supervisor = tokio::spawn(pump(
            child,
            stdout,
            stderr_task,
            tx,
            config.stream_chunk_size.as_usize(),
            cancel.clone(),
            safe_url,
        ));

        Ok(MediaStream {
            rx,
            guard: cancel.clone().drop_guard(),
            cancel,
            supervisor,
        })
    }
}

async fn pump(
    mut child: Child,
    mut stdout: ChildStdout,
    stderr_task: JoinHandle<StderrTail>,
    tx: mpsc::Sender<io::Result<Bytes>>,
    chunk_size: usize,
    cancel: CancellationToken,
    safe_url: String,
) -> StreamOutcome {
    let mut buf = vec![0u8; chunk_size];
    let mut cancelled = false;
    let mut sent: u64 = 0;

    loop {
        let read = tokio::select! {
            _ = cancel.cancelled() => {
                cancelled = true;
                break;
            }
            read = stdout.read(&mut buf) => read,
        };

        match read {
            Ok(0) => break,
            Ok(n) => {
                let chunk = Bytes::copy_from_slice(&buf[..n]);
                let delivered = tokio::select! {
                    _ = cancel.cancelled() => false,
                    res = tx.send(Ok(chunk)) => res.is_ok(),
                };
                if !delivered {
                    cancelled = true;
                    break;
                }
                sent += n as u64;
            }
            Err(err) => {
                error!(url = %safe_url, error = %err, "Reading engine output failed");
                let _ = tx.send(Err(err)).await;
                cancelled = true;
                break;
            }
        }
    }
    drop(tx);

    if cancelled {
        debug!(url = %safe_url, "Terminating engine process");
        let _ = child.start_kill();
    }
    drop(stdout);

    let status = child.wait().await;
    let tail = stderr_task.await.unwrap_or_else(|_| StderrTail::new(0));
    let exit_code = status.as_ref().ok().and_then(|s| s.code());

    match status {
        Ok(status) if status.success() => {
            info!(url = %safe_url, bytes = sent, "Streaming download finished");
        }
        Ok(status) if !cancelled => {
            error!(
                url = %safe_url,
                code = ?status.code(),
                stderr = %tail.to_string_lossy(),
                "Extraction engine exited with failure"
            );
        }
        Ok(_) => debug!(url = %safe_url, bytes = sent, "Streaming download cancelled"),
        Err(err) => error!(url = %safe_url, error = %err, "Failed to reap engine process"),
    }

    StreamOutcome {
        exit_code,
        cancelled,
    }
}
