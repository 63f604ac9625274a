//! Line classifier for the engine's `--newline --progress` output.
//!
//! The engine's progress text is not a versioned interface. Everything that
//! depends on its shape lives in this file; when a line stops matching, the
//! tracked task simply stops advancing until the process exits.

use std::sync::LazyLock;

use regex::Regex;

use crate::humanize::engine_size;
use crate::tasks::{DownloadTask, TaskPhase};

/// Share of the bar given to the video stream of a two-stream download.
const VIDEO_SHARE: f64 = 65.0;
/// Share given to the audio stream, stacked on top of the video share.
const AUDIO_SHARE: f64 = 25.0;
const SINGLE_STREAM_SHARE: f64 = 90.0;
/// Download progress never reaches the merge mark on its own.
const DOWNLOAD_CEILING: f64 = 91.0;
pub const MERGE_PROGRESS: f64 = 92.0;

static PERCENT_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\[download\]\s+([\d.]+)%").expect("valid pattern"));
static SIZE_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"of\s+~?([\d.]+)\s*(\S+)").expect("valid pattern"));
static SPEED_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"at\s+([\d.]+\s*\S+/s)").expect("valid pattern"));
static ETA_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"ETA\s+(\S+)").expect("valid pattern"));
static DESTINATION_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\[download\]\s+Destination:").expect("valid pattern"));
static MERGER_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\[Merger\]").expect("valid pattern"));

#[derive(Debug, Clone, PartialEq)]
pub struct PercentLine {
    pub percent: f64,
    pub stream_bytes: Option<u64>,
    pub speed: Option<String>,
    pub eta: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum ProgressLine {
    /// The engine opened a new output stream.
    Destination,
    /// Separate streams are being muxed into the final container.
    Merge,
    Percent(PercentLine),
    Other,
}

pub fn classify(line: &str) -> ProgressLine {
    if DESTINATION_RE.is_match(line) {
        return ProgressLine::Destination;
    }
    if MERGER_RE.is_match(line) {
        return ProgressLine::Merge;
    }

    let Some(percent) = PERCENT_RE
        .captures(line)
        .and_then(|caps| caps.get(1))
        .and_then(|m| m.as_str().parse::<f64>().ok())
    else {
        return ProgressLine::Other;
    };

    let stream_bytes = SIZE_RE.captures(line).and_then(|caps| {
        let value = caps.get(1)?.as_str().parse::<f64>().ok()?;
        engine_size(value, caps.get(2)?.as_str())
    });
    let capture = |re: &Regex| {
        re.captures(line)
            .and_then(|caps| caps.get(1))
            .map(|m| m.as_str().to_string())
    };

    ProgressLine::Percent(PercentLine {
        percent,
        stream_bytes,
        speed: capture(&SPEED_RE),
        eta: capture(&ETA_RE),
    })
}

/// Folds classified lines of one engine run into a [`DownloadTask`].
#[derive(Debug)]
pub struct ProgressTracker {
    two_stream: bool,
    stream_index: i32,
    audio_bytes_counted: bool,
}

impl ProgressTracker {
    /// `format_id` containing `+` means separate video and audio fetches.
    pub fn new(format_id: &str) -> Self {
        Self {
            two_stream: format_id.contains('+'),
            stream_index: -1,
            audio_bytes_counted: false,
        }
    }

    pub fn initial_phase(&self) -> TaskPhase {
        if self.two_stream {
            TaskPhase::Video
        } else {
            TaskPhase::Idle
        }
    }

    fn scaled(&self, percent: f64) -> f64 {
        let scaled = if !self.two_stream {
            percent * SINGLE_STREAM_SHARE / 100.0
        } else if self.stream_index <= 0 {
            percent * VIDEO_SHARE / 100.0
        } else {
            VIDEO_SHARE + percent * AUDIO_SHARE / 100.0
        };
        scaled.min(DOWNLOAD_CEILING)
    }

    /// Apply one trimmed stdout line.
    pub fn apply(&mut self, line: &str, task: &mut DownloadTask) {
        match classify(line) {
            ProgressLine::Destination => {
                self.stream_index += 1;
                if self.two_stream {
                    task.phase = if self.stream_index == 0 {
                        TaskPhase::Video
                    } else {
                        TaskPhase::Audio
                    };
                }
                task.speed.clear();
                task.eta.clear();
            }
            ProgressLine::Merge => {
                task.begin_merge(MERGE_PROGRESS);
            }
            ProgressLine::Percent(update) => self.apply_percent(update, task),
            ProgressLine::Other => {}
        }
    }

    fn apply_percent(&mut self, update: PercentLine, task: &mut DownloadTask) {
        task.advance(self.scaled(update.percent));

        if let Some(stream_bytes) = update.stream_bytes {
            if !self.two_stream || self.stream_index <= 0 {
                task.total_bytes = stream_bytes;
            } else if stream_bytes > 0 && !self.audio_bytes_counted {
                task.total_bytes += stream_bytes;
                self.audio_bytes_counted = true;
            }
            task.downloaded_bytes = (task.total_bytes as f64 * task.progress / 100.0) as u64;
        }

        if let Some(speed) = update.speed {
            task.speed = speed;
        }
        if let Some(eta) = update.eta {
            task.eta = eta;
        }
    }
}
