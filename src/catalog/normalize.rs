use std::collections::HashSet;

use serde_json::{Map, Value};
use thiserror::Error;
use tracing::debug;

use super::Format;
use crate::error::{Result, ServiceError};

/// Placeholder used when the engine does not report a field.
pub const UNKNOWN: &str = "unknown";
const CODEC_NONE: &str = "none";
const VIDEO_CONTAINER_EXTS: [&str; 3] = ["mp4", "m4v", "mov"];

#[derive(Debug, Error, PartialEq, Eq)]
pub enum MalformedRecord {
    #[error("format record is not an object")]
    NotAnObject,
    #[error("field '{0}' has an unusable type")]
    BadField(&'static str),
}

fn positive_number(record: &Map<String, Value>, key: &str) -> Option<f64> {
    record
        .get(key)
        .and_then(Value::as_f64)
        .filter(|v| v.is_finite() && *v > 0.0)
}

fn non_empty_text(value: Option<&Value>) -> Option<String> {
    match value? {
        Value::String(s) if !s.is_empty() => Some(s.clone()),
        Value::Number(n) if n.as_f64().is_some_and(|v| v != 0.0) => Some(n.to_string()),
        _ => None,
    }
}

fn codec(record: &Map<String, Value>, key: &str) -> String {
    record
        .get(key)
        .and_then(Value::as_str)
        .unwrap_or(CODEC_NONE)
        .to_string()
}

/// `"1080p"`, `"128kbps"`, the engine's own note, or `"unknown"`.
pub fn quality_label(record: &Map<String, Value>) -> String {
    if let Some(height) = positive_number(record, "height") {
        return format!("{}p", height as u64);
    }
    if let Some(abr) = positive_number(record, "abr") {
        return format!("{}kbps", abr as u64);
    }
    non_empty_text(record.get("format_note"))
        .or_else(|| non_empty_text(record.get("quality")))
        .unwrap_or_else(|| UNKNOWN.to_string())
}

pub fn mime_type(record: &Map<String, Value>) -> String {
    let ext = record
        .get("ext")
        .and_then(Value::as_str)
        .filter(|e| !e.is_empty())
        .unwrap_or(UNKNOWN);

    if codec(record, "vcodec") != CODEC_NONE {
        format!("video/{ext}")
    } else if codec(record, "acodec") != CODEC_NONE {
        format!("audio/{ext}")
    } else if VIDEO_CONTAINER_EXTS.contains(&ext) {
        format!("video/{ext}")
    } else {
        format!("application/{ext}")
    }
}

fn format_id(record: &Map<String, Value>) -> std::result::Result<String, MalformedRecord> {
    for key in ["format_id", "id"] {
        match record.get(key) {
            None | Some(Value::Null) => continue,
            Some(Value::String(s)) if s.is_empty() => continue,
            Some(Value::String(s)) => return Ok(s.clone()),
            Some(Value::Number(n)) => return Ok(n.to_string()),
            Some(_) => return Err(MalformedRecord::BadField(key)),
        }
    }
    Ok(UNKNOWN.to_string())
}

fn filesize(record: &Map<String, Value>) -> Option<u64> {
    ["filesize", "filesize_approx"]
        .iter()
        .find_map(|key| {
            let value = record.get(*key)?;
            value.as_u64().or_else(|| {
                value
                    .as_f64()
                    .filter(|v| v.is_finite() && *v >= 0.0)
                    .map(|v| v as u64)
            })
        })
}

/// Map one raw engine record onto a [`Format`].
pub fn normalize_one(record: &Value) -> std::result::Result<Format, MalformedRecord> {
    let record = record.as_object().ok_or(MalformedRecord::NotAnObject)?;

    let id = format_id(record)?;
    let has_video = codec(record, "vcodec") != CODEC_NONE;
    let has_audio = codec(record, "acodec") != CODEC_NONE;

    Ok(Format {
        id,
        quality_label: quality_label(record),
        mime_type: mime_type(record),
        filesize_bytes: filesize(record),
        is_audio_only: has_audio && !has_video,
        is_video_only: has_video && !has_audio,
    })
}

/// Normalize every record, dropping malformed ones, placeholders and repeats.
pub fn normalize_all(records: &[Value]) -> Result<Vec<Format>> {
    if records.is_empty() {
        return Err(ServiceError::FormatNotAvailable(
            "No formats available for this video".to_string(),
        ));
    }

    let mut seen = HashSet::new();
    let mut formats = Vec::with_capacity(records.len());

    for (index, record) in records.iter().enumerate() {
        let format = match normalize_one(record) {
            Ok(format) => format,
            Err(err) => {
                debug!(index, error = %err, "Skipping malformed format record");
                continue;
            }
        };

        if format.id == UNKNOWN || !seen.insert(format.id.clone()) {
            continue;
        }
        formats.push(format);
    }

    if formats.is_empty() {
        return Err(ServiceError::FormatNotAvailable(
            "No valid formats found".to_string(),
        ));
    }

    Ok(formats)
}
