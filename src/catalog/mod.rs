//! Format catalog construction.
//!
//! Raw engine metadata is a loosely typed JSON document. This module turns it
//! into a [`VideoInfo`]: a deduplicated list of the engine's own formats,
//! prefixed with synthesized merged selectors, in display order.

mod merged;
mod normalize;

pub use merged::{
    BEST_AVAILABLE_LABEL, MERGE_TIERS, build_merged, is_merged_selector, label_height,
    selector_chain,
};
pub use normalize::{MalformedRecord, UNKNOWN, mime_type, normalize_all, normalize_one, quality_label};

use std::cmp::Reverse;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::Result;

const DEFAULT_TITLE: &str = "Unknown Title";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Format {
    pub id: String,
    pub quality_label: String,
    pub mime_type: String,
    pub filesize_bytes: Option<u64>,
    pub is_audio_only: bool,
    pub is_video_only: bool,
}

impl Format {
    /// File extension implied by the mime subtype.
    pub fn extension(&self) -> &str {
        self.mime_type
            .split_once('/')
            .map(|(_, sub)| sub)
            .filter(|sub| !sub.is_empty())
            .unwrap_or("bin")
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VideoInfo {
    pub title: String,
    pub thumbnail_url: Option<String>,
    pub duration_seconds: Option<u64>,
    pub formats: Vec<Format>,
}

impl VideoInfo {
    pub fn find_format(&self, format_id: &str) -> Option<&Format> {
        self.formats.iter().find(|f| f.id == format_id)
    }
}

fn display_priority(format: &Format) -> u8 {
    let label = format.quality_label.to_lowercase();
    if label.contains("best available") {
        0
    } else if label.contains("merged") {
        1
    } else {
        2
    }
}

/// Stable display ordering: best-available first, then merged tiers, then raw
/// formats; audio-only after video within a group; taller first.
pub fn sort_catalog(formats: &mut [Format]) {
    formats.sort_by_key(|f| {
        (
            display_priority(f),
            f.is_audio_only,
            Reverse(label_height(&f.quality_label).unwrap_or(0)),
        )
    });
}

/// Build the catalog for one engine metadata document.
pub fn build_catalog(info: &Value) -> Result<VideoInfo> {
    let records = info
        .get("formats")
        .and_then(Value::as_array)
        .map(Vec::as_slice)
        .unwrap_or_default();

    let raw = normalize_all(records)?;
    let mut formats = build_merged(&raw);
    formats.extend(raw);
    sort_catalog(&mut formats);

    let title = info
        .get("title")
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|t| !t.is_empty())
        .unwrap_or(DEFAULT_TITLE)
        .to_string();

    let thumbnail_url = info
        .get("thumbnail")
        .and_then(Value::as_str)
        .map(str::to_string);

    let duration_seconds = info
        .get("duration")
        .and_then(Value::as_f64)
        .filter(|d| d.is_finite() && *d >= 0.0)
        .map(|d| d as u64);

    Ok(VideoInfo {
        title,
        thumbnail_url,
        duration_seconds,
        formats,
    })
}
