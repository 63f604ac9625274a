//! Synthetic "merged" catalog entries.
//!
//! A merged entry is not a single engine format but a selector expression the
//! engine resolves at download time into a video stream plus an audio stream.
//! Every alternative in a chain pins the codecs to H.264/AAC so the muxed mp4
//! plays everywhere; the chain degrades to a pre-muxed H.264 file rather than to
//! an unconstrained `best`.

use std::sync::LazyLock;

use regex::Regex;

use super::Format;

/// Resolution tiers offered as merged downloads, highest first.
pub const MERGE_TIERS: [(u32, &str); 5] = [
    (2160, "4K Ultra HD (2160p)"),
    (1440, "QHD (1440p)"),
    (1080, "Full HD (1080p)"),
    (720, "HD (720p)"),
    (480, "SD (480p)"),
];

pub const BEST_AVAILABLE_LABEL: &str = "Best Available (Merged)";
const MERGED_MIME: &str = "video/mp4";

static HEIGHT_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(\d+)p").expect("height pattern is valid"));

/// Pixel height embedded in a quality label such as `"1080p60"`.
pub fn label_height(label: &str) -> Option<u32> {
    HEIGHT_RE
        .captures(label)
        .and_then(|caps| caps.get(1))
        .and_then(|m| m.as_str().parse().ok())
}

/// Selector chain with an optional `[height<=H]` cap on every alternative.
pub fn selector_chain(max_height: Option<u32>) -> String {
    let cap = max_height
        .map(|h| format!("[height<={h}]"))
        .unwrap_or_default();
    [
        format!("bestvideo{cap}[vcodec^=avc1]+bestaudio[acodec^=mp4a]"),
        format!("bestvideo{cap}[vcodec^=avc1]+bestaudio[acodec^=mp4]"),
        format!("bestvideo{cap}[vcodec^=avc]+bestaudio[acodec^=mp4a]"),
        format!("best{cap}[vcodec^=avc1]"),
        format!("best{cap}[vcodec^=avc]"),
    ]
    .join("/")
}

fn merged_entry(id: String, quality_label: String) -> Format {
    Format {
        id,
        quality_label,
        mime_type: MERGED_MIME.to_string(),
        filesize_bytes: None,
        is_audio_only: false,
        is_video_only: false,
    }
}

/// Merged entries for `formats`: always a best-available chain, plus one
/// capped chain per tier whose exact height some video format offers.
pub fn build_merged(formats: &[Format]) -> Vec<Format> {
    let heights: Vec<u32> = formats
        .iter()
        .filter(|f| f.mime_type.contains("video/"))
        .filter_map(|f| label_height(&f.quality_label))
        .collect();

    let mut merged = vec![merged_entry(selector_chain(None), BEST_AVAILABLE_LABEL.to_string())];

    for (height, label) in MERGE_TIERS {
        if heights.contains(&height) {
            merged.push(merged_entry(
                selector_chain(Some(height)),
                format!("{label} (Merged)"),
            ));
        }
    }

    merged
}

/// Whether a selector asks the engine to combine streams, which rules out
/// piping it straight to stdout.
pub fn is_merged_selector(format_id: &str) -> bool {
    format_id.contains('+')
        || format_id == "best"
        || format_id == "bestvideo"
        || format_id.starts_with("best[")
        || format_id.starts_with("bestvideo[")
}
