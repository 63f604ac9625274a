//! API utility functions
//!
//! Stateless helpers for request parsing and response headers, plus the
//! file-backed body used for merged downloads.

use std::path::{Path, PathBuf};

use axum::body::Body;
use futures::StreamExt;
use tokio_util::io::ReaderStream;

use crate::api::error::ApiError;
use crate::error::ServiceError;
use crate::tasks::remove_temp_dir;

const FALLBACK_FILENAME: &str = "download";
const MAX_FILENAME_CHARS: usize = 200;

/// Parses and validates Content-Type header for application/json
///
/// Accepts `application/json` with or without a charset parameter; rejects
/// look-alikes such as `application/jsonp` or `text/json`.
pub fn parse_content_type(content_type: &str) -> Result<mime::Mime, ApiError> {
    let media_type: mime::Mime = content_type.parse().map_err(|_| {
        ApiError::InvalidPayload(format!("invalid Content-Type: {}", content_type))
    })?;

    if media_type.type_() != mime::APPLICATION || media_type.subtype() != mime::JSON {
        return Err(ApiError::InvalidPayload(format!(
            "Content-Type must be application/json, got: {}/{}",
            media_type.type_(),
            media_type.subtype()
        )));
    }

    Ok(media_type)
}

/// ASCII-only fallback filename: alphanumerics, `-` and `.` survive,
/// whitespace runs become `_`, everything else is dropped.
pub fn sanitize_filename(filename: &str) -> String {
    let mut out = String::with_capacity(filename.len());
    let mut in_space = false;
    for c in filename.chars() {
        if c.is_ascii_whitespace() {
            if !in_space {
                out.push('_');
            }
            in_space = true;
            continue;
        }
        if c.is_ascii_alphanumeric() || c == '-' || c == '.' {
            in_space = false;
            out.push(c);
        }
    }
    let out: String = out.chars().take(MAX_FILENAME_CHARS).collect();
    if out.is_empty() {
        FALLBACK_FILENAME.to_string()
    } else {
        out
    }
}

/// `attachment` header with an ASCII `filename` and an RFC 5987 `filename*`.
pub fn content_disposition(filename: &str) -> String {
    format!(
        "attachment; filename=\"{}\"; filename*=UTF-8''{}",
        sanitize_filename(filename),
        urlencoding::encode(filename)
    )
}

/// Deletes a temp directory when the response body holding it is dropped.
struct TempDirCleanup(PathBuf);

impl Drop for TempDirCleanup {
    fn drop(&mut self) {
        remove_temp_dir(&self.0);
    }
}

/// Stream `path` as a response body and remove `temp_dir` once the body is
/// finished or abandoned. On open failure the directory is removed at once.
pub async fn file_body(path: &Path, temp_dir: PathBuf, chunk_size: usize) -> Result<Body, ApiError> {
    let cleanup = TempDirCleanup(temp_dir);
    let file = tokio::fs::File::open(path)
        .await
        .map_err(|e| ServiceError::Internal(format!("Failed to open downloaded file: {e}")))?;

    let stream = ReaderStream::with_capacity(file, chunk_size).map(move |chunk| {
        let _held = &cleanup;
        chunk
    });
    Ok(Body::from_stream(stream))
}
