//! Router-level download flows against a stub engine script.
#![cfg(unix)]

use std::fs;
use std::os::unix::fs::PermissionsExt;
use std::time::Duration;

use axum::{
    Router,
    body::Body,
    http::{Request, StatusCode, header},
};
use http_body_util::BodyExt;
use serde_json::{Value, json};
use tempfile::TempDir;
use tower::ServiceExt; // for `oneshot`

use mediagate::api::state::AppState;
use mediagate::catalog::selector_chain;
use mediagate::config::{ByteSize, Config};

const VIDEO_URL: &str = "https://video.example.com/watch?v=abc123";

/// Answers metadata queries from a fixture, writes `streamed-bytes` to stdout
/// for `-o -` and otherwise emits progress lines and writes `merged-bytes` to
/// the requested output template.
const ENGINE_SCRIPT: &str = r#"#!/bin/sh
for arg in "$@"; do
  if [ "$arg" = "--dump-single-json" ]; then
    cat <<'JSON'
{"title": "Flow Clip", "duration": 30, "formats": [
  {"format_id": "140", "ext": "m4a", "vcodec": "none", "acodec": "mp4a.40.2", "abr": 128},
  {"format_id": "22", "ext": "mp4", "vcodec": "avc1", "acodec": "mp4a", "height": 720}
]}
JSON
    exit 0
  fi
done

out=""
while [ $# -gt 0 ]; do
  if [ "$1" = "-o" ]; then out="$2"; shift; fi
  shift
done

if [ "$out" = "-" ]; then
  printf 'streamed-bytes'
  exit 0
fi

out=$(printf '%s' "$out" | sed 's/%(ext)s/mp4/')
echo '[download] Destination: video.f137.mp4'
echo '[download] 100.0% of 2.00MiB at 1.00MiB/s ETA 00:00'
echo '[download] Destination: audio.f140.m4a'
echo '[download] 100.0% of 1.00MiB at 1.00MiB/s ETA 00:00'
echo '[Merger] Merging formats into "out.mp4"'
printf 'merged-bytes' > "$out"
"#;

fn build_app() -> (TempDir, Router) {
    let dir = TempDir::new().unwrap();
    let script = dir.path().join("fake-yt-dlp");
    fs::write(&script, ENGINE_SCRIPT).unwrap();
    fs::set_permissions(&script, fs::Permissions::from_mode(0o755)).unwrap();

    let mut config = Config::default();
    config.engine.binary = script.to_string_lossy().into_owned();
    config.engine.stream_chunk_size = ByteSize(64 * 1024);

    (dir, mediagate::api::router(AppState::new(config)))
}

fn post_json(uri: &str, body: Value) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri(uri)
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from(body.to_string()))
        .unwrap()
}

fn get(uri: &str) -> Request<Body> {
    Request::builder().uri(uri).body(Body::empty()).unwrap()
}

async fn body_bytes(response: axum::response::Response) -> Vec<u8> {
    response.into_body().collect().await.unwrap().to_bytes().to_vec()
}

#[tokio::test]
async fn test_formats_via_engine() {
    let (_dir, app) = build_app();
    let response = app
        .oneshot(post_json("/api/v1/videos/formats", json!({"url": VIDEO_URL})))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let info: Value = serde_json::from_slice(&body_bytes(response).await).unwrap();
    assert_eq!(info["title"], "Flow Clip");
    assert_eq!(info["formats"][0]["id"], selector_chain(None));
    assert_eq!(info["formats"].as_array().unwrap().len(), 4);
}

#[tokio::test]
async fn test_single_stream_download_pipes_stdout() {
    let (_dir, app) = build_app();
    let response = app
        .oneshot(post_json(
            "/api/v1/videos/download",
            json!({"url": VIDEO_URL, "format_id": "22"}),
        ))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let headers = response.headers().clone();
    assert_eq!(headers[header::CONTENT_TYPE], "video/mp4");
    assert_eq!(headers["x-format-id"], "22");
    assert_eq!(
        headers[header::CONTENT_DISPOSITION],
        "attachment; filename=\"Flow_Clip.mp4\"; filename*=UTF-8''Flow%20Clip.mp4"
    );
    assert!(headers.get(header::CONTENT_LENGTH).is_none());
    assert_eq!(body_bytes(response).await, b"streamed-bytes");
}

#[tokio::test]
async fn test_merged_download_via_get_streams_file() {
    let (_dir, app) = build_app();
    let selector = selector_chain(None);
    let uri = format!(
        "/api/v1/videos/download?url={}&format_id={}",
        urlencoding::encode(VIDEO_URL),
        urlencoding::encode(&selector)
    );

    let response = app.oneshot(get(&uri)).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(response.headers()[header::CONTENT_TYPE], "video/mp4");
    assert_eq!(response.headers()[header::CONTENT_LENGTH], "12");
    assert_eq!(body_bytes(response).await, b"merged-bytes");
}

#[tokio::test]
async fn test_tracked_task_lifecycle() {
    let (_dir, app) = build_app();
    let selector = selector_chain(Some(720));

    let response = app
        .clone()
        .oneshot(post_json(
            "/api/v1/videos/download/tasks",
            json!({"url": VIDEO_URL, "format_id": selector}),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::ACCEPTED);
    let accepted: Value = serde_json::from_slice(&body_bytes(response).await).unwrap();
    let task_id = accepted["task_id"].as_str().unwrap().to_string();
    let task_uri = format!("/api/v1/videos/download/tasks/{task_id}");

    let mut snapshot = Value::Null;
    for _ in 0..100 {
        let response = app.clone().oneshot(get(&task_uri)).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        snapshot = serde_json::from_slice(&body_bytes(response).await).unwrap();
        if snapshot["status"] == "completed" || snapshot["status"] == "failed" {
            break;
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
    assert_eq!(snapshot["status"], "completed", "{snapshot}");
    assert_eq!(snapshot["progress"], 100.0);
    assert_eq!(snapshot["filename"], "Flow Clip.mp4");
    assert_eq!(snapshot["file_size"], 12);

    let response = app
        .clone()
        .oneshot(get(&format!("{task_uri}/file")))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(response.headers()[header::CONTENT_LENGTH], "12");
    assert_eq!(body_bytes(response).await, b"merged-bytes");

    // The file is handed over once
    let response = app.oneshot(get(&task_uri)).await.unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_delete_task() {
    let (_dir, app) = build_app();
    let response = app
        .clone()
        .oneshot(post_json(
            "/api/v1/videos/download/tasks",
            json!({"url": VIDEO_URL, "format_id": "22"}),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::ACCEPTED);
    let accepted: Value = serde_json::from_slice(&body_bytes(response).await).unwrap();
    let task_uri = format!(
        "/api/v1/videos/download/tasks/{}",
        accepted["task_id"].as_str().unwrap()
    );

    let response = app
        .clone()
        .oneshot(
            Request::builder()
                .method("DELETE")
                .uri(&task_uri)
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NO_CONTENT);

    let response = app.oneshot(get(&task_uri)).await.unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}
