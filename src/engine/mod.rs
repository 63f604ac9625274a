//! Extraction engine integration.
//!
//! The engine is an external executable (`yt-dlp` by default). This module
//! owns its command lines, classifies its failures and interprets its
//! progress output; process supervision lives in the orchestrator.

mod command;
pub mod progress;
pub mod stderr;

pub use command::{CommandBuilder, MERGE_CONTAINER};

use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;
use tracing::{debug, warn};

use crate::config::EngineConfig;
use crate::error::{Result, ServiceError, excerpt};
use crate::url_gate::log_safe;

const LIVESTREAM_MESSAGE: &str =
    "This livestream may not be available yet or has ended. Please try again later.";

/// Source of raw per-video metadata documents.
#[async_trait]
pub trait MetadataSource: Send + Sync {
    /// Fetch the raw metadata document for an already gated URL.
    async fn fetch_metadata(&self, url: &str) -> Result<Value>;
}

/// Handle on the configured engine executable.
#[derive(Debug, Clone)]
pub struct Engine {
    config: Arc<EngineConfig>,
}

impl Engine {
    pub fn new(config: Arc<EngineConfig>) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn commands(&self) -> CommandBuilder<'_> {
        CommandBuilder::new(&self.config)
    }
}

#[async_trait]
impl MetadataSource for Engine {
    async fn fetch_metadata(&self, url: &str) -> Result<Value> {
        let commands = self.commands();
        let args = commands.metadata_args(url);
        let mut command = commands.command(&args);
        command.stdout(Stdio::piped()).stderr(Stdio::piped());

        let child = command
            .spawn()
            .map_err(|e| ServiceError::extraction("Failed to start extraction engine", e))?;

        let timeout = Duration::from_secs(self.config.metadata_timeout_secs);
        let output = match tokio::time::timeout(timeout, child.wait_with_output()).await {
            Ok(output) => output.map_err(|e| ServiceError::extraction("Metadata query failed", e))?,
            // Dropping the wait future drops the child, which kills it
            Err(_) => {
                warn!(url = %log_safe(url), timeout_secs = timeout.as_secs(), "Metadata query timed out");
                return Err(ServiceError::ExtractionFailed(
                    "Metadata query timed out".to_string(),
                ));
            }
        };

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            debug!(url = %log_safe(url), status = ?output.status.code(), "Metadata query exited with failure");
            return Err(classify_failure(&stderr, url));
        }

        let info: Value = serde_json::from_slice(&output.stdout)
            .map_err(|e| ServiceError::extraction("Unreadable metadata from extraction engine", e))?;

        match &info {
            Value::Object(map) if !map.is_empty() => Ok(info),
            _ => Err(not_found()),
        }
    }
}

fn not_found() -> ServiceError {
    ServiceError::NotFound("Video not found or unavailable".to_string())
}

/// The engine's own error line, or the whole stream when it printed none.
fn error_line(stderr: &str) -> &str {
    stderr
        .lines()
        .rev()
        .find(|line| line.trim_start().starts_with("ERROR:"))
        .map(|line| line.trim_start().trim_start_matches("ERROR:").trim())
        .unwrap_or_else(|| stderr.trim())
}

/// Map a failed metadata query onto the error taxonomy.
pub fn classify_failure(stderr: &str, url: &str) -> ServiceError {
    let detail = excerpt(error_line(stderr));
    let lowered = stderr.to_lowercase();

    if lowered.contains("unsupported url") {
        return ServiceError::UnsupportedPlatform(detail);
    }
    if ["not found", "unavailable", "private"]
        .iter()
        .any(|kw| lowered.contains(kw))
    {
        return not_found();
    }
    if lowered.contains("livestream") || url.contains("/live/") {
        return ServiceError::ExtractionFailed(LIVESTREAM_MESSAGE.to_string());
    }
    if lowered.contains("format") {
        return ServiceError::FormatNotAvailable(format!("No formats available: {detail}"));
    }
    ServiceError::ExtractionFailed(format!("Failed to fetch video information: {detail}"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classify_unsupported() {
        let err = classify_failure(
            "ERROR: Unsupported URL: https://example.com/page\n",
            "https://example.com/page",
        );
        assert_eq!(err.code(), "UNSUPPORTED_PLATFORM");
        assert_eq!(err.message(), "Unsupported URL: https://example.com/page");
    }

    #[test]
    fn test_classify_not_found_variants() {
        for stderr in [
            "ERROR: [youtube] abc: Video unavailable",
            "ERROR: [youtube] abc: Private video. Sign in if you've been granted access",
            "ERROR: HTTP Error 404: Not Found",
        ] {
            assert_eq!(classify_failure(stderr, "https://x.test/v"), not_found(), "{stderr}");
        }
    }

    #[test]
    fn test_classify_livestream() {
        let err = classify_failure("ERROR: boom", "https://www.youtube.com/live/abc");
        assert_eq!(err, ServiceError::ExtractionFailed(LIVESTREAM_MESSAGE.to_string()));
        let err = classify_failure("ERROR: This livestream has ended", "https://x.test/v");
        assert_eq!(err.code(), "YTDLP_FAILED");
    }

    #[test]
    fn test_classify_format_and_fallback() {
        let err = classify_failure("ERROR: Requested format is not available", "https://x.test/v");
        assert_eq!(err.code(), "FORMAT_NOT_AVAILABLE");

        let err = classify_failure("WARNING: noise\nERROR: Connection reset", "https://x.test/v");
        assert_eq!(
            err.message(),
            "Failed to fetch video information: Connection reset"
        );
    }

    #[test]
    fn test_classify_truncates_detail() {
        let stderr = format!("ERROR: {}", "z".repeat(5000));
        let err = classify_failure(&stderr, "https://x.test/v");
        assert!(err.message().len() <= "Failed to fetch video information: ".len() + 200);
    }
}
