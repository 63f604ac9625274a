//! Download orchestration.
//!
//! [`Orchestrator`] is the single entry point the HTTP layer talks to. It owns
//! the URL gate, the result cache and the task registry, and it supervises
//! every engine process it starts.

mod merge;
mod stream;
#[cfg(all(test, unix))]
mod testing;

pub use merge::MergedFile;
pub use stream::{MediaStream, StreamOutcome};

use std::sync::{Arc, LazyLock};
use std::time::Duration;

use regex::Regex;
use tracing::{debug, info};

use crate::cache::ResultCache;
use crate::catalog::{self, Format, VideoInfo};
use crate::config::{Config, EngineConfig};
use crate::engine::{Engine, MERGE_CONTAINER, MetadataSource};
use crate::error::{Result, ServiceError};
use crate::tasks::{DownloadTask, TaskRegistry};
use crate::url_gate::{UrlGate, log_safe};

/// Characters a format selector may contain. Anything else could smuggle
/// extra arguments or shell syntax into the engine invocation.
static FORMAT_ID_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[a-zA-Z0-9+\[\]<>=^:/\-_.]+$").expect("valid pattern"));

const MERGED_CONTENT_TYPE: &str = "video/mp4";
const FALLBACK_CONTENT_TYPE: &str = "application/octet-stream";

/// What the caller needs to label a download before any bytes arrive.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DownloadPlan {
    pub filename: String,
    pub content_type: String,
    pub merged: bool,
    pub format: Format,
}

pub fn validate_format_id(format_id: &str) -> Result<()> {
    if FORMAT_ID_RE.is_match(format_id) {
        Ok(())
    } else {
        Err(ServiceError::InvalidUrl("Invalid format_id".to_string()))
    }
}

pub struct Orchestrator {
    engine: Engine,
    metadata: Arc<dyn MetadataSource>,
    gate: UrlGate,
    cache: ResultCache,
    tasks: Arc<TaskRegistry>,
}

impl Orchestrator {
    pub fn new(config: &Config) -> Self {
        let engine = Engine::new(Arc::new(config.engine.clone()));
        Self::with_metadata_source(config, Arc::new(engine))
    }

    /// Build with a custom metadata source instead of the engine's own query.
    pub fn with_metadata_source(config: &Config, metadata: Arc<dyn MetadataSource>) -> Self {
        Self {
            engine: Engine::new(Arc::new(config.engine.clone())),
            metadata,
            gate: UrlGate::from_config(&config.security),
            cache: ResultCache::from_config(&config.cache),
            tasks: Arc::new(TaskRegistry::new()),
        }
    }

    pub fn engine_config(&self) -> &EngineConfig {
        self.engine.config()
    }

    pub fn gate(&self) -> &UrlGate {
        &self.gate
    }

    /// Gate the URL and the selector; returns the normalized URL.
    fn validate_request(&self, url: &str, format_id: &str) -> Result<String> {
        let url = self.gate.normalize(url)?;
        validate_format_id(format_id)?;
        Ok(url)
    }

    /// Catalog for `url`, from cache when fresh.
    pub async fn resolve(&self, url: &str) -> Result<Arc<VideoInfo>> {
        let url = self.gate.normalize(url)?;
        if let Some(cached) = self.cache.get(&url) {
            debug!(url = %log_safe(&url), "Catalog served from cache");
            return Ok(cached);
        }

        info!(url = %log_safe(&url), "Fetching formats");
        let raw = self.metadata.fetch_metadata(&url).await?;
        let catalog = Arc::new(catalog::build_catalog(&raw)?);
        self.cache.set(&url, Arc::clone(&catalog));

        info!(url = %log_safe(&url), formats = catalog.formats.len(), "Formats resolved");
        Ok(catalog)
    }

    /// Cached catalog only; never queries the engine.
    pub fn get_cached(&self, url: &str) -> Option<Arc<VideoInfo>> {
        let url = self.gate.normalize(url).ok()?;
        self.cache.get(&url)
    }

    /// Look `format_id` up in the catalog for `url`.
    pub async fn select_format(&self, url: &str, format_id: &str) -> Result<(Arc<VideoInfo>, Format)> {
        let info = self.resolve(url).await?;
        let format = info.find_format(format_id).cloned().ok_or_else(|| {
            ServiceError::FormatNotAvailable(format!(
                "Format '{format_id}' not found in available formats"
            ))
        })?;
        Ok((info, format))
    }

    pub async fn plan_download(&self, url: &str, format_id: &str) -> Result<DownloadPlan> {
        validate_format_id(format_id)?;
        let (info, format) = self.select_format(url, format_id).await?;
        let merged = catalog::is_merged_selector(format_id);

        let (ext, content_type) = if merged {
            (MERGE_CONTAINER, MERGED_CONTENT_TYPE.to_string())
        } else {
            let content_type = if format.mime_type.is_empty() {
                FALLBACK_CONTENT_TYPE.to_string()
            } else {
                format.mime_type.clone()
            };
            (format.extension(), content_type)
        };
        let filename = format!("{}.{}", info.title, ext);

        Ok(DownloadPlan {
            filename,
            content_type,
            merged,
            format,
        })
    }

    pub fn create_task(&self, task_id: &str, filename: &str, content_type: &str) -> DownloadTask {
        self.tasks.create(task_id, filename, content_type)
    }

    pub fn get_task(&self, task_id: &str) -> Option<DownloadTask> {
        self.tasks.get(task_id)
    }

    pub fn remove_task(&self, task_id: &str) -> Option<DownloadTask> {
        self.tasks.remove(task_id)
    }

    pub fn sweep_stale(&self, max_age: Duration) -> usize {
        self.tasks.sweep_stale(max_age)
    }
}
