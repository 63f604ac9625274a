use crate::humanize::ByteSize;
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;

/// Top-level configuration
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub security: SecurityConfig,
    #[serde(default)]
    pub engine: EngineConfig,
    #[serde(default)]
    pub cache: CacheConfig,
    #[serde(default)]
    pub tasks: TaskConfig,
    #[serde(default)]
    pub telemetry: TelemetryConfig,
}

/// HTTP surface
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ServerConfig {
    #[serde(default = "default_bind_addr")]
    pub bind_addr: SocketAddr,
    #[serde(default = "default_api_prefix")]
    pub api_prefix: String,
    #[serde(default = "default_cors_origins")]
    pub cors_origins: Vec<String>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: default_bind_addr(),
            api_prefix: default_api_prefix(),
            cors_origins: default_cors_origins(),
        }
    }
}

fn default_bind_addr() -> SocketAddr {
    SocketAddr::from(([0, 0, 0, 0], 8000))
}

fn default_api_prefix() -> String {
    "/api/v1".to_string()
}

fn default_cors_origins() -> Vec<String> {
    vec!["http://localhost:3000".to_string()]
}

/// URL admission policy
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct SecurityConfig {
    #[serde(default = "default_true")]
    pub block_private_networks: bool,
    #[serde(default = "default_allowed_schemes")]
    pub allowed_schemes: Vec<String>,
}

impl Default for SecurityConfig {
    fn default() -> Self {
        Self {
            block_private_networks: true,
            allowed_schemes: default_allowed_schemes(),
        }
    }
}

fn default_allowed_schemes() -> Vec<String> {
    vec!["http".to_string(), "https".to_string()]
}

/// Extraction engine invocation and tuning flags.
///
/// Rate and buffer values are passed to the engine verbatim (`"100K"`), so they
/// stay strings; only `stream_chunk_size` is interpreted by this process.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct EngineConfig {
    #[serde(default = "default_binary")]
    pub binary: String,
    #[serde(default = "default_concurrent_fragments")]
    pub concurrent_fragments: u32,
    #[serde(default = "default_throttled_rate")]
    pub throttled_rate: String,
    #[serde(default = "default_buffer_size")]
    pub buffer_size: String,
    #[serde(default = "default_http_chunk_size")]
    pub http_chunk_size: Option<String>,
    #[serde(default = "default_socket_timeout_secs")]
    pub socket_timeout_secs: u32,
    #[serde(default = "default_retries")]
    pub retries: u32,
    #[serde(default = "default_retries")]
    pub fragment_retries: u32,
    #[serde(default = "default_minor_retries")]
    pub extractor_retries: u32,
    #[serde(default = "default_minor_retries")]
    pub file_access_retries: u32,
    #[serde(default = "default_stream_chunk_size")]
    pub stream_chunk_size: ByteSize,
    #[serde(default = "default_stream_channel_capacity")]
    pub stream_channel_capacity: usize,
    #[serde(default)]
    pub cookies_from_browser: Option<String>,
    #[serde(default)]
    pub user_agent: Option<String>,
    #[serde(default = "default_true")]
    pub prefer_free_formats: bool,
    #[serde(default)]
    pub sleep_requests: f64,
    #[serde(default)]
    pub sponsorblock_remove: Option<String>,
    #[serde(default)]
    pub proxy: Option<String>,
    #[serde(default = "default_metadata_timeout_secs")]
    pub metadata_timeout_secs: u64,
    #[serde(default = "default_merge_timeout_secs")]
    pub merge_timeout_secs: u64,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            binary: default_binary(),
            concurrent_fragments: default_concurrent_fragments(),
            throttled_rate: default_throttled_rate(),
            buffer_size: default_buffer_size(),
            http_chunk_size: default_http_chunk_size(),
            socket_timeout_secs: default_socket_timeout_secs(),
            retries: default_retries(),
            fragment_retries: default_retries(),
            extractor_retries: default_minor_retries(),
            file_access_retries: default_minor_retries(),
            stream_chunk_size: default_stream_chunk_size(),
            stream_channel_capacity: default_stream_channel_capacity(),
            cookies_from_browser: None,
            user_agent: None,
            prefer_free_formats: true,
            sleep_requests: 0.0,
            sponsorblock_remove: None,
            proxy: None,
            metadata_timeout_secs: default_metadata_timeout_secs(),
            merge_timeout_secs: default_merge_timeout_secs(),
        }
    }
}

fn default_binary() -> String {
    "yt-dlp".to_string()
}

fn default_concurrent_fragments() -> u32 {
    8
}

fn default_throttled_rate() -> String {
    "100K".to_string()
}

fn default_buffer_size() -> String {
    "128K".to_string()
}

fn default_http_chunk_size() -> Option<String> {
    Some("50M".to_string())
}

fn default_socket_timeout_secs() -> u32 {
    30
}

fn default_retries() -> u32 {
    10
}

fn default_minor_retries() -> u32 {
    3
}

fn default_stream_chunk_size() -> ByteSize {
    ByteSize::mib(16)
}

fn default_stream_channel_capacity() -> usize {
    4
}

fn default_metadata_timeout_secs() -> u64 {
    180
}

fn default_merge_timeout_secs() -> u64 {
    3600
}

/// Metadata result cache. A non-positive TTL or capacity disables it.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct CacheConfig {
    #[serde(default = "default_cache_ttl_secs")]
    pub ttl_secs: i64,
    #[serde(default = "default_cache_max_entries")]
    pub max_entries: i64,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            ttl_secs: default_cache_ttl_secs(),
            max_entries: default_cache_max_entries(),
        }
    }
}

fn default_cache_ttl_secs() -> i64 {
    600
}

fn default_cache_max_entries() -> i64 {
    128
}

/// Tracked download housekeeping
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct TaskConfig {
    #[serde(default = "default_stale_after_secs")]
    pub stale_after_secs: u64,
    #[serde(default = "default_sweep_interval_secs")]
    pub sweep_interval_secs: u64,
}

impl Default for TaskConfig {
    fn default() -> Self {
        Self {
            stale_after_secs: default_stale_after_secs(),
            sweep_interval_secs: default_sweep_interval_secs(),
        }
    }
}

fn default_stale_after_secs() -> u64 {
    1800
}

fn default_sweep_interval_secs() -> u64 {
    300
}

/// Logging configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct TelemetryConfig {
    #[serde(default = "default_log_level")]
    pub log_level: String,
    #[serde(default)]
    pub json_logs: bool,
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
            json_logs: false,
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_true() -> bool {
    true
}
