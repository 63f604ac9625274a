use super::models::{Config, EngineConfig};
use crate::humanize::ByteSize;
use thiserror::Error;

const MIN_STREAM_CHUNK: ByteSize = ByteSize(64 * 1024);
const MAX_STREAM_CHUNK: ByteSize = ByteSize::mib(64);

#[derive(Debug, Error)]
pub enum ValidationError {
    #[error("{field} must be within {min}..={max}, got {value}")]
    OutOfRange {
        field: &'static str,
        value: String,
        min: String,
        max: String,
    },

    #[error("At least one URL scheme must be allowed")]
    NoAllowedSchemes,

    #[error("Invalid URL scheme '{0}'")]
    InvalidScheme(String),

    #[error("engine.binary must not be empty")]
    EmptyEngineBinary,

    #[error("server.api_prefix must start with '/': {0}")]
    InvalidApiPrefix(String),
}

/// Validate the entire configuration
pub fn validate(config: &Config) -> Result<(), ValidationError> {
    validate_engine(&config.engine)?;
    validate_security(config)?;
    validate_server(config)?;
    validate_tasks(config)?;
    Ok(())
}

fn validate_engine(engine: &EngineConfig) -> Result<(), ValidationError> {
    if engine.binary.trim().is_empty() {
        return Err(ValidationError::EmptyEngineBinary);
    }

    check_range("engine.concurrent_fragments", engine.concurrent_fragments, 1, 32)?;
    check_range("engine.socket_timeout_secs", engine.socket_timeout_secs, 1, 300)?;
    check_range("engine.retries", engine.retries, 0, 100)?;
    check_range("engine.fragment_retries", engine.fragment_retries, 0, 100)?;
    check_range("engine.extractor_retries", engine.extractor_retries, 0, 10)?;
    check_range("engine.file_access_retries", engine.file_access_retries, 1, 10)?;
    check_range("engine.stream_chunk_size", engine.stream_chunk_size, MIN_STREAM_CHUNK, MAX_STREAM_CHUNK)?;
    check_range("engine.stream_channel_capacity", engine.stream_channel_capacity, 1, 64)?;
    check_range("engine.merge_timeout_secs", engine.merge_timeout_secs, 1, 24 * 3600)?;
    check_range("engine.metadata_timeout_secs", engine.metadata_timeout_secs, 1, 3600)?;

    if !(0.0..=10.0).contains(&engine.sleep_requests) {
        return Err(ValidationError::OutOfRange {
            field: "engine.sleep_requests",
            value: engine.sleep_requests.to_string(),
            min: "0".to_string(),
            max: "10".to_string(),
        });
    }

    Ok(())
}

fn validate_security(config: &Config) -> Result<(), ValidationError> {
    let schemes = &config.security.allowed_schemes;
    if schemes.iter().all(|s| s.trim().is_empty()) {
        return Err(ValidationError::NoAllowedSchemes);
    }

    for scheme in schemes {
        let scheme = scheme.trim();
        if !scheme.is_empty() && !scheme.chars().all(|c| c.is_ascii_alphabetic()) {
            return Err(ValidationError::InvalidScheme(scheme.to_string()));
        }
    }

    Ok(())
}

fn validate_server(config: &Config) -> Result<(), ValidationError> {
    let prefix = &config.server.api_prefix;
    if !prefix.starts_with('/') || (prefix.len() > 1 && prefix.ends_with('/')) {
        return Err(ValidationError::InvalidApiPrefix(prefix.clone()));
    }
    Ok(())
}

fn validate_tasks(config: &Config) -> Result<(), ValidationError> {
    check_range("tasks.stale_after_secs", config.tasks.stale_after_secs, 60, 7 * 24 * 3600)?;
    check_range("tasks.sweep_interval_secs", config.tasks.sweep_interval_secs, 1, 24 * 3600)?;
    Ok(())
}

fn check_range<T>(field: &'static str, value: T, min: T, max: T) -> Result<(), ValidationError>
where
    T: PartialOrd + std::fmt::Display,
{
    if value < min || value > max {
        return Err(ValidationError::OutOfRange {
            field,
            value: value.to_string(),
            min: min.to_string(),
            max: max.to_string(),
        });
    }
    Ok(())
}
