//! Service configuration.
//!
//! Settings are merged from, lowest priority first:
//! 1. struct defaults,
//! 2. the TOML file at `config/mediagate.toml` (or `$MEDIAGATE_CONFIG`),
//! 3. a `.env` file in the working directory,
//! 4. `MEDIAGATE__<SECTION>__<KEY>` environment variables.
//!
//! List values (`security.allowed_schemes`, `server.cors_origins`) accept a
//! comma separated string from the environment, e.g.
//! `MEDIAGATE__SECURITY__ALLOWED_SCHEMES=https`. Sizes accept human units:
//! `MEDIAGATE__ENGINE__STREAM_CHUNK_SIZE=4MB`.
//!
//! ```no_run
//! use mediagate::config::Config;
//!
//! let config = Config::load().expect("invalid mediagate configuration");
//! println!("binding {}", config.server.bind_addr);
//! ```

mod models;
mod sources;
mod validation;

pub use crate::humanize::ByteSize;
pub use models::{
    CacheConfig, Config, EngineConfig, SecurityConfig, ServerConfig, TaskConfig,
    TelemetryConfig,
};
pub use validation::ValidationError;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to load configuration: {0}")]
    LoadError(#[from] config::ConfigError),

    #[error("Configuration validation failed: {0}")]
    ValidationError(#[from] ValidationError),
}

impl Config {
    /// Read every source and validate the merged result.
    ///
    /// # Errors
    ///
    /// [`ConfigError::LoadError`] for unreadable or mistyped input,
    /// [`ConfigError::ValidationError`] for values outside their range.
    pub fn load() -> Result<Self, ConfigError> {
        let config = sources::load()?;
        validation::validate(&config)?;
        Ok(config)
    }

    /// Same as [`Config::load`] but with an explicit file and no `.env` import.
    pub fn load_from_path(path: std::path::PathBuf) -> Result<Self, ConfigError> {
        let config = sources::load_from_sources(path)?;
        validation::validate(&config)?;
        Ok(config)
    }
}
