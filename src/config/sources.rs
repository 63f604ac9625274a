use super::models::Config;
use config::{ConfigError, Environment, File};
use std::env;
use std::path::PathBuf;

const CONFIG_ENV_VAR: &str = "MEDIAGATE_CONFIG";
const DEFAULT_CONFIG_PATH: &str = "config/mediagate.toml";
const ENV_PREFIX: &str = "MEDIAGATE";
const ENV_SEPARATOR: &str = "__";
const LIST_KEYS: [&str; 2] = ["security.allowed_schemes", "server.cors_origins"];

/// Resolve the config file path from `MEDIAGATE_CONFIG`, import `.env`, then
/// layer struct defaults, the TOML file and `MEDIAGATE__*` variables.
pub fn load() -> Result<Config, ConfigError> {
    // A missing .env is normal outside development
    let _ = dotenvy::dotenv();

    let config_path = env::var(CONFIG_ENV_VAR)
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from(DEFAULT_CONFIG_PATH));

    load_from_sources(config_path)
}

/// Defaults, then `config_path` when present, then the environment.
pub fn load_from_sources(config_path: PathBuf) -> Result<Config, ConfigError> {
    let mut builder = config::Config::builder();

    if config_path.is_file() {
        tracing::info!(path = %config_path.display(), "Reading config file");
        builder = builder.add_source(File::from(config_path).required(false));
    } else {
        tracing::debug!(path = %config_path.display(), "No config file, using defaults");
    }

    // MEDIAGATE__ENGINE__CONCURRENT_FRAGMENTS -> engine.concurrent_fragments
    // MEDIAGATE__SECURITY__ALLOWED_SCHEMES=http,https -> security.allowed_schemes
    let mut environment = Environment::with_prefix(ENV_PREFIX)
        .separator(ENV_SEPARATOR)
        .list_separator(",")
        .try_parsing(true);
    for key in LIST_KEYS {
        environment = environment.with_list_parse_key(key);
    }
    builder = builder.add_source(environment);

    builder.build()?.try_deserialize()
}
