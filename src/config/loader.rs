//! Configuration Loader
//!
//! Layers configuration sources with the `config` crate: compiled defaults, then
//! an optional file (format picked from its extension), then `PUBLISHER_*`
//! environment variables. Nested keys use `__`, e.g. `PUBLISHER_BACKOFF__MAX_DELAY_MILLIS`.

use super::error::{ConfigResult, ConfigurationError};
use super::PublisherConfig;
use config::{Config, Environment, File};
use std::path::{Path, PathBuf};
use tracing::{debug, info};

const ENV_PREFIX: &str = "PUBLISHER";

#[derive(Debug, Clone)]
pub struct ConfigLoader {
    file: Option<PathBuf>,
    file_required: bool,
    env_prefix: String,
}

impl Default for ConfigLoader {
    fn default() -> Self {
        Self::new()
    }
}

impl ConfigLoader {
    pub fn new() -> Self {
        Self {
            file: None,
            file_required: false,
            env_prefix: ENV_PREFIX.to_string(),
        }
    }

    /// Read settings from `path` if it exists
    pub fn with_file(mut self, path: impl AsRef<Path>) -> Self {
        self.file = Some(path.as_ref().to_path_buf());
        self
    }

    /// Fail when the configured file is missing
    pub fn require_file(mut self, required: bool) -> Self {
        self.file_required = required;
        self
    }

    /// Override the environment variable prefix (mainly for tests)
    pub fn with_env_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.env_prefix = prefix.into();
        self
    }

    /// Merge all sources, deserialize and validate
    pub fn load(&self) -> ConfigResult<PublisherConfig> {
        let defaults = Config::try_from(&PublisherConfig::default())?;

        let mut builder = Config::builder().add_source(defaults);

        if let Some(path) = &self.file {
            if self.file_required && !path.exists() {
                return Err(ConfigurationError::file_read_error(
                    path.display().to_string(),
                    "file does not exist",
                ));
            }
            debug!(path = %path.display(), "Adding configuration file source");
            builder = builder.add_source(File::from(path.as_path()).required(self.file_required));
        }

        builder = builder.add_source(
            Environment::with_prefix(&self.env_prefix)
                .prefix_separator("_")
                .separator("__")
                .try_parsing(true),
        );

        let config: PublisherConfig = builder
            .build()?
            .try_deserialize()
            .map_err(ConfigurationError::parse_error)?;

        config.validate()?;

        info!(
            confirms_enabled = config.confirms_enabled,
            max_retries = config.max_retries,
            confirm_timeout_seconds = config.confirm_timeout_seconds,
            close_timeout_millis = config.close_timeout_millis,
            "Publisher configuration loaded"
        );

        Ok(config)
    }
}
