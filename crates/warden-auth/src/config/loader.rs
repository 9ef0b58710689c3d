//! Configuration loading utilities.

use super::types::WardenConfig;
use anyhow::{bail, Context, Result};
use std::path::{Path, PathBuf};
use tracing::info;

/// Environment variable naming an optional configuration file.
pub const CONFIG_PATH_ENV: &str = "WARDEN_CONFIG";

/// Layered loader: built-in defaults, then an optional file, then the
/// environment (`WARDEN__AUTH__RATE_LIMIT__MAX_ATTEMPTS=10`).
pub struct ConfigLoader {
    config_path: Option<PathBuf>,
    env_prefix: String,
}

impl ConfigLoader {
    pub fn new() -> Self {
        Self {
            config_path: None,
            env_prefix: "WARDEN".to_string(),
        }
    }

    /// Set config file path. The format follows the file extension.
    pub fn with_config_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.config_path = Some(path.into());
        self
    }

    /// Set environment variable prefix.
    pub fn with_env_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.env_prefix = prefix.into();
        self
    }

    pub fn load(&self) -> Result<WardenConfig> {
        let mut builder = ::config::Config::builder().add_source(::config::File::from_str(
            include_str!("defaults.toml"),
            ::config::FileFormat::Toml,
        ));

        if let Some(path) = &self.config_path {
            if !Path::new(path).exists() {
                bail!("config file {} does not exist", path.display());
            }
            info!(path = %path.display(), "Loading config file");
            builder = builder.add_source(::config::File::from(path.clone()));
        }

        builder = builder.add_source(
            ::config::Environment::with_prefix(&self.env_prefix)
                .separator("__")
                .try_parsing(true),
        );

        let config = builder
            .build()
            .context("Failed to build configuration")?;

        config
            .try_deserialize()
            .context("Failed to deserialize configuration")
    }
}

impl Default for ConfigLoader {
    fn default() -> Self {
        Self::new()
    }
}

/// Load configuration, taking the file path from `WARDEN_CONFIG` when set.
pub fn load_config() -> Result<WardenConfig> {
    let mut loader = ConfigLoader::new();
    if let Ok(path) = std::env::var(CONFIG_PATH_ENV) {
        loader = loader.with_config_path(path);
    }
    loader.load()
}
