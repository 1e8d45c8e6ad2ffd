//! Configuration management
//!
//! Layers built-in defaults, an optional file and `SOULMACRO_` environment
//! overrides (`SOULMACRO_ENGINE__MAX_LOOPS=3`) with the `config` crate.

use config::{Config, Environment, File};
use macro_engine::EngineConfig;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use tracing::debug;

use crate::errors::ConfigError;

pub const ENV_PREFIX: &str = "SOULMACRO";

/// Where profiler CSV files are written
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProfilerConfig {
    /// Base directory for relative `!FILE_PROFILER` targets; current
    /// directory when unset
    pub output_dir: Option<PathBuf>,
}

/// Application configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub engine: EngineConfig,
    pub profiler: ProfilerConfig,
    pub log_level: String,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            engine: EngineConfig::default(),
            profiler: ProfilerConfig::default(),
            log_level: "info".to_string(),
        }
    }
}

/// `$CONFIG_DIR/soulmacro/config` (any supported extension)
pub fn default_config_stem() -> Option<PathBuf> {
    dirs::config_dir().map(|dir| dir.join("soulmacro").join("config"))
}

impl AppConfig {
    /// Load from `path` (required when given) or the default location
    /// (optional), then the process environment
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        Self::load_with_env(path, None)
    }

    /// Like [`AppConfig::load`] with an explicit environment map instead of
    /// the process environment
    pub fn load_with_env(
        path: Option<&Path>,
        env: Option<HashMap<String, String>>,
    ) -> Result<Self, ConfigError> {
        let mut builder = Config::builder().add_source(Config::try_from(&AppConfig::default())?);

        match path {
            Some(path) => {
                debug!(path = %path.display(), "loading configuration file");
                builder = builder.add_source(File::from(path).required(true));
            }
            None => {
                if let Some(stem) = default_config_stem() {
                    builder = builder
                        .add_source(File::with_name(&stem.to_string_lossy()).required(false));
                }
            }
        }

        builder = builder.add_source(
            Environment::with_prefix(ENV_PREFIX)
                .prefix_separator("_")
                .separator("__")
                .try_parsing(true)
                .source(env),
        );

        let config: AppConfig = builder.build()?.try_deserialize()?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.engine.max_loops == 0 {
            return Err(ConfigError::Invalid("engine.max_loops must be at least 1".into()));
        }
        if self.engine.min_retry_interval_ms > self.engine.retry_interval_ms {
            return Err(ConfigError::Invalid(
                "engine.min_retry_interval_ms exceeds engine.retry_interval_ms".into(),
            ));
        }
        Ok(())
    }
}
