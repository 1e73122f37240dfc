//! Configuration management for River

mod env_loader;
mod file_loader;
mod logging_config;
mod river_config;
mod validation;

use std::path::Path;

pub use env_loader::{apply_env_overrides, apply_process_env};
pub use file_loader::load_from_file;
pub use logging_config::LoggingConfig;
pub use river_config::{
    AuthConfig, RegistryConfig, RiverConfig, RunnerConfig, ServerConfig, StoreConfig,
    SweeperConfig,
};
pub use validation::validate;

use crate::error::RiverResult;

impl RiverConfig {
    /// Load a config file (defaults when absent), apply environment
    /// overrides, then validate.
    pub fn load(path: Option<&Path>) -> RiverResult<Self> {
        let mut config = match path {
            Some(path) => load_from_file(path)?,
            None => Self::default(),
        };
        apply_process_env(&mut config)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> RiverResult<()> {
        validate(self)
    }

    pub fn to_toml(&self) -> RiverResult<String> {
        toml::to_string_pretty(self)
            .map_err(|e| crate::error::RiverError::config(format!("Failed to render config: {}", e)))
    }
}
