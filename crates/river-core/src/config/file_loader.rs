//! File-based configuration loading

use std::path::Path;

use super::river_config::RiverConfig;
use crate::error::{RiverError, RiverResult};

/// Load configuration from a file.
///
/// TOML is expected unless the extension is `.json`. A missing file yields
/// the defaults.
pub fn load_from_file(path: &Path) -> RiverResult<RiverConfig> {
    if !path.exists() {
        return Ok(RiverConfig::default());
    }

    let content = std::fs::read_to_string(path).map_err(|e| {
        RiverError::config(format!(
            "Failed to read config file '{}': {}",
            path.display(),
            e
        ))
    })?;

    parse_config(&content, path)
}

fn parse_config(content: &str, path: &Path) -> RiverResult<RiverConfig> {
    match path.extension().and_then(|s| s.to_str()) {
        Some("json") => serde_json::from_str(content).map_err(|e| {
            RiverError::config(format!(
                "Failed to parse JSON config '{}': {}",
                path.display(),
                e
            ))
        }),
        _ => toml::from_str(content).map_err(|e| {
            RiverError::config(format!(
                "Failed to parse TOML config '{}': {}",
                path.display(),
                e
            ))
        }),
    }
}
