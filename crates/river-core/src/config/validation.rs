//! Configuration validation

use std::time::Duration;

use super::river_config::RiverConfig;
use crate::error::{RiverError, RiverResult};

const LOG_LEVELS: &[&str] = &["trace", "debug", "info", "warn", "error"];
const LOG_FORMATS: &[&str] = &["pretty", "compact", "json"];

/// Reject settings that cannot work together
pub fn validate(config: &RiverConfig) -> RiverResult<()> {
    let mut errors = Vec::new();

    if config.store.read_batch_size == 0 {
        errors.push("store.read_batch_size must be greater than 0".to_string());
    }
    if config.store.poll_interval.is_zero() {
        errors.push("store.poll_interval must be greater than 0".to_string());
    }
    if config.registry.lease_ttl.is_zero() {
        errors.push("registry.lease_ttl must be greater than 0".to_string());
    }
    if config.registry.heartbeat_interval.is_zero()
        || config.registry.heartbeat_interval >= config.registry.lease_ttl
    {
        errors.push(format!(
            "registry.heartbeat_interval ({:?}) must be non-zero and shorter than registry.lease_ttl ({:?})",
            config.registry.heartbeat_interval, config.registry.lease_ttl
        ));
    }
    if config.retry.max_attempts == 0 {
        errors.push("retry.max_attempts must be at least 1".to_string());
    }
    if config.retry.backoff_multiplier < 1.0 {
        errors.push("retry.backoff_multiplier must be at least 1.0".to_string());
    }
    if config.runner.max_run_duration.is_zero() {
        errors.push("runner.max_run_duration must be greater than 0".to_string());
    }
    if config.runner.pull_timeout == Some(Duration::ZERO) {
        errors.push("runner.pull_timeout must be greater than 0 when set".to_string());
    }
    if config.sweeper.enabled && config.sweeper.interval.is_zero() {
        errors.push("sweeper.interval must be greater than 0".to_string());
    }
    if !config.server.base_path.starts_with('/') {
        errors.push("server.base_path must start with '/'".to_string());
    }
    if !LOG_LEVELS.contains(&config.logging.level.to_ascii_lowercase().as_str()) {
        errors.push(format!("logging.level '{}' is not recognized", config.logging.level));
    }
    if !LOG_FORMATS.contains(&config.logging.format.as_str()) {
        errors.push(format!(
            "logging.format '{}' must be one of {}",
            config.logging.format,
            LOG_FORMATS.join(", ")
        ));
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(RiverError::config(errors.join("; ")))
    }
}
