//! Environment variable overrides
//!
//! | Variable           | Field               |
//! |--------------------|---------------------|
//! | `RIVER_BACKEND`    | `store.backend`     |
//! | `RIVER_STORE_PATH` | `store.path`        |
//! | `RIVER_BIND`       | `server.bind`       |
//! | `RIVER_APP_SECRET` | `auth.shared_secret`|
//! | `RIVER_LOG_LEVEL`  | `logging.level`     |

use std::path::PathBuf;

use super::river_config::RiverConfig;
use crate::backend::BackendKind;
use crate::error::{RiverError, RiverResult};

/// Apply overrides from the process environment
pub fn apply_process_env(config: &mut RiverConfig) -> RiverResult<()> {
    apply_env_overrides(config, std::env::vars())
}

/// Apply overrides from an explicit set of variables
pub fn apply_env_overrides<I, K, V>(config: &mut RiverConfig, vars: I) -> RiverResult<()>
where
    I: IntoIterator<Item = (K, V)>,
    K: AsRef<str>,
    V: Into<String>,
{
    for (key, value) in vars {
        let value: String = value.into();
        match key.as_ref() {
            "RIVER_BACKEND" => {
                config.store.backend = value
                    .parse::<BackendKind>()
                    .map_err(|e| RiverError::config(format!("Invalid RIVER_BACKEND: {}", e)))?;
            }
            "RIVER_STORE_PATH" if !value.is_empty() => {
                config.store.path = Some(PathBuf::from(value));
            }
            "RIVER_BIND" if !value.is_empty() => {
                config.server.bind = value;
            }
            "RIVER_APP_SECRET" => {
                config.auth.shared_secret = (!value.is_empty()).then_some(value);
            }
            "RIVER_LOG_LEVEL" if !value.is_empty() => {
                config.logging.level = value;
            }
            _ => {}
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_env_overrides() {
        let mut config = RiverConfig::default();
        apply_env_overrides(
            &mut config,
            [
                ("RIVER_BACKEND", "memory"),
                ("RIVER_STORE_PATH", "/var/lib/river"),
                ("RIVER_BIND", "0.0.0.0:8080"),
                ("RIVER_APP_SECRET", "hunter2"),
                ("RIVER_LOG_LEVEL", "debug"),
                ("UNRELATED", "ignored"),
            ],
        )
        .unwrap();

        assert_eq!(config.store.backend, BackendKind::Memory);
        assert_eq!(config.store.path, Some(PathBuf::from("/var/lib/river")));
        assert_eq!(config.server.bind, "0.0.0.0:8080");
        assert_eq!(config.auth.shared_secret.as_deref(), Some("hunter2"));
        assert_eq!(config.logging.level, "debug");
    }

    #[test]
    fn test_invalid_backend_rejected() {
        let mut config = RiverConfig::default();
        let result = apply_env_overrides(&mut config, [("RIVER_BACKEND", "redis")]);
        assert!(matches!(result, Err(RiverError::Config(_))));
    }

    #[test]
    fn test_empty_secret_clears() {
        let mut config = RiverConfig::default();
        config.auth.shared_secret = Some("old".into());
        apply_env_overrides(&mut config, [("RIVER_APP_SECRET", "")]).unwrap();
        assert!(config.auth.shared_secret.is_none());
    }
}
