//! Engine configuration sections

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

use super::logging_config::LoggingConfig;
use crate::backend::BackendKind;
use crate::recovery::RetryConfig;

/// Top-level configuration for the stream engine and its binaries
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct RiverConfig {
    pub store: StoreConfig,
    pub retry: RetryConfig,
    pub registry: RegistryConfig,
    pub runner: RunnerConfig,
    pub sweeper: SweeperConfig,
    pub auth: AuthConfig,
    pub server: ServerConfig,
    pub logging: LoggingConfig,
}

/// Durable log store settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    pub backend: BackendKind,
    /// Base directory for the file backend. Defaults to `~/.river/streams`.
    pub path: Option<PathBuf>,
    /// Records fetched per backend read while replaying
    pub read_batch_size: usize,
    /// How often live tails re-check the log when no change notification arrives
    #[serde(with = "humantime_serde")]
    pub poll_interval: Duration,
    /// How long finished sessions are kept after their last activity
    #[serde(with = "humantime_serde")]
    pub retention: Duration,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            backend: BackendKind::File,
            path: None,
            read_batch_size: 256,
            poll_interval: Duration::from_millis(500),
            retention: Duration::from_secs(24 * 60 * 60),
        }
    }
}

impl StoreConfig {
    pub fn memory() -> Self {
        Self {
            backend: BackendKind::Memory,
            ..Default::default()
        }
    }

    pub fn file(path: impl Into<PathBuf>) -> Self {
        Self {
            backend: BackendKind::File,
            path: Some(path.into()),
            ..Default::default()
        }
    }

    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    pub fn with_read_batch_size(mut self, size: usize) -> Self {
        self.read_batch_size = size;
        self
    }

    pub fn with_retention(mut self, retention: Duration) -> Self {
        self.retention = retention;
        self
    }
}

/// Session ownership settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RegistryConfig {
    #[serde(with = "humantime_serde")]
    pub lease_ttl: Duration,
    /// Must be shorter than `lease_ttl`
    #[serde(with = "humantime_serde")]
    pub heartbeat_interval: Duration,
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            lease_ttl: Duration::from_secs(15),
            heartbeat_interval: Duration::from_secs(5),
        }
    }
}

impl RegistryConfig {
    pub fn new(lease_ttl: Duration, heartbeat_interval: Duration) -> Self {
        Self {
            lease_ttl,
            heartbeat_interval,
        }
    }
}

/// Background runner budget
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RunnerConfig {
    /// Hard lifetime budget for one run
    #[serde(with = "humantime_serde")]
    pub max_run_duration: Duration,
    /// Abort a run once no subscriber has been attached for this long.
    /// `None` keeps detached runs going until the lifetime budget.
    #[serde(with = "humantime_serde")]
    pub detached_grace: Option<Duration>,
    /// Fail the run if the producer yields nothing for this long
    #[serde(with = "humantime_serde")]
    pub pull_timeout: Option<Duration>,
}

impl Default for RunnerConfig {
    fn default() -> Self {
        Self {
            max_run_duration: Duration::from_secs(10 * 60),
            detached_grace: Some(Duration::from_secs(5 * 60)),
            pull_timeout: None,
        }
    }
}

impl RunnerConfig {
    pub fn with_max_run_duration(mut self, duration: Duration) -> Self {
        self.max_run_duration = duration;
        self
    }

    pub fn with_detached_grace(mut self, grace: Option<Duration>) -> Self {
        self.detached_grace = grace;
        self
    }

    pub fn with_pull_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.pull_timeout = timeout;
        self
    }
}

/// Retention and abandonment sweeper
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SweeperConfig {
    pub enabled: bool,
    #[serde(with = "humantime_serde")]
    pub interval: Duration,
}

impl Default for SweeperConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            interval: Duration::from_secs(60),
        }
    }
}

/// Authorization settings for the HTTP transport
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AuthConfig {
    /// Application secret clients must present. Unset means no check.
    pub shared_secret: Option<String>,
}

/// HTTP transport settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub bind: String,
    /// Route prefix for the stream endpoint
    pub base_path: String,
    /// Interval between SSE keep-alive comments
    #[serde(with = "humantime_serde")]
    pub keep_alive: Duration,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: "127.0.0.1:3000".to_string(),
            base_path: "/api/river".to_string(),
            keep_alive: Duration::from_secs(15),
        }
    }
}
