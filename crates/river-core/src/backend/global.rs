//! Process-wide backend handle
//!
//! Binaries initialize the backend once at startup and tear it down on
//! shutdown. Library components never reach for the global themselves: they
//! take an `Arc<dyn LogBackend>` so tests can inject their own.

use parking_lot::RwLock;
use std::sync::{Arc, OnceLock};

use super::r#trait::LogBackend;
use super::types::BackendError;
use super::open_backend;
use crate::config::StoreConfig;

static GLOBAL_BACKEND: OnceLock<RwLock<Option<Arc<dyn LogBackend>>>> = OnceLock::new();

fn slot() -> &'static RwLock<Option<Arc<dyn LogBackend>>> {
    GLOBAL_BACKEND.get_or_init(|| RwLock::new(None))
}

/// Install a backend as the process-wide handle, replacing any previous one
pub fn init_global(backend: Arc<dyn LogBackend>) -> Arc<dyn LogBackend> {
    let kind = backend.kind();
    *slot().write() = Some(backend.clone());
    tracing::info!(backend = %kind, "Global log backend initialized");
    backend
}

/// Open the configured backend and install it globally
pub async fn init_global_from_config(
    config: &StoreConfig,
) -> Result<Arc<dyn LogBackend>, BackendError> {
    let backend = open_backend(config).await?;
    Ok(init_global(backend))
}

/// The process-wide backend, if initialized
pub fn global() -> Option<Arc<dyn LogBackend>> {
    slot().read().clone()
}

/// Close and remove the process-wide backend
pub async fn teardown_global() -> Result<(), BackendError> {
    let backend = slot().write().take();
    if let Some(backend) = backend {
        backend.close().await?;
        tracing::info!(backend = %backend.kind(), "Global log backend closed");
    }
    Ok(())
}
