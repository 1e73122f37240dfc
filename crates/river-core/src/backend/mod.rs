//! Storage backends for session logs
//!
//! The durable log store is an adapter over [`LogBackend`]. Two
//! implementations ship: an in-process [`MemoryBackend`] and a directory-per-
//! session [`FileBackend`] that survives restarts.

mod file;
mod global;
mod memory;
#[allow(clippy::module_inception)]
mod r#trait;
mod types;

use std::sync::Arc;

pub use file::FileBackend;
pub use global::{global, init_global, init_global_from_config, teardown_global};
pub use memory::MemoryBackend;
pub use r#trait::LogBackend;
pub use types::{BackendError, BackendKind, Lease, LeaseOutcome};

use crate::config::StoreConfig;

/// Build the backend selected by the store configuration
pub async fn open_backend(config: &StoreConfig) -> Result<Arc<dyn LogBackend>, BackendError> {
    let backend: Arc<dyn LogBackend> = match config.backend {
        BackendKind::Memory => Arc::new(MemoryBackend::new()),
        BackendKind::File => {
            let backend = match &config.path {
                Some(path) => FileBackend::with_path(path.clone()),
                None => FileBackend::new()?,
            };
            tracing::info!(path = %backend.base_path().display(), "Opening file backend");
            Arc::new(backend)
        }
    };
    backend.ping().await?;
    Ok(backend)
}
