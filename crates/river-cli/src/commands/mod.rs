//! CLI commands

pub mod config;
pub mod output;
pub mod resume;
pub mod run;
pub mod serve;
pub mod sessions;

use anyhow::{Context, Result};
use river_core::backend::{init_global_from_config, teardown_global};
use river_core::{RiverConfig, StreamEngine};
use river_sdk::RiverClient;
use std::time::Duration;

use river_cli::streams;

/// Install the process-wide backend and build an engine with the demo routes
pub async fn client(config: &RiverConfig) -> Result<RiverClient> {
    let backend = init_global_from_config(&config.store)
        .await
        .context("Failed to open the log store")?;
    let engine = StreamEngine::with_backend(backend, config);
    Ok(RiverClient::new(engine, streams::demo_router()))
}

/// Let runs hosted by this process write their terminal records, then tear
/// down the process-wide backend
pub async fn finish(client: &RiverClient, grace: Duration) -> Result<()> {
    let engine = client.engine();
    let deadline = tokio::time::Instant::now() + grace;
    while !engine.active_sessions().is_empty() && tokio::time::Instant::now() < deadline {
        tokio::time::sleep(Duration::from_millis(100)).await;
    }
    engine.shutdown(Duration::from_secs(5)).await;
    teardown_global().await.context("Failed to close the log store")
}
