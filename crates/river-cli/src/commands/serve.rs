//! HTTP transport command

use anyhow::{Context, Result};
use river_core::backend::teardown_global;
use river_core::RiverConfig;
use river_cli::server;
use tracing::info;

pub async fn execute(config: &RiverConfig) -> Result<()> {
    let client = super::client(config).await?;
    info!(
        backend = ?config.store.backend,
        routes = ?client.router().names().collect::<Vec<_>>(),
        "Stream engine ready"
    );
    server::serve(client, &config.server).await?;
    teardown_global().await.context("Failed to close the log store")
}
