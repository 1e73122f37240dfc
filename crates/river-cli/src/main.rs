//! River CLI
//!
//! ```bash
//! river serve --bind 0.0.0.0:3000
//! river run askQuestion '{"question": "What is a river?"}' --detach-after 3
//! river resume <token>
//! ```

mod args;
mod commands;
mod router;

use anyhow::{Context, Result};
use clap::Parser;
use river_cli::logging;
use river_core::RiverConfig;

use args::Cli;

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let mut config =
        RiverConfig::load(cli.global.config.as_deref()).context("Failed to load configuration")?;
    if let Some(level) = &cli.global.log_level {
        config.logging.level = level.clone();
    }
    if let Some(format) = cli.global.log_format {
        config.logging.format = format.as_str().to_string();
    }
    logging::init(&config.logging)?;

    router::route(cli, config).await
}
