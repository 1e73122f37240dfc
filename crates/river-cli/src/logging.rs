//! Tracing subscriber setup
//!
//! `RUST_LOG` overrides the configured level. Output goes to the log file
//! when one is configured, to stderr otherwise.

use anyhow::{Context, Result};
use river_core::LoggingConfig;
use std::fs::OpenOptions;
use std::sync::Mutex;
use tracing_subscriber::fmt::MakeWriter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Layer, Registry, fmt};

type BoxedLayer = Box<dyn Layer<Registry> + Send + Sync>;

fn format_layer<W>(format: &str, writer: W) -> BoxedLayer
where
    W: for<'a> MakeWriter<'a> + Send + Sync + 'static,
{
    let layer = fmt::layer().with_writer(writer).with_target(false);
    match format {
        "json" => layer.json().boxed(),
        "compact" => layer.compact().boxed(),
        _ => layer.pretty().boxed(),
    }
}

pub fn filter_for(config: &LoggingConfig) -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.level))
}

/// Install the global subscriber. Does nothing when both console and file
/// output are off.
pub fn init(config: &LoggingConfig) -> Result<()> {
    let layer = match &config.log_file {
        Some(path) => {
            let file = OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)
                .with_context(|| format!("Failed to open log file {}", path.display()))?;
            format_layer(&config.format, Mutex::new(file))
        }
        None if config.log_to_console => format_layer(&config.format, std::io::stderr),
        None => return Ok(()),
    };

    tracing_subscriber::registry()
        .with(layer)
        .with(filter_for(config))
        .try_init()
        .context("Failed to install tracing subscriber")
}
