//! Resume a stored session

use anyhow::{Result, bail};
use river_core::RiverConfig;
use river_sdk::StreamOutcome;
use std::time::Duration;

use super::output::{EventPrinter, report};

pub async fn execute(config: &RiverConfig, token: &str, json: bool) -> Result<()> {
    let client = super::client(config).await?;
    let mut printer = EventPrinter::new(json);
    let outcome = client.resume_with_callbacks(token, &mut printer).await?;
    report(&outcome, json);
    super::finish(&client, Duration::ZERO).await?;

    match outcome {
        StreamOutcome::Failed(frame) => bail!("Stream failed: {}", frame.message),
        _ => Ok(()),
    }
}
