//! Run a stream in-process

use anyhow::{Context, Result, bail};
use river_core::RiverConfig;
use river_sdk::{RequestContext, SessionId, StreamOutcome, drive_until};
use serde_json::Value;
use std::future::pending;
use tracing::debug;

use super::output::{EventPrinter, report};

#[derive(Debug, Clone)]
pub struct RunArgs {
    pub stream: String,
    pub input: String,
    pub credential: Option<String>,
    pub session_id: Option<String>,
    pub detach_after: Option<usize>,
    pub json: bool,
}

pub async fn execute(config: &RiverConfig, args: RunArgs) -> Result<()> {
    let input: Value = serde_json::from_str(&args.input).context("Input must be valid JSON")?;
    let client = super::client(config).await?;

    let mut context = RequestContext::new().with_attribute("origin", "cli");
    if let Some(credential) = args.credential {
        context = context.with_credential(credential);
    }
    let mut request = client
        .router()
        .start_request(&args.stream, input, context)?;
    if let Some(raw) = args.session_id.as_deref() {
        request = request.with_session_id(SessionId::parse(raw)?);
    }
    let subscription = client.engine().start(request).await?;

    let mut printer = EventPrinter::new(args.json);
    let outcome = match args.detach_after {
        Some(count) => {
            let detach = printer.detach_after(count);
            let detach = async move {
                if detach.await.is_err() {
                    pending::<()>().await;
                }
            };
            drive_until(subscription, &mut printer, detach).await
        }
        None => drive_until(subscription, &mut printer, pending()).await,
    };
    debug!(chunks = printer.chunks(), "Stream driven");
    report(&outcome, args.json);

    // A detached run keeps appending; stay up until it has finished so the
    // printed token can be used later.
    super::finish(&client, config.runner.max_run_duration).await?;

    match outcome {
        StreamOutcome::Failed(frame) => bail!("Stream failed: {}", frame.message),
        _ => Ok(()),
    }
}
