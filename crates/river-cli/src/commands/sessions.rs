//! Session inspection commands

use anyhow::Result;
use chrono::Utc;
use river_core::{RiverConfig, SessionSummary};
use std::time::Duration;

/// List every stored session
pub async fn list(config: &RiverConfig) -> Result<()> {
    let client = super::client(config).await?;
    let mut sessions = client.engine().list_sessions().await?;
    sessions.sort_by(|a, b| b.meta.created_at.cmp(&a.meta.created_at));

    if sessions.is_empty() {
        println!("No sessions");
    } else {
        println!(
            "{:<38} {:<20} {:<10} {:>6}  {:<9} {}",
            "SESSION", "STREAM", "STATUS", "CHUNKS", "RESUMABLE", "OWNER"
        );
        for summary in &sessions {
            println!("{}", format_row(summary));
        }
    }

    super::finish(&client, Duration::ZERO).await
}

fn format_row(summary: &SessionSummary) -> String {
    let meta = &summary.meta;
    let now = Utc::now();
    let owner = match &summary.lease {
        Some(lease) if lease.expires_at > now => lease.owner.clone(),
        Some(lease) => format!("{} (expired)", lease.owner),
        None => "-".to_string(),
    };
    let status = match meta.terminal {
        Some(classification) => format!("{}:{}", meta.status, classification.as_str()),
        None => meta.status.to_string(),
    };
    format!(
        "{:<38} {:<20} {:<10} {:>6}  {:<9} {}",
        meta.id,
        meta.stream,
        status,
        summary.length,
        if meta.resumable { "yes" } else { "no" },
        owner
    )
}

/// Close abandoned sessions and delete expired ones
pub async fn sweep(config: &RiverConfig) -> Result<()> {
    let client = super::client(config).await?;
    let outcome = client.engine().sweep().await?;

    for id in &outcome.abandoned {
        println!("closed abandoned session {}", id);
    }
    for id in &outcome.expired.removed {
        println!("removed expired session {}", id);
    }
    println!(
        "{} abandoned, {} removed, {} retained",
        outcome.abandoned.len(),
        outcome.expired.removed.len(),
        outcome.expired.retained
    );

    super::finish(&client, Duration::ZERO).await
}
