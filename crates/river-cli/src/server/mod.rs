//! HTTP transport
//!
//! `POST {base}` starts a stream and `GET {base}?resumeKey=...` resumes one,
//! both answering with Server-Sent Events. `DELETE {base}/sessions/{id}`
//! aborts a run hosted by this process.

mod error;
mod handlers;
mod sse;

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use axum::Router;
use axum::routing::{delete, get, post};
use river_core::CodecRegistry;
use river_core::config::ServerConfig;
use river_sdk::RiverClient;
use serde_json::Value;
use tokio::net::TcpListener;
use tokio::signal;
use tracing::{info, warn};

use crate::streams::chunk_codecs;

pub use error::ApiError;
pub use handlers::{ResumeQuery, SECRET_HEADER, StartBody};

/// How long shutdown waits for runs to write their terminal records
const SHUTDOWN_GRACE: Duration = Duration::from_secs(10);

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    pub client: RiverClient,
    pub keep_alive: Duration,
    /// Tags whose bodies are inlined as JSON in chunk events
    pub codecs: Arc<CodecRegistry<Value>>,
}

impl AppState {
    pub fn new(client: RiverClient, config: &ServerConfig) -> Self {
        Self {
            client,
            keep_alive: config.keep_alive,
            codecs: Arc::new(chunk_codecs()),
        }
    }

    pub fn with_codecs(mut self, codecs: CodecRegistry<Value>) -> Self {
        self.codecs = Arc::new(codecs);
        self
    }
}

pub fn build_app(state: AppState, base_path: &str) -> Router {
    let base = base_path.trim_end_matches('/');
    let base = if base.is_empty() { "/" } else { base };
    let sessions = format!("{}/sessions/{{session_id}}", base.trim_end_matches('/'));

    Router::new()
        .route(
            base,
            post(handlers::start_stream).get(handlers::resume_stream),
        )
        .route(&sessions, delete(handlers::abort_session))
        .route("/healthz", get(handlers::healthz))
        .with_state(state)
}

/// Serve until Ctrl+C or SIGTERM, then abort every run and wait for their
/// terminal records so open event streams can finish. The backend stays
/// open; closing it is up to the caller.
pub async fn serve(client: RiverClient, config: &ServerConfig) -> Result<()> {
    let engine = client.engine().clone();
    let sweeper = engine.spawn_sweeper();

    let app = build_app(AppState::new(client, config), &config.base_path);
    let listener = TcpListener::bind(&config.bind)
        .await
        .with_context(|| format!("Failed to bind {}", config.bind))?;
    info!(addr = %config.bind, base_path = %config.base_path, "Starting server");

    let shutdown_engine = engine.clone();
    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            shutdown_signal().await;
            if !shutdown_engine.shutdown(SHUTDOWN_GRACE).await {
                warn!("Some runs did not finish before the shutdown deadline");
            }
        })
        .await
        .context("Server error")?;

    if let Some(handle) = sweeper {
        let _ = handle.await;
    }
    info!("Server stopped");
    Ok(())
}

pub async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            warn!("Failed to install Ctrl+C handler: {}", e);
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                warn!("Failed to install SIGTERM handler: {}", e);
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("Received Ctrl+C, shutting down"),
        _ = terminate => info!("Received SIGTERM, shutting down"),
    }
}
