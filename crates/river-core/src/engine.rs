//! Stream engine facade
//!
//! Wires the log store, session registry, stream runner and subscription
//! multiplexer together behind the transport-facing operations: start,
//! resume, abort, sweep and shutdown.

use chrono::Utc;
use dashmap::DashMap;
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::{MissedTickBehavior, interval};
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, info, warn};

use crate::auth::{AllowAll, AuthorizationGate, RequestContext, SharedSecretGate};
use crate::backend::{self, LogBackend};
use crate::config::{RiverConfig, SweeperConfig};
use crate::error::{RiverError, RiverResult};
use crate::frames::FatalErrorFrame;
use crate::producer::Producer;
use crate::registry::SessionRegistry;
use crate::runner::{AbortReason, Presence, RunControl, RunRequest, StreamRunner};
use crate::store::{LogStore, SessionSummary, SweepReport};
use crate::subscription::{OpenOptions, Subscription, SubscriptionMultiplexer};
use crate::token::ResumptionToken;
use crate::types::{ChunkRecord, FrameKind, SessionId, SessionStatus};

/// A request to start a new stream
pub struct StartRequest {
    /// Router key of the producer
    pub stream: String,
    pub input: Value,
    pub producer: Arc<dyn Producer>,
    pub context: RequestContext,
    pub resumable: bool,
    /// Client-chosen session id. A fresh one is generated when absent.
    pub session_id: Option<SessionId>,
}

impl StartRequest {
    pub fn new(stream: impl Into<String>, producer: Arc<dyn Producer>) -> Self {
        Self {
            stream: stream.into(),
            input: Value::Null,
            producer,
            context: RequestContext::default(),
            resumable: true,
            session_id: None,
        }
    }

    pub fn with_input(mut self, input: Value) -> Self {
        self.input = input;
        self
    }

    pub fn with_context(mut self, context: RequestContext) -> Self {
        self.context = context;
        self
    }

    pub fn with_resumable(mut self, resumable: bool) -> Self {
        self.resumable = resumable;
        self
    }

    pub fn with_session_id(mut self, session_id: SessionId) -> Self {
        self.session_id = Some(session_id);
        self
    }
}

/// Result of one sweeper pass
#[derive(Debug, Clone, Default)]
pub struct SweepOutcome {
    /// Running sessions without a live runner that were closed with a
    /// `SessionAbandoned` fatal error
    pub abandoned: Vec<SessionId>,
    pub expired: SweepReport,
}

struct ActiveRun {
    control: RunControl,
    presence: Presence,
}

struct EngineInner {
    store: LogStore,
    registry: SessionRegistry,
    runner: StreamRunner,
    mux: SubscriptionMultiplexer,
    sweeper: SweeperConfig,
    active: DashMap<SessionId, ActiveRun>,
    tracker: TaskTracker,
    shutdown: CancellationToken,
}

/// Resumable stream engine. Cheap to clone.
#[derive(Clone)]
pub struct StreamEngine {
    inner: Arc<EngineInner>,
}

impl StreamEngine {
    pub fn new(
        backend: Arc<dyn LogBackend>,
        gate: Arc<dyn AuthorizationGate>,
        config: &RiverConfig,
    ) -> Self {
        let store = LogStore::new(backend, config.store.clone(), config.retry.clone());
        let registry = SessionRegistry::new(store.clone(), config.registry.clone());
        let runner = StreamRunner::new(
            store.clone(),
            registry.clone(),
            gate,
            config.runner.clone(),
        );
        let mux = SubscriptionMultiplexer::new(store.clone(), registry.clone());

        Self {
            inner: Arc::new(EngineInner {
                store,
                registry,
                runner,
                mux,
                sweeper: config.sweeper.clone(),
                active: DashMap::new(),
                tracker: TaskTracker::new(),
                shutdown: CancellationToken::new(),
            }),
        }
    }

    /// Open the configured backend and pick the gate from the auth section:
    /// a shared-secret gate when a secret is set, allow-all otherwise.
    pub async fn from_config(config: &RiverConfig) -> RiverResult<Self> {
        let backend = backend::open_backend(&config.store).await?;
        Ok(Self::with_backend(backend, config))
    }

    /// Engine over an already opened backend, gate chosen as in
    /// [`from_config`](Self::from_config)
    pub fn with_backend(backend: Arc<dyn LogBackend>, config: &RiverConfig) -> Self {
        let gate: Arc<dyn AuthorizationGate> = match &config.auth.shared_secret {
            Some(secret) => Arc::new(SharedSecretGate::new(secret.clone())),
            None => Arc::new(AllowAll),
        };
        Self::new(backend, gate, config)
    }

    pub fn store(&self) -> &LogStore {
        &self.inner.store
    }

    pub fn registry(&self) -> &SessionRegistry {
        &self.inner.registry
    }

    /// Start a stream and subscribe to it.
    ///
    /// The producer runs on a tracked background task that outlives the
    /// returned subscription. A denied request yields a subscription with a
    /// single `AuthorizationDenied` fatal error and nothing else.
    pub async fn start(&self, request: StartRequest) -> RiverResult<Subscription> {
        let inner = &self.inner;
        if inner.shutdown.is_cancelled() {
            return Err(RiverError::internal("engine is shutting down"));
        }

        let session_id = request.session_id.unwrap_or_else(SessionId::generate);
        let control = RunControl::child_of(&inner.shutdown);
        let prepared = inner
            .runner
            .start(
                RunRequest {
                    session_id: session_id.clone(),
                    stream: request.stream,
                    input: request.input,
                    producer: request.producer,
                    context: request.context,
                    resumable: request.resumable,
                },
                control.clone(),
            )
            .await?;

        if prepared.is_denied() {
            let subscription = inner.mux.open(&session_id, 0, OpenOptions::new()).await?;
            prepared.run(Presence::new()).await;
            return Ok(subscription);
        }

        let presence = Presence::new();
        let options = OpenOptions::new()
            .announce(true)
            .with_presence(presence.clone());
        let opened = inner.mux.open(&session_id, 0, options).await;
        if opened.is_err() {
            control.abort(AbortReason::Requested);
        }

        inner.active.insert(
            session_id.clone(),
            ActiveRun {
                control,
                presence: presence.clone(),
            },
        );
        let engine = self.inner.clone();
        inner.tracker.spawn(async move {
            let report = prepared.run(presence).await;
            engine.active.remove(&report.session_id);
            debug!(
                session_id = %report.session_id,
                state = %report.state,
                records = report.records,
                "Background run finished"
            );
        });

        opened
    }

    /// Reattach to a session with a resumption token.
    ///
    /// The token must decode, name a resumable session that still exists, and
    /// point inside its log.
    pub async fn resume(&self, token: &str) -> RiverResult<Subscription> {
        let token = ResumptionToken::decode(token)?;
        let session_id = token.session_id();
        let meta = self
            .inner
            .store
            .session(session_id)
            .await?
            .ok_or_else(|| RiverError::terminated(session_id, "session is unknown or past its retention window"))?;
        if !meta.resumable {
            return Err(RiverError::terminated(session_id, "session is not resumable"));
        }

        let mut options = OpenOptions::new();
        if let Some(run) = self.inner.active.get(session_id) {
            options = options.with_presence(run.presence.clone());
        }
        info!(session_id = %session_id, offset = token.offset(), "Resuming session");
        self.inner.mux.open(session_id, token.offset(), options).await
    }

    /// Request that a run hosted by this engine stops. Returns false when
    /// the session is not running here.
    pub fn abort(&self, session_id: &SessionId) -> bool {
        match self.inner.active.get(session_id) {
            Some(run) => {
                let first = run.control.abort(AbortReason::Requested);
                if first {
                    info!(session_id = %session_id, "Abort requested");
                }
                true
            }
            None => false,
        }
    }

    /// Sessions whose runner lives in this engine
    pub fn active_sessions(&self) -> Vec<SessionId> {
        self.inner
            .active
            .iter()
            .map(|entry| entry.key().clone())
            .collect()
    }

    pub async fn status(&self, session_id: &SessionId) -> RiverResult<SessionStatus> {
        self.inner.store.get_status(session_id).await
    }

    pub async fn list_sessions(&self) -> RiverResult<Vec<SessionSummary>> {
        self.inner.store.list_sessions().await
    }

    /// Close abandoned sessions, then delete finished ones past retention
    pub async fn sweep(&self) -> RiverResult<SweepOutcome> {
        let mut outcome = SweepOutcome::default();

        for meta in self.inner.registry.abandoned().await? {
            if self.inner.active.contains_key(&meta.id) {
                continue;
            }
            match self.finalize_abandoned(&meta.id).await {
                Ok(()) => outcome.abandoned.push(meta.id),
                Err(RiverError::AlreadyOwned { .. }) | Err(RiverError::SessionTerminated { .. }) => {
                    debug!(session_id = %meta.id, "Session changed hands during sweep, skipping");
                }
                Err(e) => {
                    warn!(session_id = %meta.id, error = %e, "Failed to finalize abandoned session");
                }
            }
        }

        outcome.expired = self.inner.store.sweep_expired(Utc::now()).await?;
        Ok(outcome)
    }

    async fn finalize_abandoned(&self, session_id: &SessionId) -> RiverResult<()> {
        let store = &self.inner.store;
        let guard = self.inner.registry.claim(session_id).await?;

        let cause = RiverError::SessionAbandoned {
            session_id: session_id.to_string(),
        };
        let frame = FatalErrorFrame::from_error(&cause);
        let sequence = store.length(session_id).await?;
        store
            .append_at(
                session_id,
                ChunkRecord::new(sequence, FrameKind::FatalError, frame.to_payload()?),
                Some(guard.lost()),
            )
            .await?;
        store
            .finish_session(session_id, SessionStatus::Failed, Some(frame.classification))
            .await?;
        warn!(session_id = %session_id, sequence, "Closed abandoned session");

        guard.release().await
    }

    /// Run [`sweep`](Self::sweep) periodically until shutdown. Returns `None`
    /// when the sweeper is disabled.
    pub fn spawn_sweeper(&self) -> Option<JoinHandle<()>> {
        if !self.inner.sweeper.enabled {
            return None;
        }
        let engine = self.clone();
        let period = self.inner.sweeper.interval;
        let shutdown = self.inner.shutdown.clone();

        Some(tokio::spawn(async move {
            let mut ticker = interval(period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    _ = shutdown.cancelled() => break,
                    _ = ticker.tick() => {
                        match engine.sweep().await {
                            Ok(outcome) => debug!(
                                abandoned = outcome.abandoned.len(),
                                removed = outcome.expired.removed.len(),
                                "Sweep finished"
                            ),
                            Err(e) => warn!(error = %e, "Sweep failed"),
                        }
                    }
                }
            }
            debug!("Sweeper stopped");
        }))
    }

    pub fn is_shutting_down(&self) -> bool {
        self.inner.shutdown.is_cancelled()
    }

    /// Abort every run and wait for their terminal records. Returns false if
    /// runs were still going when `timeout` elapsed.
    pub async fn shutdown(&self, timeout: Duration) -> bool {
        let inner = &self.inner;
        let active = inner.active.len();
        info!(active, "Shutting down stream engine");

        inner.shutdown.cancel();
        inner.tracker.close();
        match tokio::time::timeout(timeout, inner.tracker.wait()).await {
            Ok(()) => true,
            Err(_) => {
                warn!(
                    remaining = inner.tracker.len(),
                    "Runs still active after shutdown timeout"
                );
                false
            }
        }
    }
}
