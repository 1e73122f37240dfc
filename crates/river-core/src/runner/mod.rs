//! Stream runner
//!
//! Drives one producer to completion in the background. Each emission is
//! persisted before the next one is pulled, and the loop ends with exactly
//! one terminal record: `end` when the producer finishes or the run is
//! aborted, `fatal-error` when anything fails. Subscribers never talk to
//! the runner; they only read the log it writes.

mod control;
mod state;

use futures::StreamExt;
use serde_json::Value;
use std::pin::pin;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, warn};

use control::detached_for;
pub use control::{Presence, PresenceGuard, RunControl};
pub use state::{AbortReason, RunnerState};

use crate::auth::{self, AuthorizationGate, RequestContext};
use crate::config::RunnerConfig;
use crate::error::{ErrorClassification, RiverError, RiverResult};
use crate::frames::{EndFrame, FatalErrorFrame};
use crate::producer::{Emission, EmissionStream, Producer, ProducerContext, ProducerError};
use crate::registry::{OwnershipGuard, SessionRegistry};
use crate::store::LogStore;
use crate::types::{ChunkRecord, FrameKind, Sequence, SessionId, SessionMeta, SessionStatus};

/// Everything needed to start one run
pub struct RunRequest {
    pub session_id: SessionId,
    /// Router key, persisted with the session
    pub stream: String,
    pub input: Value,
    pub producer: Arc<dyn Producer>,
    pub context: RequestContext,
    pub resumable: bool,
}

/// Summary of a finished run
#[derive(Debug, Clone)]
pub struct RunReport {
    pub session_id: SessionId,
    pub state: RunnerState,
    /// Records this run appended, terminal record included
    pub records: u64,
    pub abort_reason: Option<AbortReason>,
    pub error: Option<RiverError>,
}

/// How the pull loop ended
enum LoopExit {
    Completed,
    Failed(RiverError),
    Aborted(AbortReason),
    /// Another runner took over. Nothing more may be written.
    LeaseLost,
}

enum Pull {
    Item(Result<Emission, ProducerError>),
    Exhausted,
    TimedOut(Duration),
}

/// Starts runs against a shared store and registry
#[derive(Clone)]
pub struct StreamRunner {
    store: LogStore,
    registry: SessionRegistry,
    gate: Arc<dyn AuthorizationGate>,
    config: RunnerConfig,
}

impl StreamRunner {
    pub fn new(
        store: LogStore,
        registry: SessionRegistry,
        gate: Arc<dyn AuthorizationGate>,
        config: RunnerConfig,
    ) -> Self {
        Self {
            store,
            registry,
            gate,
            config,
        }
    }

    pub fn config(&self) -> &RunnerConfig {
        &self.config
    }

    /// Settle authorization and ownership for a new session.
    ///
    /// A denied request still produces a session: its log holds a single
    /// `fatal-error` record and it is marked failed. It is never claimed and
    /// the producer is never invoked. The returned run is already finished.
    pub async fn start(&self, request: RunRequest, control: RunControl) -> RiverResult<PreparedRun> {
        let RunRequest {
            session_id,
            stream,
            input,
            producer,
            context,
            resumable,
        } = request;
        debug!(session_id = %session_id, stream = %stream, state = %RunnerState::Starting, "Runner starting");

        let decision = auth::authorize(self.gate.as_ref(), &context).await;
        self.create_session(SessionMeta::new(session_id.clone(), &stream, resumable))
            .await?;

        if let Err(denied) = decision {
            warn!(session_id = %session_id, error = %denied, "Start denied");
            self.write_fatal(&session_id, 0, &denied).await?;
            self.store
                .finish_session(
                    &session_id,
                    SessionStatus::Failed,
                    denied.classification(),
                )
                .await?;
            return Ok(PreparedRun {
                runner: self.clone(),
                session_id,
                stream,
                mode: RunMode::Denied(denied),
                control,
            });
        }

        let guard = self.registry.claim(&session_id).await?;
        Ok(PreparedRun {
            runner: self.clone(),
            session_id,
            stream,
            mode: RunMode::Ready {
                input,
                producer,
                guard,
            },
            control,
        })
    }

    async fn create_session(&self, meta: SessionMeta) -> RiverResult<()> {
        match self.store.create_session(&meta).await {
            Ok(()) => Ok(()),
            Err(RiverError::AlreadyOwned { .. }) => {
                let existing = self.store.session(&meta.id).await?;
                match existing {
                    Some(existing) if existing.status.is_terminal() => Err(RiverError::terminated(
                        &meta.id,
                        format!("session already {}", existing.status),
                    )),
                    _ => Err(RiverError::already_owned(&meta.id)),
                }
            }
            Err(e) => Err(e),
        }
    }

    async fn write_fatal(
        &self,
        session_id: &SessionId,
        sequence: Sequence,
        cause: &RiverError,
    ) -> RiverResult<()> {
        let payload = FatalErrorFrame::from_error(cause).to_payload()?;
        self.store
            .append_at(
                session_id,
                ChunkRecord::new(sequence, FrameKind::FatalError, payload),
                None,
            )
            .await
    }
}

enum RunMode {
    Ready {
        input: Value,
        producer: Arc<dyn Producer>,
        guard: OwnershipGuard,
    },
    Denied(RiverError),
}

/// A claimed session waiting for its pull loop to be driven
pub struct PreparedRun {
    runner: StreamRunner,
    session_id: SessionId,
    stream: String,
    mode: RunMode,
    control: RunControl,
}

impl PreparedRun {
    pub fn session_id(&self) -> &SessionId {
        &self.session_id
    }

    /// True when authorization failed and the log is already closed
    pub fn is_denied(&self) -> bool {
        matches!(self.mode, RunMode::Denied(_))
    }

    pub fn control(&self) -> &RunControl {
        &self.control
    }

    /// Drive the producer until a terminal record is written.
    ///
    /// `presence` counts attached subscribers for the detached grace check.
    pub async fn run(self, presence: Presence) -> RunReport {
        let PreparedRun {
            runner,
            session_id,
            stream,
            mode,
            control,
        } = self;

        let (input, producer, guard) = match mode {
            RunMode::Denied(error) => {
                return RunReport {
                    session_id,
                    state: RunnerState::Failed,
                    records: 1,
                    abort_reason: None,
                    error: Some(error),
                };
            }
            RunMode::Ready {
                input,
                producer,
                guard,
            } => (input, producer, guard),
        };

        info!(session_id = %session_id, stream = %stream, state = %RunnerState::Running, "Runner state changed");

        let producer_cancel = control.token().child_token();
        let ctx = ProducerContext::new(session_id.clone(), &stream, producer_cancel.clone());
        let mut next_sequence: Sequence = 0;

        let exit = match producer.produce(input, ctx).await {
            Ok(emissions) => {
                drive(
                    &runner,
                    &session_id,
                    emissions,
                    &guard,
                    &control,
                    &presence,
                    &mut next_sequence,
                )
                .await
            }
            Err(e) => LoopExit::Failed(e.into()),
        };
        producer_cancel.cancel();

        let report = finish(&runner, &session_id, exit, next_sequence).await;

        if let Err(e) = guard.release().await {
            warn!(session_id = %session_id, error = %e, "Failed to release session lease");
        }
        report
    }
}

/// Pull loop. Returns how it ended; terminal records are written by the caller.
async fn drive(
    runner: &StreamRunner,
    session_id: &SessionId,
    mut emissions: EmissionStream,
    guard: &OwnershipGuard,
    control: &RunControl,
    presence: &Presence,
    next_sequence: &mut Sequence,
) -> LoopExit {
    let lost = guard.lost();
    let mut deadline = pin!(tokio::time::sleep(runner.config.max_run_duration));
    let mut detached = pin!(detached_for(presence.watch(), runner.config.detached_grace));
    let pull_timeout = runner.config.pull_timeout;

    'pull: loop {
        let pulled = tokio::select! {
            biased;

            _ = control.cancelled() => {
                break 'pull LoopExit::Aborted(control.reason().unwrap_or(AbortReason::Requested));
            }
            _ = lost.cancelled() => break 'pull LoopExit::LeaseLost,
            _ = &mut deadline => {
                control.abort(AbortReason::BudgetExceeded);
                break 'pull LoopExit::Aborted(AbortReason::BudgetExceeded);
            }
            _ = &mut detached => {
                control.abort(AbortReason::ConsumersGone);
                break 'pull LoopExit::Aborted(AbortReason::ConsumersGone);
            }
            pulled = pull(&mut emissions, pull_timeout) => pulled,
        };

        let (kind, payload) = match pulled {
            Pull::Item(Ok(Emission::Chunk(payload))) => (FrameKind::Data, payload),
            Pull::Item(Ok(Emission::Info(payload))) => (FrameKind::Info, payload),
            Pull::Item(Err(e)) => break 'pull LoopExit::Failed(e.into()),
            Pull::Exhausted => break 'pull LoopExit::Completed,
            Pull::TimedOut(after) => {
                break 'pull LoopExit::Failed(RiverError::producer(format!(
                    "producer yielded nothing for {:?}",
                    after
                )));
            }
        };

        let record = ChunkRecord::new(*next_sequence, kind, payload);
        match runner
            .store
            .append_at(session_id, record, Some(lost.clone()))
            .await
        {
            Ok(()) => *next_sequence += 1,
            Err(RiverError::AlreadyOwned { .. }) => break 'pull LoopExit::LeaseLost,
            Err(_) if lost.is_cancelled() => break 'pull LoopExit::LeaseLost,
            Err(e) => break 'pull LoopExit::Failed(e),
        }
    }
}

async fn pull(emissions: &mut EmissionStream, timeout: Option<Duration>) -> Pull {
    let next = match timeout {
        Some(after) => match tokio::time::timeout(after, emissions.next()).await {
            Ok(next) => next,
            Err(_) => return Pull::TimedOut(after),
        },
        None => emissions.next().await,
    };
    match next {
        Some(item) => Pull::Item(item),
        None => Pull::Exhausted,
    }
}

/// Write the terminal record and persist the final status
async fn finish(
    runner: &StreamRunner,
    session_id: &SessionId,
    exit: LoopExit,
    next_sequence: Sequence,
) -> RunReport {
    let (state, frame, abort_reason, cause) = match exit {
        LoopExit::Completed => (
            RunnerState::Completed,
            EndFrame::completed().to_payload().map(|p| (FrameKind::End, p)),
            None,
            None,
        ),
        LoopExit::Aborted(reason) => (
            RunnerState::Aborted,
            EndFrame::aborted(reason.description())
                .to_payload()
                .map(|p| (FrameKind::End, p)),
            Some(reason),
            None,
        ),
        LoopExit::Failed(e) => (
            RunnerState::Failed,
            FatalErrorFrame::from_error(&e)
                .to_payload()
                .map(|p| (FrameKind::FatalError, p)),
            None,
            Some(e),
        ),
        LoopExit::LeaseLost => {
            warn!(
                session_id = %session_id,
                appended = next_sequence,
                "Lost session ownership, stopping without a terminal record"
            );
            return RunReport {
                session_id: session_id.clone(),
                state: RunnerState::Failed,
                records: next_sequence,
                abort_reason: None,
                error: Some(RiverError::already_owned(session_id)),
            };
        }
    };

    let mut records = next_sequence;
    let terminal = cause.as_ref().map(|e| {
        e.classification()
            .unwrap_or(ErrorClassification::ProducerFailure)
    });

    match frame {
        Ok((kind, payload)) => {
            let record = ChunkRecord::new(next_sequence, kind, payload);
            match runner.store.append_at(session_id, record, None).await {
                Ok(()) => records += 1,
                Err(e) => {
                    error!(session_id = %session_id, error = %e, "Failed to append terminal record");
                }
            }
        }
        Err(e) => {
            error!(session_id = %session_id, error = %e, "Failed to encode terminal record");
        }
    }

    if let Some(status) = state.session_status() {
        if let Err(e) = runner
            .store
            .finish_session(session_id, status, terminal)
            .await
        {
            error!(session_id = %session_id, error = %e, "Failed to record final session status");
        }
    }

    match (&cause, abort_reason) {
        (Some(e), _) => {
            warn!(session_id = %session_id, state = %state, records, error = %e, "Runner state changed");
        }
        (None, Some(reason)) => {
            info!(session_id = %session_id, state = %state, records, reason = %reason, "Runner state changed");
        }
        (None, None) => {
            info!(session_id = %session_id, state = %state, records, "Runner state changed");
        }
    }

    RunReport {
        session_id: session_id.clone(),
        state,
        records,
        abort_reason,
        error: cause,
    }
}
