//! Durable log store
//!
//! Adapter over a [`LogBackend`] that adds the engine's guarantees on top of
//! raw storage: conditional, idempotent appends with bounded retry, paged
//! replay, and a live tail that shares the replay's ordering so a consumer
//! moving from history to live sees no seam.

mod tail;

use chrono::{DateTime, Utc};
use futures::stream::{self, BoxStream, StreamExt, TryStreamExt};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

pub use tail::TailItem;

use crate::backend::{BackendError, Lease, LogBackend};
use crate::codec::Payload;
use crate::config::StoreConfig;
use crate::error::{ErrorClassification, RiverError, RiverResult};
use crate::recovery::{RetryConfig, RetryPolicy, RetryResult};
use crate::types::{ChunkRecord, FrameKind, Sequence, SessionId, SessionMeta, SessionStatus};

/// Session metadata with its current log length and lease
#[derive(Debug, Clone)]
pub struct SessionSummary {
    pub meta: SessionMeta,
    pub length: u64,
    pub lease: Option<Lease>,
}

/// What a retention sweep removed
#[derive(Debug, Clone, Default)]
pub struct SweepReport {
    pub removed: Vec<SessionId>,
    pub retained: usize,
}

/// Append-only per-session log with replay and live tailing
#[derive(Clone)]
pub struct LogStore {
    backend: Arc<dyn LogBackend>,
    config: StoreConfig,
    retry: RetryConfig,
}

impl LogStore {
    pub fn new(backend: Arc<dyn LogBackend>, config: StoreConfig, retry: RetryConfig) -> Self {
        Self {
            backend,
            config,
            retry,
        }
    }

    pub fn backend(&self) -> &Arc<dyn LogBackend> {
        &self.backend
    }

    pub fn config(&self) -> &StoreConfig {
        &self.config
    }

    pub fn retry_config(&self) -> &RetryConfig {
        &self.retry
    }

    /// Run a backend operation under the retry policy
    async fn with_retry<T, F, Fut>(
        &self,
        operation: F,
        cancel: Option<CancellationToken>,
    ) -> RiverResult<T>
    where
        F: FnMut() -> Fut,
        Fut: std::future::Future<Output = Result<T, BackendError>>,
    {
        let mut policy = RetryPolicy::with_config(self.retry.clone());
        match policy.execute(operation, cancel).await {
            RetryResult::Success(value) => Ok(value),
            RetryResult::Failed {
                error, attempts, ..
            } if error.is_transient() => Err(RiverError::StoreUnavailable {
                message: error.to_string(),
                attempts,
            }),
            RetryResult::Failed { error, .. } => Err(error.into()),
            RetryResult::Cancelled => Err(RiverError::internal("store operation cancelled")),
        }
    }

    pub async fn create_session(&self, meta: &SessionMeta) -> RiverResult<()> {
        self.with_retry(|| self.backend.create_session(meta), None)
            .await?;
        debug!(session_id = %meta.id, stream = %meta.stream, "Session created");
        Ok(())
    }

    pub async fn session(&self, id: &SessionId) -> RiverResult<Option<SessionMeta>> {
        self.with_retry(|| self.backend.load_session(id), None).await
    }

    /// Status of a session. Unknown sessions are reported as terminated.
    pub async fn get_status(&self, id: &SessionId) -> RiverResult<SessionStatus> {
        self.session(id)
            .await?
            .map(|meta| meta.status)
            .ok_or_else(|| RiverError::terminated(id, "session is unknown or past its retention window"))
    }

    pub async fn length(&self, id: &SessionId) -> RiverResult<u64> {
        self.with_retry(|| self.backend.length(id), None).await
    }

    /// Append at the end of the log and return the assigned sequence.
    ///
    /// Only safe for the session's single writer; the runner tracks its own
    /// cursor and uses [`LogStore::append_at`] directly.
    pub async fn append(
        &self,
        id: &SessionId,
        kind: FrameKind,
        payload: Payload,
    ) -> RiverResult<Sequence> {
        let sequence = self.length(id).await?;
        self.append_at(id, ChunkRecord::new(sequence, kind, payload), None)
            .await?;
        Ok(sequence)
    }

    /// Conditional append at `record.sequence`, retried while the backend is
    /// unavailable. A retry that finds its own record already in place (the
    /// earlier attempt landed but the acknowledgment was lost) succeeds
    /// without writing twice. Any other conflict means someone else owns the
    /// log and surfaces as `AlreadyOwned`.
    pub async fn append_at(
        &self,
        id: &SessionId,
        record: ChunkRecord,
        cancel: Option<CancellationToken>,
    ) -> RiverResult<()> {
        let backend = &self.backend;
        let record = &record;
        self.with_retry(
            || async move {
                match backend.append(id, record).await {
                    Ok(()) => Ok(()),
                    Err(BackendError::SequenceConflict { actual, .. })
                        if actual > record.sequence =>
                    {
                        let existing = backend.read_range(id, record.sequence, 1).await?;
                        match existing.first() {
                            Some(found) if found.same_content(record) => {
                                debug!(
                                    session_id = %id,
                                    sequence = record.sequence,
                                    "Append already landed on an earlier attempt"
                                );
                                Ok(())
                            }
                            _ => Err(BackendError::SequenceConflict {
                                session_id: id.to_string(),
                                expected: record.sequence,
                                actual,
                            }),
                        }
                    }
                    Err(e) => Err(e),
                }
            },
            cancel,
        )
        .await
    }

    /// One page of records starting at `from`
    pub async fn read_page(
        &self,
        id: &SessionId,
        from: Sequence,
        limit: usize,
    ) -> RiverResult<Vec<ChunkRecord>> {
        self.with_retry(|| self.backend.read_range(id, from, limit), None)
            .await
    }

    /// Every persisted record from `offset` on, read lazily page by page.
    /// The stream is finite and can be restarted at any offset.
    pub fn read_from(
        &self,
        id: &SessionId,
        offset: Sequence,
    ) -> BoxStream<'static, RiverResult<ChunkRecord>> {
        let store = self.clone();
        let id = id.clone();
        let batch = self.config.read_batch_size.max(1);

        stream::try_unfold((offset, false), move |(next, exhausted)| {
            let store = store.clone();
            let id = id.clone();
            async move {
                if exhausted {
                    return Ok::<_, RiverError>(None);
                }
                let page = store.read_page(&id, next, batch).await?;
                if page.is_empty() {
                    return Ok(None);
                }
                let next = next + page.len() as u64;
                let exhausted = page.len() < batch;
                Ok(Some((
                    stream::iter(page.into_iter().map(Ok::<_, RiverError>)),
                    (next, exhausted),
                )))
            }
        })
        .try_flatten()
        .boxed()
    }

    /// Replay from `from`, then keep tailing new appends until a terminal
    /// record. Emits [`TailItem::Idle`] whenever a poll interval passes with
    /// nothing new.
    pub fn follow(
        &self,
        id: &SessionId,
        from: Sequence,
    ) -> BoxStream<'static, RiverResult<TailItem>> {
        tail::follow(self.clone(), id.clone(), from)
    }

    /// Records appended after this call, until a terminal record
    pub async fn subscribe_live(
        &self,
        id: &SessionId,
    ) -> RiverResult<BoxStream<'static, RiverResult<ChunkRecord>>> {
        let from = self.length(id).await?;
        Ok(self
            .follow(id, from)
            .try_filter_map(|item| async move {
                Ok(match item {
                    TailItem::Record(record) => Some(record),
                    TailItem::Idle => None,
                })
            })
            .boxed())
    }

    /// Record the terminal status of a session
    pub async fn finish_session(
        &self,
        id: &SessionId,
        status: SessionStatus,
        terminal: Option<ErrorClassification>,
    ) -> RiverResult<SessionMeta> {
        let mut meta = self
            .session(id)
            .await?
            .ok_or_else(|| RiverError::terminated(id, "session disappeared before it finished"))?;
        if meta.finish(status, terminal) {
            self.with_retry(|| self.backend.update_session(&meta), None)
                .await?;
            info!(session_id = %id, status = %status, "Session finished");
        } else {
            warn!(
                session_id = %id,
                current = %meta.status,
                requested = %status,
                "Session already finished; keeping first terminal status"
            );
        }
        Ok(meta)
    }

    pub async fn list_sessions(&self) -> RiverResult<Vec<SessionSummary>> {
        let sessions = self.with_retry(|| self.backend.list_sessions(), None).await?;
        let mut summaries = Vec::with_capacity(sessions.len());
        for meta in sessions {
            let length = self.backend.length(&meta.id).await.unwrap_or(0);
            let lease = self.backend.lease(&meta.id).await.unwrap_or(None);
            summaries.push(SessionSummary {
                meta,
                length,
                lease,
            });
        }
        Ok(summaries)
    }

    pub async fn delete_session(&self, id: &SessionId) -> RiverResult<bool> {
        self.with_retry(|| self.backend.delete_session(id), None).await
    }

    /// Delete finished sessions whose last activity is older than the
    /// retention window. Running sessions are never removed here.
    pub async fn sweep_expired(&self, now: DateTime<Utc>) -> RiverResult<SweepReport> {
        let retention = chrono::Duration::from_std(self.config.retention)
            .unwrap_or(chrono::Duration::MAX);
        let sessions = self.with_retry(|| self.backend.list_sessions(), None).await?;

        let mut report = SweepReport::default();
        for meta in sessions {
            let expired = meta.status.is_terminal()
                && meta
                    .last_activity()
                    .checked_add_signed(retention)
                    .is_some_and(|deadline| deadline <= now);
            if !expired {
                report.retained += 1;
                continue;
            }
            match self.backend.delete_session(&meta.id).await {
                Ok(_) => {
                    debug!(session_id = %meta.id, "Deleted expired session");
                    report.removed.push(meta.id);
                }
                Err(e) => {
                    warn!(session_id = %meta.id, error = %e, "Failed to delete expired session");
                    report.retained += 1;
                }
            }
        }

        if !report.removed.is_empty() {
            info!(removed = report.removed.len(), retained = report.retained, "Swept expired sessions");
        }
        Ok(report)
    }
}
